//! Security and hygiene invariant tests for the watchdog crate, adapted
//! from the root crate's own invariant checks.

use std::path::{Path, PathBuf};

/// Recursively collect all `.rs` files under the given directory.
fn collect_rust_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect_rust_files(&path, out)?;
        } else if metadata.is_file() && path.extension().and_then(|e| e.to_str()) == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// No `.unwrap()` calls in production source code.
/// `.unwrap_or`, `.unwrap_or_else`, and `.unwrap_or_default` are allowed.
#[test]
fn no_unwrap_in_src() {
    let src_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut rust_files = Vec::new();
    collect_rust_files(&src_dir, &mut rust_files).expect("failed to collect Rust source files");

    for path in &rust_files {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));

        let mut in_test_module = false;
        for line in content.lines() {
            if line.trim_start().starts_with("#[cfg(test)]") {
                in_test_module = true;
            }
            if in_test_module {
                continue;
            }
            if line.contains(".unwrap_or") {
                continue;
            }
            assert!(
                !line.contains(".unwrap()"),
                ".unwrap() found in production code of {}: {}",
                path.display(),
                line.trim()
            );
        }
    }
}

/// Every `.rs` file in `watchdog/src/` must start with `//!` module-level
/// documentation.
#[test]
fn all_modules_have_doc_comments() {
    let src_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut rust_files = Vec::new();
    collect_rust_files(&src_dir, &mut rust_files).expect("failed to collect Rust source files");

    for path in &rust_files {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));

        assert!(
            content.starts_with("//!"),
            "{} must start with //! module-level documentation",
            path.display()
        );
    }
}

/// The crate root must contain `#![forbid(unsafe_code)]`.
#[test]
fn crate_root_forbids_unsafe() {
    let lib_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/lib.rs");
    let content = std::fs::read_to_string(&lib_src)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", lib_src.display()));

    assert!(
        content.contains("#![forbid(unsafe_code)]"),
        "watchdog/src/lib.rs must contain #![forbid(unsafe_code)]"
    );
}

/// A `"report_only"` kill action must short-circuit before any
/// restart/kill call reaches Docker — it is the safe default for a
/// freshly deployed watchdog and must only record, not act.
#[test]
fn report_only_kill_action_short_circuits_before_docker_call() {
    let poll_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/poll.rs");
    let content = std::fs::read_to_string(&poll_src)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", poll_src.display()));

    let report_only_idx = content
        .find("\"report_only\"")
        .expect("kill() must branch on the report_only kill action");
    let restart_call_idx = content
        .find("restart_container")
        .expect("kill() must still support the restart action");

    assert!(
        report_only_idx < restart_call_idx,
        "the report_only short-circuit must appear before the docker restart/kill calls in kill()"
    );
}
