//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    let source_result = fs::read_to_string(&path);
    assert!(source_result.is_ok());
    match source_result {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

#[test]
fn main_defines_primary_subcommands() {
    let source = main_source();
    assert!(source.contains("Plan { input: String }"));
    assert!(source.contains("Run { input: String }"));
    assert!(source.contains("VerifyAudit { path: PathBuf }"));
    assert!(source.contains("Checkpoint { path: PathBuf }"));
}

#[test]
fn verify_audit_reports_the_broken_sequence() {
    let source = main_source();
    let bail_idx = source.find("audit chain verification failed at sequence").expect("broken-sequence error message");
    let verify_call_idx = source.find("chain.verify()?").expect("verify call");
    assert!(verify_call_idx < bail_idx, "verify() must be called before reporting a broken sequence");
}
