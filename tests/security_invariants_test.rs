//! Security invariant regression checks.

use std::path::{Path, PathBuf};

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

#[test]
fn no_host_process_command_apis_in_src() -> Result<(), Box<dyn std::error::Error>> {
    let src_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut rust_files = Vec::new();
    collect_rust_files(&src_dir, &mut rust_files)?;

    let forbidden = ["std::process::Command", "tokio::process::Command"];
    let allowed_files: &[&str] = &["subprocess.rs"];
    for path in rust_files {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if allowed_files.contains(&file_name) {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        for pattern in forbidden {
            assert!(
                !content.contains(pattern),
                "forbidden host process-command API '{pattern}' found in {} — only the subprocess adapter may spawn host processes",
                path.display()
            );
        }
    }
    Ok(())
}

#[test]
fn sandbox_exec_redacts_stdout_and_stderr() -> Result<(), Box<dyn std::error::Error>> {
    let docker_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/executor/docker.rs");
    let content = std::fs::read_to_string(docker_src)?;
    assert!(
        content.contains("self.redactor.redact(&stdout_raw)") && content.contains("self.redactor.redact(&stderr_raw)"),
        "sandbox exec must redact stdout and stderr before returning them"
    );
    Ok(())
}

#[test]
fn container_exec_env_is_empty_without_egress_proxy() -> Result<(), Box<dyn std::error::Error>> {
    let docker_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/executor/docker.rs");
    let content = std::fs::read_to_string(docker_src)?;
    assert!(
        content.contains("None => Vec::new(),"),
        "docker container env must stay empty when no egress proxy is configured"
    );
    Ok(())
}

#[test]
fn container_network_is_proxy_scoped_with_deny_all_default() -> Result<(), Box<dyn std::error::Error>> {
    let docker_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/executor/docker.rs");
    let docker_content = std::fs::read_to_string(docker_src)?;
    assert!(
        docker_content.contains("network_name") && docker_content.contains("proxy_address"),
        "the sandbox container must accept network/proxy configuration from the egress proxy"
    );

    let egress_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/executor/egress.rs");
    let egress_content = std::fs::read_to_string(egress_src)?;
    assert!(
        egress_content.contains("zulu-net") && egress_content.contains("http_access deny all"),
        "egress proxy must use the zulu-net network and a deny-all default policy"
    );
    Ok(())
}

#[test]
fn domain_allowlist_is_checked_before_every_network_touch() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox_src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/executor/sandbox.rs");
    let content = std::fs::read_to_string(sandbox_src)?;
    assert!(
        content.contains("domain_allowlist") && content.contains("DomainBlocked"),
        "sandbox dispatch must check the request's domain allowlist before any network-touching step"
    );
    Ok(())
}

#[test]
fn config_toml_and_policy_yaml_are_separate_files() -> Result<(), Box<dyn std::error::Error>> {
    let paths = zulu::config::runtime_paths()?;
    assert_ne!(
        paths.root.join("config.toml"),
        paths.env_file,
        "config.toml and the .env credentials file must be separate files"
    );
    Ok(())
}
