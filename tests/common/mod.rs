use std::path::{Path, PathBuf};
use std::process::Command;

/// Compile a tiny C fixture with line-level debug info and return the path
/// to the resulting executable, kept alive for the duration of the test via
/// the returned `tempfile::TempDir`.
pub fn compile_fixture(source: &str, name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join(format!("{name}.c"));
    std::fs::write(&src_path, source).unwrap();

    let bin_path = dir.path().join(name);
    let status = Command::new("cc")
        .args(["-g", "-O0", "-static", "-o"])
        .arg(&bin_path)
        .arg(&src_path)
        .status()
        .expect("failed to invoke cc; a C toolchain is required for integration tests");
    assert!(status.success(), "fixture compilation failed");

    (dir, bin_path)
}

pub fn write_config(dir: &Path, project_root: &Path, files: &[PathBuf]) -> PathBuf {
    let config_path = dir.join("ccov-files.txt");
    let mut body = project_root.to_string_lossy().into_owned();
    for f in files {
        body.push('\n');
        body.push_str(&f.to_string_lossy());
    }
    std::fs::write(&config_path, body).unwrap();
    config_path
}
