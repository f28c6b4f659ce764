//! Reads the `ccov-files.txt` configuration: a project root on the first
//! line, followed by the absolute paths of files whose coverage is reported.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub files: Vec<PathBuf>,
}

pub fn load(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();

    let Some(project_root) = lines.next() else {
        return Err(Error::EmptyConfig(path.to_path_buf()));
    };

    Ok(Config {
        project_root: PathBuf::from(project_root),
        files: lines.map(PathBuf::from).collect(),
    })
}
