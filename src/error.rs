use std::path::PathBuf;

/// Errors surfaced by the debugger engine and the coverage layer built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // --------------------------------- process control ------------------------------------
    #[error("failed to spawn debugee: {0}")]
    Spawn(std::io::Error),
    #[error("waitpid syscall error: {0}")]
    Waitpid(nix::Error),
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("debugee process exited before reaching its entry point")]
    ExitedBeforeEntry,

    // --------------------------------- symbol / debug info ---------------------------------
    #[error("failed to parse object file {path}: {source}")]
    ObjParsing {
        path: PathBuf,
        #[source]
        source: object::Error,
    },
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),

    // --------------------------------- breakpoints ------------------------------------------
    #[error("a breakpoint is already installed at address {0:#x}")]
    BreakpointAlreadyInstalled(u64),
    #[error("no breakpoint registered at address {0:#x}")]
    BreakpointNotFound(u64),

    // --------------------------------- configuration ----------------------------------------
    #[error("config file {0} is empty, expected a project root on the first line")]
    EmptyConfig(PathBuf),

    // --------------------------------- reporting --------------------------------------------
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
