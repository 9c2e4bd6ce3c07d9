use thiserror::Error;

/// Errors surfaced by the coordinator and worker binaries.
///
/// Per-record (per-line, per-key) user-code errors are deliberately absent
/// here: those are logged and swallowed at the call site so a single bad
/// record never fails the enclosing task (spec §7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("unknown function registry key: {0}")]
    UnknownFunction(String),

    #[error("user code load failure: {0}")]
    UserCodeLoad(String),

    #[error("intermediate encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
