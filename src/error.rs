use thiserror::Error;

pub type Result<T> = std::result::Result<T, GwhoError>;

#[derive(Error, Debug)]
pub enum GwhoError {
    #[error("could not start git: {0}")]
    SubprocessStart(#[source] std::io::Error),
    #[error("git exited with code {code}: {stderr}")]
    SubprocessExit { code: i32, stderr: String },
    #[error("could not parse commit {commit}: bad line {line:?}")]
    Parse { commit: String, line: String },
    #[error("cache error: {message}")]
    Cache { message: String, recoverable: bool },
    #[error("cancelled")]
    Cancelled,
    #[error("no commits matched")]
    EmptyResult,
    #[error("could not parse args: {0}")]
    Args(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GwhoError {
    pub fn cache<S: Into<String>>(message: S, recoverable: bool) -> Self {
        GwhoError::Cache {
            message: message.into(),
            recoverable,
        }
    }
}
