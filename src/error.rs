use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Unknown system variable '{0}'")]
    UnknownSystemVariable(String),
}

impl From<mysql_async::Error> for GateError {
    fn from(e: mysql_async::Error) -> Self {
        GateError::Remote(e.to_string())
    }
}
