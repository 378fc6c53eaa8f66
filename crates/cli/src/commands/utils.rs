use std::fmt;
use tether_core::TetherError;

#[derive(Debug)]
pub enum CliError {
    Config(String),
    Io(String),
    Network(String),
    Rpc(String),
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Network(msg) => write!(f, "Network error: {msg}"),
            Self::Rpc(msg) => write!(f, "RPC error: {msg}"),
            Self::General(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::General(error.to_string())
    }
}

impl From<TetherError> for CliError {
    fn from(error: TetherError) -> Self {
        match error {
            TetherError::Config(msg) => Self::Config(msg),
            error @ (TetherError::NetworkFailure { .. } |
            TetherError::RateLimitExhausted { .. } |
            TetherError::Connection(_) |
            TetherError::Timeout(_) |
            TetherError::UnsupportedUrl(_)) => Self::Network(error.to_string()),
            error => Self::Rpc(error.to_string()),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    eprintln!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    eprintln!("[INFO] {message}");
}
