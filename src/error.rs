//! Error types for printing and host interaction.

use thiserror::Error;

pub type PrintResult<T> = std::result::Result<T, PrintError>;

#[derive(Error, Debug)]
pub enum PrintError {
    /// Writing an artifact or printer device failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The system browser could not be launched.
    #[error("Failed to open browser: {0}")]
    Browser(String),

    /// The raw spooler rejected or failed the job.
    #[error("Spooler error: {0}")]
    Spooler(String),

    #[error("Logo error: {0}")]
    Logo(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
