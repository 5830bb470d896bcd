use std::net::AddrParseError;

/// When things go awry
#[derive(Debug)]
pub enum PlaydarError {
    /// Something failed in the start up of the platform
    StartupError(String),
    ConfigError(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    ReqwestError(reqwest::Error),
    AddrParseError(AddrParseError),
    /// Failed to send something across a tokio channel
    SendError(String),
    /// The registry doesn't know about this QID - it's expired or never existed
    UnknownQid(String),
    Generic(String),
}

impl std::fmt::Display for PlaydarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for PlaydarError {}

impl From<std::io::Error> for PlaydarError {
    fn from(error: std::io::Error) -> Self {
        PlaydarError::IoError(error)
    }
}

impl From<serde_json::Error> for PlaydarError {
    fn from(error: serde_json::Error) -> Self {
        PlaydarError::JsonError(error)
    }
}

impl From<reqwest::Error> for PlaydarError {
    fn from(error: reqwest::Error) -> Self {
        PlaydarError::ReqwestError(error)
    }
}

impl From<AddrParseError> for PlaydarError {
    fn from(error: AddrParseError) -> Self {
        PlaydarError::AddrParseError(error)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PlaydarError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PlaydarError::SendError(error.to_string())
    }
}

impl From<config::ConfigError> for PlaydarError {
    fn from(error: config::ConfigError) -> Self {
        PlaydarError::ConfigError(error.to_string())
    }
}

impl From<PlaydarError> for std::io::Error {
    fn from(error: PlaydarError) -> Self {
        match error {
            PlaydarError::IoError(err) => err,
            other => std::io::Error::other(other.to_string()),
        }
    }
}
