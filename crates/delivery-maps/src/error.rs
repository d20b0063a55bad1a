//! Mapping provider error types

use thiserror::Error;

/// Errors from route planning and geocoding providers
#[derive(Error, Debug)]
pub enum MapsError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider rejected request (status {status}): {message}")]
    Api { status: i64, message: String },

    #[error("Provider returned no route")]
    EmptyRoute,

    #[error("Provider request timed out")]
    Timeout,

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl MapsError {
    pub fn api(status: i64, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

impl From<reqwest::Error> for MapsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

pub type MapsResult<T> = Result<T, MapsError>;
