//! Crate-wide error type.
//!
//! Only the non-RT path returns `Result`. `LiveDecoder::process` and `retrigger` never
//! do — they degrade to silence and log instead (see `decoder` module docs).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("io error{}: {source}", path.as_ref().map(|p| format!(" ({})", p.display())).unwrap_or_default())]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model: {message}")]
    InvalidModel { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_parameter(message: impl Into<String>) -> Error {
        Error::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn invalid_model(message: impl Into<String>) -> Error {
        Error::InvalidModel {
            message: message.into(),
        }
    }
}
