use crate::http::Status;
use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("path escapes served root: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid or unsatisfiable byte range: {0}")]
    InvalidRange(String),

    #[error("upload exceeds maximum size ({size} > {max})")]
    UploadTooLarge { size: u64, max: u64 },

    #[error("multipart body has no file field")]
    UploadFieldMissing,

    #[error("failed to persist upload: {0}")]
    UploadWriteFailed(String),

    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// HTTP status this error maps to at the request boundary.
    pub fn status(&self) -> Status {
        match self {
            ServerError::Forbidden(_) => Status::Forbidden,
            ServerError::NotFound(_) => Status::NotFound,
            ServerError::InvalidRange(_) => Status::RangeNotSatisfiable,
            ServerError::UploadTooLarge { .. } => Status::BadRequest,
            ServerError::UploadFieldMissing => Status::BadRequest,
            ServerError::UploadWriteFailed(_) => Status::InternalServerError,
            ServerError::HttpParse(_) => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
