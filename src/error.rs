//! Per-request failure taxonomy
//!
//! Every failure while resolving or reading a path ends up as one of these
//! variants, which the handler turns into an HTTP status response.

use hyper::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("file not found")]
    NotFound,
    #[error("permission denied")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl ServeError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<io::Error> for ServeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // A path component that is a file (`/a.txt/b`) surfaces as NotADirectory
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::Forbidden,
            _ => Self::Io(err),
        }
    }
}
