//! HTTP protocol layer module
//!
//! Provides HTTP protocol-related base functionality, decoupled from file serving.

pub mod cache;
pub mod headers;
pub mod mime;
pub mod response;

// Re-export commonly used types
pub use headers::HeaderInjector;
pub use response::{
    build_304_response, build_501_response, build_directory_redirect, build_error_response,
    build_file_response,
};
