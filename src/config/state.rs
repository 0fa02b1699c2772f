// Application state module
// Process-wide state built once at start-up and shared read-only by every connection

use std::io;
use std::path::PathBuf;

use hyper::header::HeaderValue;

use super::types::Config;
use crate::http::headers::HeaderInjector;
use crate::logger::{self, AccessLogFormat};

/// Application state
pub struct AppState {
    pub config: Config,
    /// Canonical serving root; every resolved path must stay inside it
    pub root: PathBuf,
    /// Fixed headers added to every outgoing response
    pub injector: HeaderInjector,
    pub access_log_format: AccessLogFormat,
    /// `Server` header value, `None` when `http.server_name` is not a valid header value
    pub server_header: Option<HeaderValue>,
}

impl AppState {
    /// Build state from configuration, canonicalizing the serving root
    pub fn new(config: &Config) -> io::Result<Self> {
        let root = std::path::Path::new(&config.server.root).canonicalize()?;
        let server_header = match HeaderValue::from_str(&config.http.server_name) {
            Ok(value) => Some(value),
            Err(e) => {
                logger::log_warning(&format!(
                    "Invalid http.server_name {:?}, Server header disabled: {e}",
                    config.http.server_name
                ));
                None
            }
        };
        Ok(Self {
            config: config.clone(),
            root,
            injector: HeaderInjector::new(config.headers.profile),
            access_log_format: AccessLogFormat::parse(&config.logging.access_log_format),
            server_header,
        })
    }

    /// Whether one access log line is written per request
    pub const fn access_log(&self) -> bool {
        self.config.logging.access_log
    }
}
