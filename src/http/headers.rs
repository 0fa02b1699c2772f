//! Response header injection
//!
//! Decorates every response leaving the handler with the fixed headers of the
//! configured profile. Injected values replace whatever the file-serving layer
//! set under the same name.

use crate::config::HeaderProfile;
use hyper::header::{HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL};
use hyper::Response;

/// Adds a fixed, ordered header set to outgoing responses
#[derive(Debug, Clone)]
pub struct HeaderInjector {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderInjector {
    pub fn new(profile: HeaderProfile) -> Self {
        let mut headers = vec![(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))];
        if profile == HeaderProfile::NoCache {
            headers.push((CACHE_CONTROL, HeaderValue::from_static("no-cache")));
        }
        Self { headers }
    }

    /// Insert the profile headers into `response`
    pub fn apply<B>(&self, mut response: Response<B>) -> Response<B> {
        let map = response.headers_mut();
        for (name, value) in &self.headers {
            map.insert(name.clone(), value.clone());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;

    fn response_with(name: &str, value: &str) -> Response<Full<Bytes>> {
        Response::builder()
            .status(404)
            .header(name, value)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn test_no_cache_profile() {
        let injector = HeaderInjector::new(HeaderProfile::NoCache);
        let resp = injector.apply(response_with("Content-Type", "text/plain"));
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn test_cors_only_profile() {
        let injector = HeaderInjector::new(HeaderProfile::CorsOnly);
        let resp = injector.apply(response_with("Content-Type", "text/plain"));
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert!(resp.headers().get("cache-control").is_none());
        assert_eq!(resp.headers().len(), 2);
    }

    #[test]
    fn test_injected_value_replaces_existing() {
        let injector = HeaderInjector::new(HeaderProfile::NoCache);
        let resp = injector.apply(response_with("Cache-Control", "public, max-age=3600"));
        let values: Vec<_> = resp.headers().get_all("cache-control").iter().collect();
        assert_eq!(values, vec!["no-cache"]);
    }
}
