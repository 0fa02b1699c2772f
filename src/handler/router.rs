//! Request dispatch module
//!
//! Entry point for HTTP request processing: method validation, then static
//! file serving, with failures turned into status responses.

use crate::config::AppState;
use crate::error::ServeError;
use crate::handler::static_files;
use crate::http;
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::http::request::Parts;
use hyper::{Method, Request, Response};
use std::sync::Arc;

/// Request context encapsulating information needed for request processing
pub struct RequestContext<'a> {
    /// Raw (still percent-encoded) request path
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub is_head: bool,
    pub if_modified_since: Option<String>,
    pub has_if_none_match: bool,
}

impl<'a> RequestContext<'a> {
    pub fn from_parts(parts: &'a Parts) -> Self {
        let headers = &parts.headers;
        Self {
            path: parts.uri.path(),
            query: parts.uri.query(),
            is_head: parts.method == Method::HEAD,
            if_modified_since: headers
                .get("if-modified-since")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
            has_if_none_match: headers.contains_key("if-none-match"),
        }
    }
}

/// Main entry point for HTTP request handling
///
/// Never fails: every error becomes an HTTP status response. The request
/// body is dropped unread since only GET and HEAD are served.
pub async fn handle_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    if let Some(resp) = check_http_method(req.method()) {
        return resp;
    }

    let (parts, body) = req.into_parts();
    drop(body);
    let ctx = RequestContext::from_parts(&parts);
    match static_files::serve_path(&ctx, &state).await {
        Ok(resp) => resp,
        Err(err) => error_response(&err, ctx.is_head),
    }
}

/// Reject everything but GET and HEAD
fn check_http_method(method: &Method) -> Option<Response<Full<Bytes>>> {
    match *method {
        Method::GET | Method::HEAD => None,
        _ => {
            logger::log_warning(&format!("Unsupported method: {method}"));
            Some(http::build_501_response())
        }
    }
}

fn error_response(err: &ServeError, is_head: bool) -> Response<Full<Bytes>> {
    match err {
        ServeError::NotFound => {}
        ServeError::Io(_) => logger::log_error(&err.to_string()),
        _ => logger::log_warning(&err.to_string()),
    }
    http::build_error_response(err.status(), is_head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http_body_util::BodyExt;
    use std::path::PathBuf;

    fn scratch_state(name: &str) -> (Arc<AppState>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("corserve-router-{name}-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        std::fs::create_dir_all(dir.join("site")).unwrap();
        std::fs::write(dir.join("hello.txt"), "hi").unwrap();
        std::fs::write(dir.join("site/index.html"), "<h1>site</h1>").unwrap();
        std::fs::write(dir.join("docs/a.md"), "# a").unwrap();

        let mut cfg = Config::load_from("does-not-exist/corserve").unwrap();
        cfg.server.root = dir.to_string_lossy().into_owned();
        (Arc::new(AppState::new(&cfg).unwrap()), dir)
    }

    fn get(path: &str) -> Request<()> {
        Request::get(path).body(()).unwrap()
    }

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn test_serves_file() {
        let (state, dir) = scratch_state("file");
        let resp = handle_request(get("/hello.txt"), state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-length"], "2");
        assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
        assert!(resp.headers().contains_key("last-modified"));
        assert_eq!(body_string(resp).await, "hi");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_is_404() {
        let (state, dir) = scratch_state("missing");
        let resp = handle_request(get("/nope.txt"), Arc::clone(&state)).await;
        assert_eq!(resp.status(), 404);
        let resp = handle_request(get("/hello.txt/"), state).await;
        assert_eq!(resp.status(), 404);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_directory_index_and_redirect() {
        let (state, dir) = scratch_state("index");
        let resp = handle_request(get("/site/"), Arc::clone(&state)).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_string(resp).await, "<h1>site</h1>");

        let resp = handle_request(get("/site?x=1"), state).await;
        assert_eq!(resp.status(), 301);
        assert_eq!(resp.headers()["location"], "/site/?x=1");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_redirect_stays_on_this_host() {
        let (state, dir) = scratch_state("redirect-host");
        for target in ["//site", "///site?x=1"] {
            let resp = handle_request(get(target), Arc::clone(&state)).await;
            assert_eq!(resp.status(), 301, "{target}");
            let location = resp.headers()["location"].to_str().unwrap();
            assert!(location.starts_with("/site/"), "{target} -> {location}");
            assert!(!location.starts_with("//"), "{target} -> {location}");
        }
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let (state, dir) = scratch_state("listing");
        let resp = handle_request(get("/docs/"), state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/html; charset=utf-8");
        let body = body_string(resp).await;
        assert!(body.contains("Directory listing for /docs/"));
        assert!(body.contains("<a href=\"a.md\">a.md</a>"));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_listing_disabled_is_403() {
        let (state, dir) = scratch_state("nolisting");
        let mut cfg = state.config.clone();
        cfg.http.directory_listing = false;
        let state = Arc::new(AppState::new(&cfg).unwrap());
        let resp = handle_request(get("/docs/"), state).await;
        assert_eq!(resp.status(), 403);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let (state, dir) = scratch_state("method");
        let req = Request::post("/hello.txt").body(()).unwrap();
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), 501);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let (state, dir) = scratch_state("head");
        let req = Request::head("/hello.txt").body(()).unwrap();
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-length"], "2");
        assert_eq!(body_string(resp).await, "");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_conditional_get() {
        let (state, dir) = scratch_state("conditional");
        let resp = handle_request(get("/hello.txt"), Arc::clone(&state)).await;
        let last_modified = resp.headers()["last-modified"].to_str().unwrap().to_string();

        let req = Request::get("/hello.txt")
            .header("If-Modified-Since", &last_modified)
            .body(())
            .unwrap();
        let resp = handle_request(req, Arc::clone(&state)).await;
        assert_eq!(resp.status(), 304);
        assert!(resp.headers().get("last-modified").is_none());

        let req = Request::get("/hello.txt")
            .header("If-Modified-Since", &last_modified)
            .header("If-None-Match", "\"abc\"")
            .body(())
            .unwrap();
        let resp = handle_request(req, state).await;
        assert_eq!(resp.status(), 200);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_traversal_stays_in_root() {
        let (state, dir) = scratch_state("traversal");
        let resp = handle_request(get("/../hello.txt"), Arc::clone(&state)).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_string(resp).await, "hi");

        let resp = handle_request(get("/%2e%2e/%2e%2e/etc/passwd"), state).await;
        assert_eq!(resp.status(), 404);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_403() {
        use std::os::unix::fs::PermissionsExt;

        let (state, dir) = scratch_state("unreadable");
        let locked = dir.join("locked.txt");
        std::fs::write(&locked, "secret").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not stop root
        if std::fs::File::open(&locked).is_ok() {
            std::fs::remove_dir_all(dir).unwrap();
            return;
        }

        let resp = handle_request(get("/locked.txt"), state).await;
        assert_eq!(resp.status(), 403);
        assert_eq!(resp.headers()["content-type"], "text/html; charset=utf-8");
        assert!(body_string(resp).await.contains("403 Forbidden"));

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_other_io_error_is_500() {
        let (state, dir) = scratch_state("io-error");
        // Longer than NAME_MAX, so the lookup fails with ENAMETOOLONG
        let target = format!("/{}", "a".repeat(300));
        let resp = handle_request(get(&target), state).await;
        assert_eq!(resp.status(), 500);
        assert!(body_string(resp).await.contains("500 Internal Server Error"));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_blocked() {
        let (state, dir) = scratch_state("symlink");
        let outside = std::env::temp_dir().join(format!("corserve-outside-{}", std::process::id()));
        std::fs::write(&outside, "secret").unwrap();
        std::os::unix::fs::symlink(&outside, dir.join("leak.txt")).unwrap();

        let resp = handle_request(get("/leak.txt"), state).await;
        assert_eq!(resp.status(), 404);
        std::fs::remove_dir_all(dir).unwrap();
        std::fs::remove_file(outside).unwrap();
    }
}
