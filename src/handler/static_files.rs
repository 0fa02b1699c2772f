//! Static file serving module
//!
//! Maps request paths onto the serving root, then serves files, index files
//! or generated directory listings.

use crate::config::AppState;
use crate::error::ServeError;
use crate::handler::router::RequestContext;
use crate::http::{self, cache, mime};
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Characters left unescaped in listing links (RFC 3986 unreserved plus `/`)
const LINK_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Serve whatever the request path names under the serving root
pub async fn serve_path(
    ctx: &RequestContext<'_>,
    state: &AppState,
) -> Result<Response<Full<Bytes>>, ServeError> {
    let (relative, trailing_slash) = translate_path(ctx.path)?;
    let path = confine(&state.root, &state.root.join(&relative)).await?;
    let meta = fs::metadata(&path).await?;

    if meta.is_dir() {
        if !trailing_slash {
            return Ok(http::build_directory_redirect(&redirect_location(ctx)));
        }
        for index in &state.config.http.index_files {
            let Ok(candidate) = confine(&state.root, &path.join(index)).await else {
                continue;
            };
            if let Ok(index_meta) = fs::metadata(&candidate).await {
                if index_meta.is_file() {
                    return serve_file(ctx, &candidate, &index_meta).await;
                }
            }
        }
        if !state.config.http.directory_listing {
            return Err(ServeError::Forbidden);
        }
        return list_directory(ctx, &path).await;
    }

    // A trailing slash promises a directory
    if trailing_slash {
        return Err(ServeError::NotFound);
    }
    serve_file(ctx, &path, &meta).await
}

/// Translate a URL path into a path relative to the serving root
///
/// The path is percent-decoded, then normalized: empty and `.` segments are
/// dropped and `..` removes the previous segment but never climbs above the
/// root. Returns the relative path and whether the decoded path ended in `/`.
pub fn translate_path(url_path: &str) -> Result<(PathBuf, bool), ServeError> {
    if !url_path.starts_with('/') {
        return Err(ServeError::BadRequest("request target is not a path"));
    }
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|_| ServeError::BadRequest("path is not valid UTF-8"))?;
    if decoded.contains('\0') {
        return Err(ServeError::BadRequest("path contains NUL"));
    }
    let trailing_slash = decoded.trim_end().ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    Ok((segments.iter().collect(), trailing_slash))
}

/// Resolve symlinks and make sure the result stays inside `root`
async fn confine(root: &Path, path: &Path) -> Result<PathBuf, ServeError> {
    let canonical = fs::canonicalize(path).await?;
    if canonical.starts_with(root) {
        Ok(canonical)
    } else {
        logger::log_warning(&format!(
            "Path traversal attempt blocked: {} -> {}",
            path.display(),
            canonical.display()
        ));
        Err(ServeError::NotFound)
    }
}

/// Request path plus `/`, query preserved
///
/// Leading slashes collapse to one so the target can never read as a
/// protocol-relative `//host/` URL.
fn redirect_location(ctx: &RequestContext<'_>) -> String {
    let path = ctx.path.trim_start_matches('/');
    match ctx.query {
        Some(q) => format!("/{path}/?{q}"),
        None => format!("/{path}/"),
    }
}

async fn serve_file(
    ctx: &RequestContext<'_>,
    path: &Path,
    meta: &Metadata,
) -> Result<Response<Full<Bytes>>, ServeError> {
    let modified = meta.modified().ok();
    let last_modified = modified.map(cache::format_http_date);

    if let Some(mtime) = modified {
        if cache::is_not_modified(ctx.if_modified_since.as_deref(), ctx.has_if_none_match, mtime) {
            return Ok(http::build_304_response());
        }
    }

    let content = fs::read(path).await.map_err(|e| {
        logger::log_error(&format!("Failed to read file '{}': {e}", path.display()));
        ServeError::from(e)
    })?;

    Ok(http::build_file_response(
        Bytes::from(content),
        mime::content_type_for(path),
        last_modified.as_deref(),
        ctx.is_head,
    ))
}

/// A single directory listing row
struct ListingEntry {
    name: String,
    is_dir: bool,
    is_symlink: bool,
}

async fn list_directory(
    ctx: &RequestContext<'_>,
    dir: &Path,
) -> Result<Response<Full<Bytes>>, ServeError> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let file_type = entry.file_type().await?;
        let is_symlink = file_type.is_symlink();
        let is_dir = if is_symlink {
            fs::metadata(entry.path()).await.is_ok_and(|m| m.is_dir())
        } else {
            file_type.is_dir()
        };
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            is_symlink,
        });
    }
    entries.sort_by_cached_key(|e| e.name.to_lowercase());

    let display_path = percent_decode_str(ctx.path).decode_utf8_lossy();
    let html = render_listing(&display_path, &entries);
    Ok(http::build_file_response(
        Bytes::from(html),
        "text/html; charset=utf-8",
        None,
        ctx.is_head,
    ))
}

fn render_listing(display_path: &str, entries: &[ListingEntry]) -> String {
    let title = format!("Directory listing for {}", escape_html(display_path));
    let mut html = format!(
        "<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<hr>\n<ul>\n"
    );
    for entry in entries {
        let mut link = entry.name.clone();
        let mut label = entry.name.clone();
        if entry.is_dir {
            link.push('/');
            label.push('/');
        }
        if entry.is_symlink {
            label = format!("{}@", entry.name);
        }
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            utf8_percent_encode(&link, LINK_ESCAPE),
            escape_html(&label)
        ));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    html
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_simple() {
        let (path, slash) = translate_path("/hello.txt").unwrap();
        assert_eq!(path, PathBuf::from("hello.txt"));
        assert!(!slash);

        let (path, slash) = translate_path("/").unwrap();
        assert_eq!(path, PathBuf::new());
        assert!(slash);
    }

    #[test]
    fn test_translate_decodes() {
        let (path, slash) = translate_path("/my%20docs/a%2Bb.txt").unwrap();
        assert_eq!(path, PathBuf::from("my docs/a+b.txt"));
        assert!(!slash);
    }

    #[test]
    fn test_translate_never_climbs_above_root() {
        let (path, _) = translate_path("/../../etc/passwd").unwrap();
        assert_eq!(path, PathBuf::from("etc/passwd"));

        let (path, _) = translate_path("/a/./b/../c").unwrap();
        assert_eq!(path, PathBuf::from("a/c"));

        let (path, _) = translate_path("/%2e%2e/secret").unwrap();
        assert_eq!(path, PathBuf::from("secret"));
    }

    #[test]
    fn test_translate_rejects_bad_targets() {
        assert!(matches!(translate_path("*"), Err(ServeError::BadRequest(_))));
        assert!(matches!(translate_path("/%ff"), Err(ServeError::BadRequest(_))));
        assert!(matches!(translate_path("/a%00b"), Err(ServeError::BadRequest(_))));
    }

    #[test]
    fn test_translate_trailing_slash() {
        let (path, slash) = translate_path("/assets/").unwrap();
        assert_eq!(path, PathBuf::from("assets"));
        assert!(slash);
    }

    #[test]
    fn test_render_listing() {
        let entries = vec![
            ListingEntry { name: "a b.txt".into(), is_dir: false, is_symlink: false },
            ListingEntry { name: "assets".into(), is_dir: true, is_symlink: false },
            ListingEntry { name: "<x>".into(), is_dir: false, is_symlink: true },
        ];
        let html = render_listing("/test/", &entries);
        assert!(html.contains("<title>Directory listing for /test/</title>"));
        assert!(html.contains("<a href=\"a%20b.txt\">a b.txt</a>"));
        assert!(html.contains("<a href=\"assets/\">assets/</a>"));
        assert!(html.contains("<a href=\"%3Cx%3E\">&lt;x&gt;@</a>"));
        assert!(html.find("a b.txt") < html.find("assets/"));
    }
}
