//! Request classification by method and file extension.

use http::Method;

/// Suffixes of resources that are never served the shell document.
const STATIC_SUFFIXES: &[&str] = &[
    // Data and code
    "json", "js", "mjs", "wasm", "css",
    // Fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // Images
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp",
];

/// Shape of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// A file with a known static-resource suffix.
    Static,
    /// Anything else; handled by client-side routing.
    Navigational,
}

/// Classify a URL path. Query and fragment are ignored.
pub fn classify(path: &str) -> RequestClass {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();

    match file.rsplit_once('.') {
        Some((_, ext))
            if STATIC_SUFFIXES
                .iter()
                .any(|suffix| suffix.eq_ignore_ascii_case(ext)) =>
        {
            RequestClass::Static
        }
        _ => RequestClass::Navigational,
    }
}

/// Only `GET` responses are ever read from or written to the cache.
pub fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET
}
