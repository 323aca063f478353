//! Open-redirect defense for the `next` query parameter (4.F, property 8).

/// `path` passes through unchanged iff it begins with `/`, does not begin
/// with `//`, does not contain `://`, and does not contain `\`. Anything
/// else collapses to `/`.
pub fn sanitize_redirect_path(path: &str) -> String {
    let safe = path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains("://")
        && !path.contains('\\');

    if safe { path.to_string() } else { "/".to_string() }
}
