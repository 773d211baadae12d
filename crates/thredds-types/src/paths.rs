//! URL/path string helpers.
//!
//! Catalog keys, BES resource ids and service bases are all slash-separated
//! strings that get concatenated in several places; these helpers keep the
//! joins consistent.

/// Join a service base and a location.
///
/// If the base ends in `/` and the location starts with `/`, one slash is
/// dropped; if neither has a slash, one is inserted; otherwise the two are
/// concatenated as-is.
pub fn join_root_path(base: &str, location: &str) -> String {
    match (base.ends_with('/'), location.starts_with('/')) {
        (true, true) => format!("{}{}", base, &location[1..]),
        (false, false) => format!("{}/{}", base, location),
        _ => format!("{}{}", base, location),
    }
}

/// Join two path pieces with exactly one slash between them.
pub fn path_append(left: &str, right: &str) -> String {
    if left.is_empty() {
        return right.to_string();
    }
    if right.is_empty() {
        return left.to_string();
    }
    format!(
        "{}/{}",
        left.trim_end_matches('/'),
        right.trim_start_matches('/')
    )
}

/// Ensure a trailing slash.
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Everything after the last `/`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything up to and including the last `/` (empty when there is none).
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// True for `http://` and `https://` references.
pub fn is_remote(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve `.` and `..` segments, collapsing repeated slashes. Leading and
/// trailing slashes are kept; `..` above the first segment is dropped.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let mut out = parts.join("/");
    let is_dir = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if is_dir && !out.is_empty() {
        out.push('/');
    }
    if path.starts_with('/') {
        out.insert(0, '/');
    }
    out
}
