//! Helpers for `/`-separated node paths shared by every backend.

use crate::constants::PATH_SEPARATOR;

/// Strip trailing separators and ensure a leading one. The root stays `/`.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return PATH_SEPARATOR.to_string();
    }
    if trimmed.starts_with(PATH_SEPARATOR) {
        trimmed.to_string()
    } else {
        format!("{PATH_SEPARATOR}{trimmed}")
    }
}

pub fn join(
    parent: &str,
    child: &str,
) -> String {
    let parent = normalize(parent);
    let child = child.trim_matches(PATH_SEPARATOR);
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of a node; the parent of a top-level node is `/`.
pub fn parent_of(path: &str) -> String {
    let path = normalize(path);
    match path.rfind(PATH_SEPARATOR) {
        Some(0) | None => PATH_SEPARATOR.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// `<parentOf(service_path)>/<globals_node>`
pub fn globals_path(
    service_path: &str,
    globals_node: &str,
) -> String {
    join(&parent_of(service_path), globals_node)
}

/// Name of `path` relative to `parent` when it is an immediate child.
pub fn child_name<'a>(
    parent: &str,
    path: &'a str,
) -> Option<&'a str> {
    let parent = normalize(parent);
    let rest = if parent == "/" {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(parent.as_str())?.strip_prefix(PATH_SEPARATOR)?
    };
    if rest.is_empty() || rest.contains(PATH_SEPARATOR) {
        None
    } else {
        Some(rest)
    }
}
