//! Helpers for hierarchical namespace paths.
//!
//! Paths are `/`-separated, absolute, and never carry a trailing slash after
//! normalization (the root itself is `"/"`). Sequential entries end in a
//! zero-padded counter which [`sequence_suffix`] extracts.

/// Normalize a path: ensure a leading `/`, strip any trailing `/`.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Split a path into its parent and final component.
///
/// Returns `None` for the root. A trailing slash yields an empty final
/// component, which is how sequential creates express an empty name prefix.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// All proper ancestors of `path`, shallowest first, excluding the root.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.len() < 2 {
        return out;
    }
    for component in &components[..components.len() - 1] {
        current.push('/');
        current.push_str(component);
        out.push(current.clone());
    }
    out
}

/// Extract the service-assigned sequence counter from an entry name.
///
/// The counter is the trailing run of ASCII digits; names without one are
/// not sequential entries.
pub fn sequence_suffix(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
