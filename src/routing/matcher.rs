//! Route matching logic.
//!
//! # Responsibilities
//! - Bring request paths to one canonical form before matching
//! - Match path prefix on segment boundaries
//! - Match exact paths for the login and refresh endpoints
//!
//! # Design Decisions
//! - `/api` matches `/api` and `/api/x`, never `/apix`
//! - Path matching is case-insensitive: upstream frameworks commonly route
//!   `/Auth/Login` to the same handler as `/auth/login`
//! - No regex to guarantee O(n) matching

/// Canonical form of a request path: lowercase, empty and `.` segments
/// dropped, `..` resolved (never above the root), no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s if s.eq_ignore_ascii_case("%2e") => {}
            s if s.eq_ignore_ascii_case("%2e%2e") => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized.make_ascii_lowercase();
    normalized
}

/// Trait for matching request paths against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path matches this condition.
    fn matches(&self, path: &str) -> bool;

    /// Longer matches win among routes of equal priority.
    fn specificity(&self) -> usize;
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. The prefix is normalized like
    /// request paths are; a trailing slash is ignored.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let prefix = normalize_path(prefix.as_ref());
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, path: &str) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(&self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn specificity(&self) -> usize {
        self.prefix.len()
    }
}

/// Matches one path exactly. Expects normalized input, so a trailing slash
/// and letter case make no difference.
#[derive(Debug, Clone)]
pub struct ExactPathMatcher {
    path: String,
}

impl ExactPathMatcher {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
        }
    }
}

impl Matcher for ExactPathMatcher {
    fn matches(&self, path: &str) -> bool {
        path == self.path
    }

    fn specificity(&self) -> usize {
        usize::MAX
    }
}
