//! Path canonicalisation and glob-pattern matching for capture
//! configurations.
//!
//! Patterns use POSIX glob syntax (`*`, `?`, `[...]`) with `/` as the path
//! separator. Matching is path-aware (wildcards never cross a separator) and
//! case-insensitive, mirroring NTFS name semantics.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::Error;
use crate::Result;

/// Normalises one pattern or path string: backslashes become forward slashes
/// and a leading drive-letter prefix (`C:`) is removed.
pub fn canonicalize(s: &str) -> String {
    let s = s.replace('\\', "/");
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        s[2..].to_string()
    } else {
        s
    }
}

/// Normalises a branch target path: canonicalised, with leading and trailing
/// slashes stripped, so the image root is the empty string.
pub fn canonicalize_target(s: &str) -> String {
    canonicalize(s).trim_matches('/').to_string()
}

/// Strips the capture prefix from an absolute path, keeping the leading
/// slash, so patterns written against the filesystem root apply regardless of
/// where the source tree is mounted.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() || prefix == "/" {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// How one pattern is compared against a candidate path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchScope {
    /// Pattern starts with `/`: compared against the full path.
    FullPath,
    /// Pattern contains `/` elsewhere: compared against the path without its
    /// leading slash.
    Subpath,
    /// No separator at all: compared against the basename.
    Basename,
}

struct CompiledPattern {
    scope: MatchScope,
    matcher: GlobMatcher,
}

/// An ordered list of glob patterns, compiled once.
#[derive(Default)]
pub struct PatternList {
    patterns: Vec<String>,
    compiled: Vec<CompiledPattern>,
}

impl PatternList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one canonicalised pattern to the list.
    pub fn push(&mut self, pattern: String) -> Result<()> {
        let scope = if pattern.starts_with('/') {
            MatchScope::FullPath
        } else if pattern.contains('/') {
            MatchScope::Subpath
        } else {
            MatchScope::Basename
        };
        let glob = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .case_insensitive(true)
            .backslash_escape(false)
            .build()
            .map_err(|e| Error::InvalidCaptureConfig(format!("bad pattern {pattern:?}: {e}")))?;
        self.compiled.push(CompiledPattern {
            scope,
            matcher: glob.compile_matcher(),
        });
        self.patterns.push(pattern);
        Ok(())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Tests an absolute (`/`-rooted) path against every pattern in the list.
    pub fn matches(&self, path: &str) -> bool {
        let relative = path.strip_prefix('/').unwrap_or(path);
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.compiled.iter().any(|p| {
            let candidate = match p.scope {
                MatchScope::FullPath => path,
                MatchScope::Subpath => relative,
                MatchScope::Basename => basename,
            };
            p.matcher.is_match(candidate)
        })
    }
}

impl std::fmt::Debug for PatternList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternList")
            .field("patterns", &self.patterns)
            .finish()
    }
}
