//! Capture configuration: the INI-like pattern file that drives traversal.

use crate::error::Error;
use crate::pattern::{self, PatternList};
use crate::Result;

/// Configuration used when the caller supplies none. Mirrors the stock
/// Windows capture exclusions.
pub const DEFAULT_CAPTURE_CONFIG: &str = "[ExclusionList]\n\
\\$ntfs.log\n\
\\hiberfil.sys\n\
\\pagefile.sys\n\
\\System Volume Information\n\
\\RECYCLER\n\
\\Windows\\CSC\n\
[CompressionExclusionList]\n\
*.mp3\n\
*.zip\n\
*.cab\n\
\\WINDOWS\\inf\\*.pnf\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Exclusion,
    ExclusionException,
    CompressionExclusion,
    Alignment,
}

/// Parsed capture configuration: four pattern lists plus the capture prefix
/// (the filesystem path currently being captured, stripped before matching).
#[derive(Debug, Default)]
pub struct CaptureConfig {
    pub exclusion: PatternList,
    pub exclusion_exception: PatternList,
    pub compression_exclusion: PatternList,
    pub alignment: PatternList,
    prefix: String,
}

impl CaptureConfig {
    /// Parses configuration text. Lines are `\n`-separated with an optional
    /// trailing `\r`; the final line needs no terminator. Empty lines are
    /// skipped. A `[Section]` line selects the list that subsequent patterns
    /// are appended to; patterns are canonicalised (backslashes to slashes,
    /// drive-letter prefix removed) but otherwise kept verbatim.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut current: Option<Section> = None;

        for raw in text.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = Some(match &line[1..line.len() - 1] {
                    "ExclusionList" => Section::Exclusion,
                    "ExclusionException" => Section::ExclusionException,
                    "CompressionExclusionList" => Section::CompressionExclusion,
                    "AlignmentList" => Section::Alignment,
                    other => {
                        return Err(Error::InvalidCaptureConfig(format!(
                            "unknown section [{other}]"
                        )))
                    }
                });
                continue;
            }
            let Some(section) = current else {
                return Err(Error::InvalidCaptureConfig(format!(
                    "pattern {line:?} appears before any section header"
                )));
            };
            let pattern = pattern::canonicalize(line);
            match section {
                Section::Exclusion => config.exclusion.push(pattern)?,
                Section::ExclusionException => config.exclusion_exception.push(pattern)?,
                Section::CompressionExclusion => config.compression_exclusion.push(pattern)?,
                Section::Alignment => config.alignment.push(pattern)?,
            }
        }
        Ok(config)
    }

    /// The embedded default configuration.
    pub fn default_config() -> Self {
        Self::parse(DEFAULT_CAPTURE_CONFIG).expect("embedded default config is well-formed")
    }

    /// Sets the capture prefix stripped from paths before exclusion matching.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = pattern::canonicalize(prefix);
        while self.prefix.len() > 1 && self.prefix.ends_with('/') {
            self.prefix.pop();
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True iff `path` matches the exclusion list and no exclusion exception.
    pub fn exclude_path(&self, path: &str, strip_prefix: bool) -> bool {
        let p = if strip_prefix {
            pattern::strip_prefix(path, &self.prefix)
        } else {
            path
        };
        self.exclusion.matches(p) && !self.exclusion_exception.matches(p)
    }

    /// True iff the stream at `path` should be stored uncompressed.
    pub fn compression_excluded(&self, path: &str) -> bool {
        self.compression_exclusion
            .matches(pattern::strip_prefix(path, &self.prefix))
    }
}
