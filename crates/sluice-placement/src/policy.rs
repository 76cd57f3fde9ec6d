//! Pre-transfer admission policy: name sanitisation and the filename/size
//! screen applied before a payload enters `temp/`.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{PlacementError, PlacementResult};

/// Filenames matching these patterns are quarantined rather than staged.
const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "*.exe", "*.com", "*.scr", "*.bat", "*.cmd", "*.msi", "*.dll", "*.vbs",
];

const MAX_NAME_LEN: usize = 200;

/// Verdict of the pre-transfer screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenVerdict {
    /// Payload may be staged.
    Clean,
    /// Payload is rejected outright (size or name policy violation).
    Reject(&'static str),
    /// Payload is moved to the errors directory for operator review.
    Quarantine(&'static str),
}

/// Compiled filename policy.
#[derive(Debug)]
pub struct NamePolicy {
    deny: GlobSet,
    max_file_size: i64,
}

impl NamePolicy {
    /// Compile the default deny patterns with the given size ceiling.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new(max_file_size: i64) -> PlacementResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_DENY_PATTERNS {
            let glob = Glob::new(pattern).map_err(|source| PlacementError::Glob {
                pattern: (*pattern).to_string(),
                source,
            })?;
            builder.add(glob);
        }
        let deny = builder.build().map_err(|source| PlacementError::Glob {
            pattern: "<deny set>".to_string(),
            source,
        })?;
        Ok(Self {
            deny,
            max_file_size,
        })
    }

    /// Screen a payload before it is staged.
    ///
    /// `declared_size` is what the uplink announced; `actual_size` is what
    /// landed on disk.
    #[must_use]
    pub fn screen(&self, file_name: &str, declared_size: i64, actual_size: i64) -> ScreenVerdict {
        if declared_size > self.max_file_size || actual_size > self.max_file_size {
            return ScreenVerdict::Reject("file exceeds the size ceiling");
        }
        if actual_size == 0 {
            return ScreenVerdict::Reject("file is empty");
        }
        if declared_size > 0 && actual_size != declared_size {
            return ScreenVerdict::Reject("file size does not match the declared size");
        }
        if file_name.is_empty() || file_name.len() > MAX_NAME_LEN {
            return ScreenVerdict::Reject("file name is missing or too long");
        }
        if self.deny.is_match(&file_name.to_ascii_lowercase()) {
            return ScreenVerdict::Quarantine("file name matches a blocked pattern");
        }
        ScreenVerdict::Clean
    }
}

/// Reduce an uplink-supplied filename to a single safe path component.
///
/// Path separators and parent references are stripped, control characters are
/// dropped, and overlong names are truncated while keeping the extension.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .trim_start_matches('.');

    let mut cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        cleaned = "payload".to_string();
    }

    if cleaned.len() > MAX_NAME_LEN {
        let extension = cleaned
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{ext}"))
            .unwrap_or_default();
        let keep = MAX_NAME_LEN.saturating_sub(extension.len());
        let stem: String = cleaned.chars().take(keep).collect();
        cleaned = format!("{stem}{extension}");
    }

    cleaned
}
