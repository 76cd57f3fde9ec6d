//! Resolution of the uplink's on-disk namespace from the bearer secret.
//!
//! The uplink materialises staged payloads under `<base>/<secret>/documents/`
//! and expects this system to stage its own work under `<base>/<secret>/temp/`
//! and `<base>/<secret>/files/…`. The resolver creates the layout with
//! owner-only permissions on first use and hands out read-only accessors
//! afterwards; it never writes payload files itself.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PlacementError, PlacementResult};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const DOCUMENTS: &str = "documents";
const TEMP: &str = "temp";
const FILES: &str = "files";
const FILES_ALL: &str = "all";
const FILES_TXT: &str = "txt";
const FILES_PASS: &str = "pass";
const FILES_NOPASS: &str = "nopass";
const FILES_ERRORS: &str = "errors";

/// Resolved staging directory layout for one uplink namespace.
#[derive(Debug, Clone)]
pub struct StagingPaths {
    root: PathBuf,
    documents: PathBuf,
    temp: PathBuf,
    files: PathBuf,
    files_all: PathBuf,
    files_txt: PathBuf,
    files_pass: PathBuf,
    files_nopass: PathBuf,
    files_errors: PathBuf,
}

impl StagingPaths {
    /// Locate (creating if absent) the staging layout for `secret` under
    /// `base`. The result is cached by construction; call once at bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty or contains path separators,
    /// or if a directory cannot be created.
    pub fn resolve(base: &Path, secret: &str) -> PlacementResult<Self> {
        if secret.trim().is_empty() {
            return Err(PlacementError::InvalidInput {
                field: "secret",
                reason: "empty",
                value: None,
            });
        }
        if secret.contains(['/', '\\']) {
            return Err(PlacementError::InvalidInput {
                field: "secret",
                reason: "path_separator",
                value: None,
            });
        }

        let root = base.join(secret);
        let files = root.join(FILES);
        let paths = Self {
            documents: root.join(DOCUMENTS),
            temp: root.join(TEMP),
            files_all: files.join(FILES_ALL),
            files_txt: files.join(FILES_TXT),
            files_pass: files.join(FILES_PASS),
            files_nopass: files.join(FILES_NOPASS),
            files_errors: files.join(FILES_ERRORS),
            files,
            root,
        };

        for dir in [
            &paths.root,
            &paths.documents,
            &paths.temp,
            &paths.files,
            &paths.files_all,
            &paths.files_txt,
            &paths.files_pass,
            &paths.files_nopass,
            &paths.files_errors,
        ] {
            create_private_dir(dir)?;
        }

        Ok(paths)
    }

    /// Namespace root (`<base>/<secret>`).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inbox the uplink deposits staged payloads into.
    #[must_use]
    pub fn documents(&self) -> &Path {
        &self.documents
    }

    /// This system's own staging directory.
    #[must_use]
    pub fn temp(&self) -> &Path {
        &self.temp
    }

    /// Working directory handed to external tools.
    #[must_use]
    pub fn files(&self) -> &Path {
        &self.files
    }

    /// Archive payloads awaiting extraction.
    #[must_use]
    pub fn files_all(&self) -> &Path {
        &self.files_all
    }

    /// Text payloads and converter output.
    #[must_use]
    pub fn files_txt(&self) -> &Path {
        &self.files_txt
    }

    /// Extractor success output.
    #[must_use]
    pub fn files_pass(&self) -> &Path {
        &self.files_pass
    }

    /// Extractor rejects: password-protected archives.
    #[must_use]
    pub fn files_nopass(&self) -> &Path {
        &self.files_nopass
    }

    /// Quarantine and extractor hard errors.
    #[must_use]
    pub fn files_errors(&self) -> &Path {
        &self.files_errors
    }

    /// The extract-stage directories searched during reconciliation.
    #[must_use]
    pub fn extract_stage_dirs(&self) -> [&Path; 5] {
        [
            &self.files_all,
            &self.files_txt,
            &self.files_pass,
            &self.files_nopass,
            &self.files_errors,
        ]
    }
}

fn create_private_dir(dir: &Path) -> PlacementResult<()> {
    fs::create_dir_all(dir)
        .map_err(|source| PlacementError::io("resolver.create_dir", dir, source))?;

    #[cfg(unix)]
    {
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms)
            .map_err(|source| PlacementError::io("resolver.set_permissions", dir, source))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn resolve_creates_full_layout() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let paths = StagingPaths::resolve(base.path(), "tok123")?;

        assert!(paths.documents().is_dir());
        assert!(paths.temp().is_dir());
        assert!(paths.files_all().is_dir());
        assert!(paths.files_txt().is_dir());
        assert!(paths.files_pass().is_dir());
        assert!(paths.files_nopass().is_dir());
        assert!(paths.files_errors().is_dir());
        assert!(paths.root().ends_with("tok123"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn resolved_directories_are_owner_only() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let paths = StagingPaths::resolve(base.path(), "tok123")?;
        let mode = fs::metadata(paths.documents())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        Ok(())
    }

    #[test]
    fn resolve_rejects_traversal_secrets() {
        let base = tempfile::tempdir().expect("tempdir");
        assert!(StagingPaths::resolve(base.path(), "../escape").is_err());
        assert!(StagingPaths::resolve(base.path(), "").is_err());
    }
}
