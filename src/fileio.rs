//! Save-file management: extension normalization, atomic writes, and
//! recovery when the destination is locked.
//!
//! The actual file contents are produced by a caller-supplied `onsave`
//! closure; this module only manages where and how safely they land on disk.
//! When the destination cannot be written because it is in use, an optional
//! `resolve` callback may supply an alternate path (for example by prompting
//! the user); returning `None` cancels the save.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::TEMPFILE_PREFIX;

/// Writes the file contents to the given path.
pub type SaveFn = Box<dyn FnMut(&Path) -> Result<()> + Send>;

/// Supplies an alternate destination when the suggested one cannot be
/// written, or `None` to cancel the save.
pub type ResolveFn = Box<dyn FnMut(&Path) -> Option<PathBuf> + Send>;

/// A file type the save manager knows about.
///
/// The first registered filter provides the default extension appended to
/// destinations whose extension is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    /// Extension without the leading dot, e.g. `"png"`.
    pub extension: String,
    /// Human-readable description, e.g. `"Portable Network Graphics"`.
    pub description: String,
}

impl NameFilter {
    pub fn new(extension: impl Into<String>, description: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            description: description.into(),
        }
    }
}

/// A manager to save files.
pub struct SaveManager {
    filters: Vec<NameFilter>,
    onsave: SaveFn,
    resolve: Option<ResolveFn>,
    atomic: bool,
}

impl SaveManager {
    /// Create a save manager that writes through `onsave`.
    pub fn new(filters: Vec<NameFilter>, onsave: SaveFn) -> Self {
        Self {
            filters,
            onsave,
            resolve: None,
            atomic: false,
        }
    }

    /// Install the callback used to pick an alternate destination when the
    /// current one cannot be written.
    pub fn with_resolver(mut self, resolve: ResolveFn) -> Self {
        self.resolve = Some(resolve);
        self
    }

    /// Enable or disable atomic saving (write to a sibling temp file, then
    /// rename over the destination).
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Save to the provided path.
    ///
    /// Returns the path the file was actually saved to, `Ok(None)` if the
    /// save was cancelled through the resolver, or an error for any failure
    /// other than the destination being locked.
    pub fn save_file(&mut self, filename: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let mut filename = filename.as_ref().to_path_buf();
        loop {
            match self.try_save(&filename) {
                Ok(()) => {
                    info!("saved {}", filename.display());
                    return Ok(Some(filename));
                }
                Err(e) if is_permission_denied(&e) => {
                    warn!(
                        "save target {} is in use or not writable",
                        filename.display()
                    );
                    match self.resolve_new_name(&filename) {
                        Some(new_name) => filename = new_name,
                        None => {
                            info!("save cancelled");
                            return Ok(None);
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to save {}", filename.display()));
                }
            }
        }
    }

    /// Save to a new destination resolved from the suggested path.
    pub fn save_file_as(&mut self, filename: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        match self.resolve_new_name(filename.as_ref()) {
            Some(new_name) => self.save_file(new_name),
            None => {
                info!("save cancelled");
                Ok(None)
            }
        }
    }

    fn try_save(&mut self, filename: &Path) -> Result<()> {
        if !self.atomic {
            return (self.onsave)(filename);
        }

        let tempname = self.valid_tempname(filename);
        debug!("writing through temp file {}", tempname.display());
        let result = (self.onsave)(&tempname).and_then(|()| {
            std::fs::rename(&tempname, filename).map_err(anyhow::Error::from)
        });
        // The temp file must not outlive the attempt, whatever happened.
        if tempname.exists() {
            let _ = std::fs::remove_file(&tempname);
        }
        result
    }

    /// Pick a sibling temp name that does not exist yet.
    fn valid_tempname(&self, filename: &Path) -> PathBuf {
        let destdir = filename.parent().unwrap_or_else(|| Path::new("."));
        let basename = filename
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        loop {
            let token = Uuid::new_v4().simple().to_string();
            let candidate =
                destdir.join(format!("{}{}_{}", TEMPFILE_PREFIX, &token[..8], basename));
            if !candidate.exists() {
                return candidate;
            }
        }
    }

    /// Append the default extension when the path's extension is not one of
    /// the registered filters.
    fn normalize_filename(&self, filename: &Path) -> PathBuf {
        let extension = filename.extension().and_then(|ext| ext.to_str());
        let known = extension
            .map(|ext| {
                self.filters
                    .iter()
                    .any(|filter| filter.extension.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if known {
            return filename.to_path_buf();
        }
        match self.filters.first() {
            Some(default) => {
                let mut name = filename.as_os_str().to_os_string();
                name.push(".");
                name.push(&default.extension);
                PathBuf::from(name)
            }
            None => filename.to_path_buf(),
        }
    }

    fn resolve_new_name(&mut self, filename: &Path) -> Option<PathBuf> {
        let suggested = self.normalize_filename(filename);
        let resolve = self.resolve.as_mut()?;
        let new_name = resolve(&suggested)?;
        // The resolver may hand back anything; keep the extension honest.
        Some(self.normalize_filename(&new_name))
    }
}

fn is_permission_denied(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
            .unwrap_or(false)
    })
}
