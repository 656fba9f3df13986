/// Per-module log and error artifacts
///
/// Layout under the watched root:
/// - `.logs/<file>`: truncated on every (re)load, appended by `log`/`print`
/// - `.errors/<file>`: present only while the latest load or handler failed

use crate::error::{HostError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory holding error artifacts
pub const ERRORS_DIR: &str = ".errors";

/// Directory holding log artifacts
pub const LOGS_DIR: &str = ".logs";

/// Artifact directories of one watched root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create `.errors` and `.logs` if they are missing
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [ERRORS_DIR, LOGS_DIR] {
            let path = self.root.join(dir);
            if !path.is_dir() {
                debug!("Creating artifact directory {}", path.display());
                fs::create_dir_all(&path).map_err(|source| HostError::Artifact { path, source })?;
            }
        }
        Ok(())
    }

    pub fn error_path(&self, module: &str) -> PathBuf {
        self.root.join(ERRORS_DIR).join(module)
    }

    pub fn log_path(&self, module: &str) -> PathBuf {
        self.root.join(LOGS_DIR).join(module)
    }

    /// Artifact handle for one module
    pub fn for_module(&self, module: &str) -> ModuleArtifacts {
        ModuleArtifacts {
            module: module.to_string(),
            log_path: self.log_path(module),
            error_path: self.error_path(module),
        }
    }
}

/// Log and error files of a single module
#[derive(Debug, Clone)]
pub struct ModuleArtifacts {
    module: String,
    log_path: PathBuf,
    error_path: PathBuf,
}

impl ModuleArtifacts {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    /// Empty the log file, creating it if needed
    pub fn truncate_log(&self) -> Result<()> {
        fs::write(&self.log_path, "").map_err(|source| self.artifact_error(&self.log_path, source))
    }

    /// Append one line to the log file
    pub fn append_log(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|source| self.artifact_error(&self.log_path, source))?;
        writeln!(file, "{}", line).map_err(|source| self.artifact_error(&self.log_path, source))
    }

    /// Replace the error artifact with `detail`
    pub fn write_error(&self, detail: &str) -> Result<()> {
        debug!("Writing error artifact for '{}'", self.module);
        fs::write(&self.error_path, detail)
            .map_err(|source| self.artifact_error(&self.error_path, source))
    }

    /// Remove the error artifact; returns whether one existed
    pub fn clear_error(&self) -> Result<bool> {
        match fs::remove_file(&self.error_path) {
            Ok(()) => {
                debug!("Cleared error artifact for '{}'", self.module);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.artifact_error(&self.error_path, source)),
        }
    }

    /// Current error artifact contents, if any
    pub fn read_error(&self) -> Option<String> {
        fs::read_to_string(&self.error_path).ok()
    }

    /// Log an artifact failure without interrupting the caller
    pub(crate) fn report(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!("Artifact write for '{}' failed: {}", self.module, e);
        }
    }

    fn artifact_error(&self, path: &Path, source: std::io::Error) -> HostError {
        HostError::Artifact {
            path: path.to_path_buf(),
            source,
        }
    }
}
