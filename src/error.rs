/// Error types for the world module host
///
/// Every failure a module can cause is converted into one of these variants
/// at the module or handler boundary; none of them is allowed to escape the
/// host loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for host operations
#[derive(Error, Debug)]
pub enum HostError {
    // ========================================
    // Directory / Scan Errors
    // ========================================

    #[error("World directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to scan {path}: {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read module '{module}': {source}")]
    ModuleRead {
        module: String,
        #[source]
        source: std::io::Error,
    },

    // ========================================
    // Script Errors
    // ========================================

    #[error("Module '{module}' failed to evaluate: {detail}")]
    Evaluation {
        module: String,
        detail: String,
    },

    #[error("Module '{module}' failed while handling '{target}': {detail}")]
    Handler {
        module: String,
        target: String,
        detail: String,
    },

    #[error("Lua script error: {0}")]
    LuaError(String),

    // ========================================
    // Artifact Errors
    // ========================================

    #[error("Artifact I/O failed for {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ========================================
    // Validation Errors
    // ========================================

    #[error("Invalid input for field '{field}': {reason}")]
    ValidationError {
        field: String,
        reason: String,
    },

    // ========================================
    // IO / Serialization Errors
    // ========================================

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for host operations
pub type Result<T> = std::result::Result<T, HostError>;

impl From<mlua::Error> for HostError {
    fn from(err: mlua::Error) -> Self {
        HostError::LuaError(err.to_string())
    }
}
