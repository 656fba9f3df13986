/// On-disk artifacts kept next to the world modules
///
/// Each module gets a log file and, while broken, an error file. Nothing
/// else is persisted by the host.

pub mod artifacts;

// Re-export commonly used types
pub use artifacts::{ArtifactStore, ModuleArtifacts, ERRORS_DIR, LOGS_DIR};
