/// World module lifecycle
///
/// - Registry: one record per module file plus its current surface
/// - Relay: fans host events out to every current surface
/// - Loader: polls the world directory and runs the host loop

pub mod loader;
pub mod registry;
pub mod relay;

// Re-export commonly used types
pub use loader::{is_eligible, Loader, ScanReport};
pub use registry::{ModuleRecord, ModuleRegistry, ModuleState, SurfaceTable};
pub use relay::EventRelay;
