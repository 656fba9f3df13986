/// Lua scripting for world modules
///
/// Each module is evaluated in its own sandboxed Lua 5.4 state whose
/// globals are the capability surface (the world DSL).

pub mod emitter;
pub mod sandbox;
pub mod surface;

// Re-export main types
pub use emitter::{Dispatch, Handler, ModuleEmitter, SubscriptionId};
pub use sandbox::{safe_state, SandboxRuntime, Watchdog, WatchdogGuard};
pub use surface::{CapabilitySurface, SurfaceContext, MODULE_LOG_TARGET};
