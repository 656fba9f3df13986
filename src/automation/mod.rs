/// Scheduled behavior: clocks, module timers and item spawns
///
/// - Clock: wall-clock or manually driven time in seconds
/// - Timers: one-shot `setTimeout` callbacks shared by all modules
/// - Spawns: per-room item respawn rules checked on every `tick`

pub mod clock;
pub mod spawns;
pub mod timers;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use spawns::{SpawnKey, SpawnRule, SpawnScheduler, SpawnTable, DEFAULT_RESPAWN_SECS};
pub use timers::{TimerId, TimerQueue, TimerTask};
