/// Core host types
///
/// The game tables, the host emitter and the shared handle modules use to
/// reach both.

pub mod events;
pub mod game;
pub mod host;

// Re-export commonly used types
pub use events::{EventHub, EventKey, GameEvent, Notice, NoticeBus, NoticeLevel};
pub use game::{Command, CommandAction, CommandCall, CommandKey, Game, GameHost, Item, Player, Room, RoomSpec};
pub use host::{Host, SharedGame};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// A panicking script callback must not take the host tables down with it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
