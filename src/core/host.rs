/// Shared handle to the host game and its emitter
///
/// Modules never hold the game lock across a call back into scripts: every
/// method here locks, does its work and releases before any listener runs.

use crate::core::events::{EventHub, GameEvent};
use crate::core::game::{CommandCall, CommandKey, GameHost};
use crate::core::lock;
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Game tables shared by every module
pub type SharedGame = Arc<Mutex<dyn GameHost>>;

/// Cloneable handle bundling the game tables and the host emitter
#[derive(Clone)]
pub struct Host {
    game: SharedGame,
    events: Arc<EventHub>,
}

impl Host {
    /// Wrap a game implementation with a fresh emitter
    pub fn new(game: impl GameHost + 'static) -> Self {
        Self::from_shared(Arc::new(Mutex::new(game)))
    }

    /// Wrap a game and keep a typed handle to it, for callers that need
    /// more than the `GameHost` surface (tests, consoles)
    pub fn new_shared<G: GameHost + 'static>(game: G) -> (Self, Arc<Mutex<G>>) {
        let typed = Arc::new(Mutex::new(game));
        let shared: SharedGame = typed.clone();
        (Self::from_shared(shared), typed)
    }

    pub fn from_shared(game: SharedGame) -> Self {
        Self {
            game,
            events: Arc::new(EventHub::new()),
        }
    }

    /// Lock the game tables
    ///
    /// Do not keep the guard alive across `emit` or `run_command`.
    pub fn game(&self) -> MutexGuard<'_, dyn GameHost + 'static> {
        lock(&self.game)
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn broadcast(&self, message: &str) {
        self.game().broadcast(message);
    }

    pub fn warn(&self, message: &str) {
        self.game().warn(message);
    }

    pub fn error(&self, message: &str) {
        self.game().error(message);
    }

    /// Emit an event synchronously to every listener
    ///
    /// Returns `false` when a listener called `preventDefault` during this
    /// dispatch, meaning the host should skip its default handling. Each
    /// emit has its own flag: a nested emit neither sees nor clears the
    /// flag of the emit that encloses it.
    pub fn emit(&self, event: GameEvent) -> bool {
        let outer = self.game().take_default_prevented();
        debug!("Emitting '{}' with {} arg(s)", event.key, event.args.len());
        self.events.emit(&event);
        let mut game = self.game();
        let prevented = game.take_default_prevented();
        if outer {
            game.prevent_default();
        }
        !prevented
    }

    /// Run a player command line such as `take sword`
    ///
    /// A command bound to `verb item` wins over the bare verb. Returns
    /// `Ok(false)` when no command matches.
    pub fn run_command(&self, player: &str, line: &str) -> Result<bool> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let action = {
            let game = self.game();
            let item_command = (!rest.is_empty())
                .then(|| game.command(&CommandKey::with_item(verb, rest)))
                .flatten();
            match item_command.or_else(|| game.command(&CommandKey::verb(verb))) {
                Some(command) => Arc::clone(&command.action),
                None => {
                    debug!("No command matches '{}'", line);
                    return Ok(false);
                }
            }
        };

        action(&CommandCall {
            player: player.to_string(),
            args: rest.to_string(),
        })?;
        Ok(true)
    }
}
