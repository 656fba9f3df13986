/// Fan-out of host events to module emitters
///
/// The relay listens on the host's "any event" channel and hands every event
/// to each current surface, in module name order, within the same `emit`
/// call.

use crate::core::events::ListenerId;
use crate::core::{GameEvent, Host};
use crate::modules::registry::SurfaceTable;
use std::sync::Arc;
use tracing::{debug, trace};

/// Subscription of a surface table on the host emitter
pub struct EventRelay {
    host: Host,
    listener: ListenerId,
}

impl EventRelay {
    /// Start forwarding host events to `surfaces`
    pub fn attach(host: &Host, surfaces: SurfaceTable) -> Self {
        let listener = host.events().on_any(Arc::new(move |event: &GameEvent| {
            let targets = surfaces.snapshot();
            trace!("Relaying '{}' to {} module(s)", event.key, targets.len());
            for surface in targets {
                surface.dispatch(event);
            }
        }));

        debug!("Event relay attached");
        Self {
            host: host.clone(),
            listener,
        }
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.host.events().off(self.listener);
        debug!("Event relay detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ManualClock, SpawnTable, TimerQueue};
    use crate::core::{Game, NoticeLevel};
    use crate::modules::registry::ModuleRegistry;
    use crate::persistence::ArtifactStore;
    use crate::scripting::{SandboxRuntime, SurfaceContext};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Host, Arc<Mutex<Game>>, ModuleRegistry) {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        artifacts.ensure_dirs().unwrap();

        let (host, game) = Host::new_shared(Game::new());
        let registry = ModuleRegistry::new(SurfaceContext {
            host: host.clone(),
            spawns: SpawnTable::new(),
            timers: TimerQueue::new(),
            clock: Arc::new(ManualClock::new()),
            artifacts,
            sandbox: SandboxRuntime::default(),
        });
        (dir, host, game, registry)
    }

    #[test]
    fn test_event_reaches_every_module() {
        let (_dir, host, game, mut registry) = setup();
        let _relay = EventRelay::attach(&host, registry.surfaces());

        for name in ["a.lua", "b.lua"] {
            registry.reload(
                name,
                SystemTime::UNIX_EPOCH,
                &format!(
                    r#"handler("say", function(who) broadcast("{} heard " .. who) end)"#,
                    name
                ),
            );
        }

        host.emit(GameEvent::new("say", vec![json!("alice")]));

        assert_eq!(
            game.lock().unwrap().messages(NoticeLevel::Broadcast),
            vec!["a.lua heard alice".to_string(), "b.lua heard alice".to_string()]
        );
    }

    #[test]
    fn test_superseded_surface_stops_receiving() {
        let (_dir, host, game, mut registry) = setup();
        let _relay = EventRelay::attach(&host, registry.surfaces());

        registry.reload(
            "a.lua",
            SystemTime::UNIX_EPOCH,
            r#"handler("say", function() broadcast("old") end)"#,
        );
        registry.reload(
            "a.lua",
            SystemTime::now(),
            r#"handler("say", function() broadcast("new") end)"#,
        );

        host.emit(GameEvent::new("say", vec![]));

        assert_eq!(
            game.lock().unwrap().messages(NoticeLevel::Broadcast),
            vec!["new".to_string()]
        );
    }

    #[test]
    fn test_drop_detaches() {
        let (_dir, host, _game, registry) = setup();
        let relay = EventRelay::attach(&host, registry.surfaces());
        assert_eq!(host.events().any_listener_count(), 1);

        drop(relay);
        assert_eq!(host.events().any_listener_count(), 0);
    }
}
