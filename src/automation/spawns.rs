/// Item spawn rules and the per-tick spawn check
///
/// Rules live in one host-wide table keyed by `(room, item)`. Each rule
/// remembers which surface registered it; a surface's tick only checks the
/// rules it owns. Registering an existing key from any module replaces the
/// rule and takes ownership.

use crate::automation::clock::Clock;
use crate::core::{lock, GameEvent, Host, Item};
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Respawn interval used when a template does not set `respawnTimer`
pub const DEFAULT_RESPAWN_SECS: f64 = 10.0;

/// Composite spawn key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SpawnKey {
    pub room: String,
    pub item: String,
}

impl SpawnKey {
    pub fn new(room: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            item: item.into(),
        }
    }
}

/// Periodic respawn directive for one item in one room
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnRule {
    pub key: SpawnKey,
    pub template: Item,
    pub respawn_secs: f64,
    pub last_spawn: f64,
    /// Surface that registered the rule
    pub owner: Uuid,
}

/// Host-wide spawn rule table
#[derive(Clone, Default)]
pub struct SpawnTable {
    rules: Arc<Mutex<HashMap<SpawnKey, SpawnRule>>>,
}

impl SpawnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the rule for `(room, template.name)`
    ///
    /// Does not spawn anything; the first spawn happens on a tick.
    pub fn register(&self, owner: Uuid, room: impl Into<String>, template: Item, respawn_secs: f64) {
        let key = SpawnKey::new(room, template.name.clone());
        debug!(
            "Spawn rule {}/{} every {}s (owner {})",
            key.room, key.item, respawn_secs, owner
        );

        let rule = SpawnRule {
            key: key.clone(),
            template,
            respawn_secs,
            last_spawn: 0.0,
            owner,
        };
        if lock(&self.rules).insert(key.clone(), rule).is_some() {
            debug!("Spawn rule {}/{} replaced", key.room, key.item);
        }
    }

    /// Drop every rule owned by `owner`
    pub fn release(&self, owner: Uuid) -> usize {
        let mut rules = lock(&self.rules);
        let before = rules.len();
        rules.retain(|_, rule| rule.owner != owner);
        before - rules.len()
    }

    pub fn rule(&self, key: &SpawnKey) -> Option<SpawnRule> {
        lock(&self.rules).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rules).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rules of `owner` whose interval has elapsed at `now`
    ///
    /// Every returned rule has its `last_spawn` moved to `now`, whether or
    /// not the spawn will actually happen.
    fn take_due(&self, owner: Uuid, now: f64) -> Vec<SpawnRule> {
        let mut rules = lock(&self.rules);
        let mut due: Vec<SpawnRule> = rules
            .values_mut()
            .filter(|rule| rule.owner == owner && now - rule.last_spawn > rule.respawn_secs)
            .map(|rule| {
                rule.last_spawn = now;
                rule.clone()
            })
            .collect();
        due.sort_by(|a, b| a.key.cmp(&b.key));
        due
    }
}

/// Runs the spawn check for one surface on each `tick`
#[derive(Clone)]
pub struct SpawnScheduler {
    owner: Uuid,
    table: SpawnTable,
    host: Host,
    clock: Arc<dyn Clock>,
}

impl SpawnScheduler {
    pub fn new(owner: Uuid, table: SpawnTable, host: Host, clock: Arc<dyn Clock>) -> Self {
        Self {
            owner,
            table,
            host,
            clock,
        }
    }

    /// Check every owned rule once
    ///
    /// A due rule clones its template into the room only when the room exists
    /// and holds no item of that name; each spawn emits `spawn(room, item)`.
    /// Returns the keys that spawned.
    pub fn run(&self) -> Result<Vec<SpawnKey>> {
        let now = self.clock.now();
        let due = self.table.take_due(self.owner, now);
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let mut spawned = Vec::new();
        {
            let mut game = self.host.game();
            for rule in due {
                let Some(room) = game.room_mut(&rule.key.room) else {
                    debug!("Spawn skipped, room '{}' does not exist", rule.key.room);
                    continue;
                };
                if room.get_item(&rule.key.item).is_some() {
                    debug!("Spawn skipped, '{}' already in '{}'", rule.key.item, rule.key.room);
                    continue;
                }

                let item = rule.template.clone();
                room.items.push(item.clone());
                spawned.push((rule.key, item));
            }
        }

        let mut keys = Vec::with_capacity(spawned.len());
        for (key, item) in spawned {
            info!("Spawned '{}' in '{}'", key.item, key.room);
            let event = GameEvent::new(
                "spawn",
                vec![
                    serde_json::Value::String(key.room.clone()),
                    serde_json::to_value(&item)?,
                ],
            );
            self.host.emit(event);
            keys.push(key);
        }

        Ok(keys)
    }
}
