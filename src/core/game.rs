/// Host game tables
///
/// `GameHost` is the narrow surface world modules reach the game through:
/// commands, rooms, players and host notices. `Game` is the in-memory
/// implementation used by the binary and the tests; gameplay semantics live
/// outside this crate.

use crate::core::events::{Notice, NoticeBus, NoticeLevel};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Notices kept in `Game` history; older ones are only seen on the bus
pub const NOTICE_HISTORY_SIZE: usize = 1000;

/// Item instance or spawn template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Item {
    /// The item name always wins over a `name` key in `properties`
    pub fn new(name: impl Into<String>, mut properties: Map<String, Value>) -> Self {
        properties.remove("name");
        Self {
            name: name.into(),
            properties,
        }
    }
}

/// Room creation properties as a module declares them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exits: BTreeMap<String, String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// A room with its current item list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: String,
    pub description: String,
    pub exits: BTreeMap<String, String>,
    pub properties: Map<String, Value>,
    pub items: Vec<Item>,
}

impl Room {
    pub fn new(id: impl Into<String>, spec: RoomSpec) -> Self {
        Self {
            id: id.into(),
            description: spec.description,
            exits: spec.exits,
            properties: spec.properties,
            items: Vec::new(),
        }
    }

    /// Find an item in this room by name
    pub fn get_item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Take an item out of this room
    pub fn remove_item(&mut self, name: &str) -> Option<Item> {
        let pos = self.items.iter().position(|item| item.name == name)?;
        Some(self.items.remove(pos))
    }
}

/// A player or NPC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub name: String,
    pub npc: bool,
    pub properties: Map<String, Value>,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            npc: false,
            properties: Map::new(),
        }
    }
}

/// Command table key: a verb, optionally bound to an item name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    pub verb: String,
    pub item: Option<String>,
}

impl CommandKey {
    pub fn verb(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            item: None,
        }
    }

    pub fn with_item(verb: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            item: Some(item.into()),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{} {}", self.verb, item),
            None => f.write_str(&self.verb),
        }
    }
}

/// Arguments of one command invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCall {
    pub player: String,
    pub args: String,
}

/// Callable behind a registered command
pub type CommandAction = Arc<dyn Fn(&CommandCall) -> Result<()> + Send + Sync>;

/// A registered text command
#[derive(Clone)]
pub struct Command {
    pub key: CommandKey,
    pub description: String,
    pub action: CommandAction,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// The game surface world modules are allowed to touch
///
/// All tables are shared across modules; registering an existing key
/// replaces the previous entry (last write wins).
pub trait GameHost: Send {
    fn create_command(&mut self, command: Command);
    fn command(&self, key: &CommandKey) -> Option<&Command>;

    fn create_room(&mut self, id: &str, spec: RoomSpec);
    fn room(&self, id: &str) -> Option<&Room>;
    fn room_mut(&mut self, id: &str) -> Option<&mut Room>;

    fn create_player(&mut self, name: &str) -> &mut Player;
    fn player(&self, name: &str) -> Option<&Player>;

    fn broadcast(&mut self, message: &str);
    fn warn(&mut self, message: &str);
    fn error(&mut self, message: &str);

    /// Suppress default handling of the event currently being dispatched
    fn prevent_default(&mut self);
    /// Read and clear the prevent-default flag
    fn take_default_prevented(&mut self) -> bool;
}

/// In-memory game tables
#[derive(Default)]
pub struct Game {
    commands: HashMap<CommandKey, Command>,
    rooms: HashMap<String, Room>,
    players: HashMap<String, Player>,
    notices: VecDeque<Notice>,
    notice_bus: Arc<NoticeBus>,
    default_prevented: bool,
}

impl Game {
    pub fn new() -> Self {
        debug!("Creating in-memory game");
        Self::default()
    }

    /// Recent notices, oldest first, at most `NOTICE_HISTORY_SIZE`
    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    /// Notice messages of one level, oldest first
    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .iter()
            .filter(|n| n.level == level)
            .map(|n| n.message.clone())
            .collect()
    }

    /// Bus that receives every notice as it is issued
    pub fn notice_bus(&self) -> Arc<NoticeBus> {
        Arc::clone(&self.notice_bus)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn push_notice(&mut self, level: NoticeLevel, message: &str) {
        let notice = Notice::new(level, message);
        self.notice_bus.publish(notice.clone());
        if self.notices.len() == NOTICE_HISTORY_SIZE {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }
}

impl GameHost for Game {
    fn create_command(&mut self, command: Command) {
        debug!("Registering command '{}'", command.key);
        if self.commands.insert(command.key.clone(), command).is_some() {
            debug!("Command replaced an earlier registration");
        }
    }

    fn command(&self, key: &CommandKey) -> Option<&Command> {
        self.commands.get(key)
    }

    fn create_room(&mut self, id: &str, spec: RoomSpec) {
        debug!("Creating room '{}'", id);
        self.rooms.insert(id.to_string(), Room::new(id, spec));
    }

    fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    fn room_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    fn create_player(&mut self, name: &str) -> &mut Player {
        debug!("Creating player '{}'", name);
        let player = self
            .players
            .entry(name.to_string())
            .or_insert_with(|| Player::new(name));
        *player = Player::new(name);
        player
    }

    fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    fn broadcast(&mut self, message: &str) {
        info!("[broadcast] {}", message);
        self.push_notice(NoticeLevel::Broadcast, message);
    }

    fn warn(&mut self, message: &str) {
        warn!("{}", message);
        self.push_notice(NoticeLevel::Warn, message);
    }

    fn error(&mut self, message: &str) {
        error!("{}", message);
        self.push_notice(NoticeLevel::Error, message);
    }

    fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    fn take_default_prevented(&mut self) -> bool {
        std::mem::take(&mut self.default_prevented)
    }
}
