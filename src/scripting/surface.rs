/// Capability surface: the world module DSL
///
/// A surface owns one sandboxed Lua state whose globals are the only API a
/// module can use:
///
/// - `command(name, description, fn)` / `itemCommand(name, item, description, fn)`
/// - `room(id, props)`, `item(roomId, itemName, template)`, `character(name, props)`
/// - `handler(event, fn)`, `event(event, subject, fn)`
/// - `setTimeout(fn, delayMs)`, `preventDefault()`, `broadcast(message)`
/// - `log(...)`, `print(...)`
///
/// Every callback a module registers runs fault-isolated: failures become an
/// error artifact, a host notice and a log line.

use crate::automation::{SharedClock, SpawnScheduler, SpawnTable, TimerQueue, DEFAULT_RESPAWN_SECS};
use crate::core::{Command, CommandAction, CommandCall, CommandKey, EventKey, GameEvent, Host, Item, RoomSpec};
use crate::error::{HostError, Result};
use crate::persistence::{ArtifactStore, ModuleArtifacts};
use crate::scripting::emitter::{Dispatch, ModuleEmitter};
use crate::scripting::sandbox::{SandboxRuntime, Watchdog};
use mlua::{DeserializeOptions, Function, IntoLuaMulti, Lua, LuaSerdeExt, Variadic};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tracing target for lines written by module `log`/`print`
pub const MODULE_LOG_TARGET: &str = "world_module";

/// Host-wide collaborators shared by every surface
#[derive(Clone)]
pub struct SurfaceContext {
    pub host: Host,
    pub spawns: SpawnTable,
    pub timers: TimerQueue,
    pub clock: SharedClock,
    pub artifacts: ArtifactStore,
    pub sandbox: SandboxRuntime,
}

/// State reachable from the module's registered callbacks
struct SurfaceShared {
    id: Uuid,
    module: String,
    host: Host,
    emitter: ModuleEmitter,
    spawns: SpawnTable,
    timers: TimerQueue,
    clock: SharedClock,
    artifacts: ModuleArtifacts,
    watchdog: Watchdog,
}

/// One evaluation context for one version of a module
pub struct CapabilitySurface {
    lua: Lua,
    shared: Arc<SurfaceShared>,
}

impl CapabilitySurface {
    /// Build a fresh surface for `module` and install the DSL
    pub fn new(ctx: &SurfaceContext, module: &str) -> Result<Self> {
        let (lua, watchdog) = ctx.sandbox.create_state()?;
        let shared = Arc::new(SurfaceShared {
            id: Uuid::new_v4(),
            module: module.to_string(),
            host: ctx.host.clone(),
            emitter: ModuleEmitter::new(),
            spawns: ctx.spawns.clone(),
            timers: ctx.timers.clone(),
            clock: Arc::clone(&ctx.clock),
            artifacts: ctx.artifacts.for_module(module),
            watchdog,
        });

        let surface = Self { lua, shared };
        surface.install_dsl()?;
        surface.install_spawn_tick(ctx);
        debug!("Created surface {} for '{}'", surface.shared.id, module);
        Ok(surface)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn module(&self) -> &str {
        &self.shared.module
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn host(&self) -> &Host {
        &self.shared.host
    }

    pub fn artifacts(&self) -> &ModuleArtifacts {
        &self.shared.artifacts
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.shared.watchdog
    }

    /// Deliver a host event to this module's own subscribers
    pub fn dispatch(&self, event: &GameEvent) -> usize {
        self.shared.emitter.dispatch(event)
    }

    pub fn listener_count(&self, key: &EventKey) -> usize {
        self.shared.emitter.listener_count(key)
    }

    /// The spawn check runs on every tick this surface receives
    fn install_spawn_tick(&self, ctx: &SurfaceContext) {
        let scheduler = SpawnScheduler::new(
            self.shared.id,
            ctx.spawns.clone(),
            ctx.host.clone(),
            Arc::clone(&ctx.clock),
        );
        let module = self.shared.module.clone();
        self.shared.emitter.subscribe(
            EventKey::new("tick"),
            Arc::new(move |_event: &GameEvent| {
                if let Err(e) = scheduler.run() {
                    warn!("Spawn check for '{}' failed: {}", module, e);
                }
                Dispatch::Keep
            }),
        );
    }

    fn install_dsl(&self) -> Result<()> {
        let lua = &self.lua;
        let globals = lua.globals();

        // command(name, description, fn)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "command",
            lua.create_function(move |lua, (name, description, func): (String, String, Function)| {
                shared.register_command(lua, CommandKey::verb(name), description, func);
                Ok(())
            })?,
        )?;

        // itemCommand(name, item, description, fn)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "itemCommand",
            lua.create_function(
                move |lua, (name, item, description, func): (String, String, String, Function)| {
                    shared.register_command(lua, CommandKey::with_item(name, item), description, func);
                    Ok(())
                },
            )?,
        )?;

        // room(id, props)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "room",
            lua.create_function(move |lua, (id, props): (String, Option<mlua::Value>)| {
                let props = table_to_map(lua, props)?;
                let spec: RoomSpec = serde_json::from_value(Value::Object(props))
                    .map_err(|e| mlua::Error::runtime(format!("invalid room '{}': {}", id, e)))?;
                debug!("Module '{}' creates room '{}'", shared.module, id);
                shared.host.game().create_room(&id, spec);
                Ok(())
            })?,
        )?;

        // item(roomId, itemName, template)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "item",
            lua.create_function(
                move |lua, (room, name, template): (String, String, Option<mlua::Value>)| {
                    let template = table_to_map(lua, template)?;
                    let respawn_secs = template
                        .get("respawnTimer")
                        .and_then(Value::as_f64)
                        .unwrap_or(DEFAULT_RESPAWN_SECS);
                    shared
                        .spawns
                        .register(shared.id, room, Item::new(name, template), respawn_secs);
                    Ok(())
                },
            )?,
        )?;

        // character(name, props)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "character",
            lua.create_function(move |lua, (name, props): (String, Option<mlua::Value>)| {
                let props = table_to_map(lua, props)?;
                debug!("Module '{}' creates character '{}'", shared.module, name);
                let mut game = shared.host.game();
                let player = game.create_player(&name);
                player.npc = true;
                player.properties.extend(props);
                Ok(name)
            })?,
        )?;

        // handler(event, fn)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "handler",
            lua.create_function(move |lua, (name, func): (String, Function)| {
                shared.register_handler(lua, EventKey::new(name), func);
                Ok(())
            })?,
        )?;

        // event(event, subject, fn)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "event",
            lua.create_function(move |lua, (name, subject, func): (String, String, Function)| {
                shared.register_handler(lua, EventKey::scoped(name, subject), func);
                Ok(())
            })?,
        )?;

        // setTimeout(fn, delayMs)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "setTimeout",
            lua.create_function(move |lua, (func, delay_ms): (Function, Option<f64>)| {
                Ok(shared.schedule_timeout(lua, func, delay_ms.unwrap_or(0.0)).to_string())
            })?,
        )?;

        // preventDefault()
        let shared = Arc::clone(&self.shared);
        globals.set(
            "preventDefault",
            lua.create_function(move |_lua, ()| {
                shared.host.game().prevent_default();
                Ok(())
            })?,
        )?;

        // broadcast(message)
        let shared = Arc::clone(&self.shared);
        globals.set(
            "broadcast",
            lua.create_function(move |_lua, message: String| {
                shared.host.broadcast(&message);
                Ok(())
            })?,
        )?;

        // log(...) and print(...)
        for name in ["log", "print"] {
            let shared = Arc::clone(&self.shared);
            globals.set(
                name,
                lua.create_function(move |lua, parts: Variadic<mlua::Value>| {
                    let tostring: Function = lua.globals().get("tostring")?;
                    let line = parts
                        .into_iter()
                        .map(|part| tostring.call::<String>(part))
                        .collect::<mlua::Result<Vec<_>>>()?
                        .join(" ");
                    shared.log_line(&line);
                    Ok(())
                })?,
            )?;
        }

        Ok(())
    }
}

impl Drop for CapabilitySurface {
    /// Script handlers hold the state that holds this surface's callbacks
    fn drop(&mut self) {
        debug!("Dropping surface {} for '{}'", self.shared.id, self.shared.module);
        self.shared.emitter.clear();
    }
}

/// A module function plus a strong handle on the state it lives in
///
/// Host tables (commands, timers) outlive the surface that registered them,
/// so the state must stay alive as long as they do.
#[derive(Clone)]
struct ScriptFn {
    lua: Lua,
    func: Function,
}

impl ScriptFn {
    fn new(lua: &Lua, func: Function) -> Self {
        Self {
            lua: lua.clone(),
            func,
        }
    }

    fn call(&self, watchdog: &Watchdog, args: impl IntoLuaMulti) -> mlua::Result<()> {
        let _guard = watchdog.guard();
        self.func.call::<()>(args)
    }

    /// Call with host event arguments converted to Lua values
    fn call_with_json(&self, watchdog: &Watchdog, args: &[Value]) -> mlua::Result<()> {
        let args = args
            .iter()
            .map(|arg| self.lua.to_value(arg))
            .collect::<mlua::Result<Variadic<mlua::Value>>>()?;
        self.call(watchdog, args)
    }
}

impl SurfaceShared {
    fn register_command(self: &Arc<Self>, lua: &Lua, key: CommandKey, description: String, func: Function) {
        debug!("Module '{}' registers command '{}'", self.module, key);
        let shared = Arc::clone(self);
        let script = ScriptFn::new(lua, func);
        let verb = key.verb.clone();
        let action: CommandAction = Arc::new(move |call: &CommandCall| {
            script
                .call(&shared.watchdog, (call.player.as_str(), call.args.as_str()))
                .map_err(|e| shared.command_failed(&verb, e))
        });

        self.host.game().create_command(Command {
            key,
            description,
            action,
        });
    }

    fn command_failed(&self, verb: &str, err: mlua::Error) -> HostError {
        let detail = err.to_string();
        self.artifacts.report(self.artifacts.write_error(&detail));
        self.host
            .broadcast(&format!("Oh dear there was an error running the {} command!", verb));
        error!("Module '{}' command '{}' failed: {}", self.module, verb, detail);
        HostError::Handler {
            module: self.module.clone(),
            target: verb.to_string(),
            detail,
        }
    }

    /// Subscribe a fail-once wrapper around a script handler
    fn register_handler(self: &Arc<Self>, lua: &Lua, key: EventKey, func: Function) {
        debug!("Module '{}' handles '{}'", self.module, key);
        let shared = Arc::clone(self);
        let script = ScriptFn::new(lua, func);
        self.emitter.subscribe(
            key,
            Arc::new(move |event: &GameEvent| {
                match script.call_with_json(&shared.watchdog, &event.args) {
                    Ok(()) => Dispatch::Keep,
                    Err(e) => {
                        shared.handler_failed(event, e);
                        Dispatch::Unsubscribe
                    }
                }
            }),
        );
    }

    fn handler_failed(&self, event: &GameEvent, err: mlua::Error) {
        let detail = err.to_string();
        self.artifacts.report(self.artifacts.write_error(&detail));
        self.host.broadcast(&format!(
            "Oh dear there was an error handling the {} event!",
            event.key
        ));
        error!(
            "Module '{}' handler for '{}' failed and was removed: {}",
            self.module, event.key, detail
        );
    }

    fn schedule_timeout(self: &Arc<Self>, lua: &Lua, func: Function, delay_ms: f64) -> Uuid {
        let due = self.clock.now() + delay_ms.max(0.0) / 1000.0;
        let shared = Arc::clone(self);
        let script = ScriptFn::new(lua, func);
        self.timers.schedule(
            self.module.clone(),
            due,
            Box::new(move || {
                if let Err(e) = script.call(&shared.watchdog, ()) {
                    let detail = e.to_string();
                    shared.artifacts.report(shared.artifacts.write_error(&detail));
                    shared.host.broadcast(&format!("Error running timeout: {}", detail));
                    error!("Module '{}' timeout failed: {}", shared.module, detail);
                }
            }),
        )
    }

    fn log_line(&self, line: &str) {
        info!(target: MODULE_LOG_TARGET, "[{}] {}", self.module, line);
        self.artifacts.report(self.artifacts.append_log(line));
    }
}

/// Convert an optional Lua table into a JSON object, dropping functions
fn table_to_map(lua: &Lua, value: Option<mlua::Value>) -> mlua::Result<Map<String, Value>> {
    let Some(value) = value else {
        return Ok(Map::new());
    };
    let options = DeserializeOptions::new().deny_unsupported_types(false);
    match lua.from_value_with::<Value>(value, options)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::Array(items) if items.is_empty() => Ok(Map::new()),
        other => Err(mlua::Error::runtime(format!("expected a table, got {}", other))),
    }
}
