/// Sandboxed evaluation of world module source
///
/// Every module runs in its own Lua state that only carries the safe
/// standard libraries. The state's globals are the capability surface; the
/// host process is reachable only through what the surface installs.

use crate::core::lock;
use crate::error::{HostError, Result};
use crate::scripting::surface::CapabilitySurface;
use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value, VmState};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Instructions between two watchdog checks
const WATCHDOG_INSTRUCTION_INTERVAL: u32 = 1000;

/// Base-library globals that reach the filesystem
const BLOCKED_GLOBALS: [&str; 3] = ["dofile", "loadfile", "require"];

/// Create a Lua state with only the safe standard libraries
pub fn safe_state() -> Result<Lua> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
    let lua = Lua::new_with(libs, LuaOptions::default())?;

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals.set(name, Value::Nil)?;
    }
    Ok(lua)
}

/// Optional execution budget for calls into one Lua state
///
/// The instruction hook is installed once; it only fires an error while a
/// guard is alive and its deadline has passed.
#[derive(Clone)]
pub struct Watchdog {
    timeout: Option<Duration>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl Watchdog {
    /// Install the budget hook on `lua`
    pub fn install(lua: &Lua, timeout: Option<Duration>) -> Self {
        let watchdog = Self {
            timeout,
            deadline: Arc::new(Mutex::new(None)),
        };

        if let Some(timeout) = timeout {
            let deadline = Arc::clone(&watchdog.deadline);
            let budget_ms = timeout.as_millis();
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(WATCHDOG_INSTRUCTION_INTERVAL),
                move |_lua, _debug| match *lock(&deadline) {
                    Some(deadline) if Instant::now() >= deadline => Err(mlua::Error::runtime(
                        format!("script exceeded its {}ms budget", budget_ms),
                    )),
                    _ => Ok(VmState::Continue),
                },
            );
        }
        watchdog
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Arm the budget until the guard is dropped
    ///
    /// Guards nest: an inner guard never extends an outer deadline, and
    /// dropping it restores the outer one.
    pub fn guard(&self) -> WatchdogGuard {
        let previous = {
            let mut deadline = lock(&self.deadline);
            let previous = *deadline;
            if let Some(timeout) = self.timeout {
                let ours = Instant::now() + timeout;
                *deadline = Some(previous.map_or(ours, |outer| outer.min(ours)));
            }
            previous
        };

        WatchdogGuard {
            deadline: Arc::clone(&self.deadline),
            previous,
        }
    }
}

/// Restores the enclosing deadline on drop
pub struct WatchdogGuard {
    deadline: Arc<Mutex<Option<Instant>>>,
    previous: Option<Instant>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        *lock(&self.deadline) = self.previous;
    }
}

/// Evaluates module source against a capability surface
#[derive(Debug, Clone, Default)]
pub struct SandboxRuntime {
    eval_timeout: Option<Duration>,
}

impl SandboxRuntime {
    pub fn new(eval_timeout: Option<Duration>) -> Self {
        Self { eval_timeout }
    }

    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout
    }

    /// Fresh sandboxed state with this runtime's watchdog installed
    pub fn create_state(&self) -> Result<(Lua, Watchdog)> {
        let lua = safe_state()?;
        let watchdog = Watchdog::install(&lua, self.eval_timeout);
        Ok((lua, watchdog))
    }

    /// Run `source` as the module's top-level chunk
    ///
    /// The log artifact is truncated first. Success removes a stale error
    /// artifact; failure writes one, broadcasts a notice and returns
    /// `HostError::Evaluation`.
    pub fn evaluate(&self, surface: &CapabilitySurface, source: &str) -> Result<()> {
        let module = surface.module();
        let artifacts = surface.artifacts();
        debug!("Evaluating module '{}' ({} bytes)", module, source.len());

        artifacts.report(artifacts.truncate_log());

        let result = {
            let _guard = surface.watchdog().guard();
            surface
                .lua()
                .load(source)
                .set_name(format!("@{}", module))
                .exec()
        };

        match result {
            Ok(()) => {
                match artifacts.clear_error() {
                    Ok(true) => info!("Module '{}' recovered, error artifact removed", module),
                    Ok(false) => {}
                    Err(e) => warn!("Could not clear error artifact for '{}': {}", module, e),
                }
                Ok(())
            }
            Err(e) => {
                let detail = e.to_string();
                error!("Module '{}' failed to evaluate: {}", module, detail);
                surface.host().broadcast(&format!("Oh no some one broke {}!", module));
                artifacts.report(artifacts.write_error(&detail));
                Err(HostError::Evaluation {
                    module: module.to_string(),
                    detail,
                })
            }
        }
    }
}
