/// Directory watcher and host loop
///
/// Polls the world directory, reloads modules whose modification time
/// changed, and drives `tick` events and module timers.

use crate::automation::{SharedClock, SpawnTable, SystemClock, TimerQueue};
use crate::config::HostConfig;
use crate::core::{lock, GameEvent, Host};
use crate::error::{HostError, Result};
use crate::modules::registry::{ModuleRegistry, ModuleState};
use crate::modules::relay::EventRelay;
use crate::persistence::ArtifactStore;
use crate::scripting::{SandboxRuntime, SurfaceContext};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often due module timers are checked
const TIMER_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Whether a directory entry name can hold a world module
///
/// Hidden names (leading `.` or `~`) never qualify. With an extension set,
/// only names ending in `.<extension>` do.
pub fn is_eligible(name: &str, extension: Option<&str>) -> bool {
    if name.is_empty() || name.starts_with('.') || name.starts_with('~') {
        return false;
    }

    match extension {
        Some(ext) => Path::new(name).extension().and_then(|e| e.to_str()) == Some(ext),
        None => true,
    }
}

/// Outcome of one directory pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// Modules evaluated successfully
    pub reloaded: Vec<String>,
    /// Modules whose read or evaluation failed
    pub failed: Vec<String>,
    /// Modules seen with an unchanged modification time
    pub unchanged: Vec<String>,
    /// Recorded modules whose file is gone
    pub missing: Vec<String>,
    /// The pass did not run because another one was in progress
    pub skipped: bool,
}

impl ScanReport {
    pub fn changed(&self) -> bool {
        !self.reloaded.is_empty() || !self.failed.is_empty()
    }
}

/// Clears the in-progress flag when a scan ends
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Watches one world directory and hosts its modules
pub struct Loader {
    config: HostConfig,
    host: Host,
    clock: SharedClock,
    artifacts: ArtifactStore,
    timers: TimerQueue,
    spawns: SpawnTable,
    registry: Mutex<ModuleRegistry>,
    scanning: AtomicBool,
    _relay: EventRelay,
}

impl Loader {
    /// Loader on the wall clock
    pub fn new(config: HostConfig, host: Host) -> Self {
        Self::with_clock(config, host, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HostConfig, host: Host, clock: SharedClock) -> Self {
        info!("Creating loader for {}", config.root.display());
        let artifacts = ArtifactStore::new(&config.root);
        let ctx = SurfaceContext {
            host: host.clone(),
            spawns: SpawnTable::new(),
            timers: TimerQueue::new(),
            clock: Arc::clone(&clock),
            artifacts: artifacts.clone(),
            sandbox: SandboxRuntime::new(config.eval_timeout()),
        };

        let registry = ModuleRegistry::new(ctx.clone());
        let relay = EventRelay::attach(&host, registry.surfaces());

        Self {
            config,
            host,
            clock,
            artifacts,
            timers: ctx.timers,
            spawns: ctx.spawns,
            registry: Mutex::new(registry),
            scanning: AtomicBool::new(false),
            _relay: relay,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn spawns(&self) -> &SpawnTable {
        &self.spawns
    }

    /// Lock the module registry
    ///
    /// Scans hold this lock; do not keep the guard across `scan`.
    pub fn registry(&self) -> MutexGuard<'_, ModuleRegistry> {
        lock(&self.registry)
    }

    /// Run one directory pass
    ///
    /// Per-file failures are recorded in the report and never abort the
    /// pass. A pass requested while another is running is skipped.
    pub fn scan(&self) -> Result<ScanReport> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Scan already in progress, skipping");
            return Ok(ScanReport {
                skipped: true,
                ..ScanReport::default()
            });
        }
        let _guard = ScanGuard(&self.scanning);

        let root = &self.config.root;
        if !root.is_dir() {
            return Err(HostError::DirectoryNotFound(root.clone()));
        }
        self.artifacts.ensure_dirs()?;

        let mut names: Vec<String> = fs::read_dir(root)
            .map_err(|source| HostError::ScanFailed {
                path: root.clone(),
                source,
            })?
            .filter_map(|entry| match entry {
                Ok(entry) => entry.file_name().into_string().ok(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", root.display(), e);
                    None
                }
            })
            .filter(|name| is_eligible(name, self.config.extension.as_deref()))
            .collect();
        names.sort();

        let mut report = ScanReport::default();
        let mut seen = BTreeSet::new();
        let mut registry = self.registry();

        for name in names {
            let path = root.join(&name);
            let modified = match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            seen.insert(name.clone());

            let modified = match modified {
                Ok(modified) => modified,
                Err(source) => {
                    self.read_failed(&name, source);
                    report.failed.push(name);
                    continue;
                }
            };

            if !registry.needs_reload(&name, modified) {
                report.unchanged.push(name);
                continue;
            }

            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(source) => {
                    self.read_failed(&name, source);
                    report.failed.push(name);
                    continue;
                }
            };

            match registry.reload(&name, modified, &source) {
                ModuleState::Active => report.reloaded.push(name),
                _ => report.failed.push(name),
            }
        }

        report.missing = registry
            .records()
            .filter(|record| !seen.contains(&record.name))
            .map(|record| record.name.clone())
            .collect();

        if report.changed() {
            info!(
                "Scanned {}: {} reloaded, {} failed, {} unchanged",
                root.display(),
                report.reloaded.len(),
                report.failed.len(),
                report.unchanged.len()
            );
        } else {
            debug!("Scanned {}: nothing changed", root.display());
        }
        for name in &report.missing {
            debug!("Module '{}' is no longer on disk, keeping its record", name);
        }

        Ok(report)
    }

    /// Surface a stat or read failure; the module's record is left as it was
    fn read_failed(&self, module: &str, source: std::io::Error) {
        let detail = HostError::ModuleRead {
            module: module.to_string(),
            source,
        }
        .to_string();
        warn!("{}", detail);
        let artifacts = self.artifacts.for_module(module);
        artifacts.report(artifacts.write_error(&detail));
        self.host
            .error(&format!("Error loading world module: {}\n{}", module, detail));
    }

    /// Emit one `tick` on the host
    pub fn tick(&self) -> bool {
        self.host.emit(GameEvent::tick())
    }

    /// Fire every module timer that is due
    pub fn run_timers(&self) -> usize {
        self.timers.run_due(self.clock.now())
    }

    /// Run the host loop until `shutdown` resolves
    ///
    /// The first directory pass happens immediately. Passes run inline, so a
    /// slow pass delays the next one instead of overlapping it.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timers = tokio::time::interval(TIMER_POLL_INTERVAL);
        timers.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Watching {} every {:?}",
            self.config.root.display(),
            self.config.poll_interval()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(
                        "Loader shutting down, dropping {} pending timer(s)",
                        self.timers.pending_count()
                    );
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.scan() {
                        warn!("Directory scan failed: {}", e);
                    }
                }
                _ = tick.tick() => {
                    self.tick();
                }
                _ = timers.tick() => {
                    self.run_timers();
                }
            }
        }

        Ok(())
    }
}
