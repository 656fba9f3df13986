/// Module records and reload bookkeeping
///
/// One record per file name, created on first sighting and updated in place
/// on every reload. Records are never removed; a deleted file keeps its last
/// record.
///
/// State machine: `Unloaded -> Loading -> {Active, Errored}`, and back to
/// `Loading` whenever the file's modification time changes.

use crate::core::lock;
use crate::error::HostError;
use crate::scripting::{CapabilitySurface, SurfaceContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info};

/// Lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Active,
    Errored,
}

/// What the host knows about one module file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleRecord {
    pub name: String,
    pub modified: SystemTime,
    pub state: ModuleState,
    pub log_path: PathBuf,
    pub error_path: PathBuf,
    /// Detail of the latest failed load, cleared on success
    pub last_error: Option<String>,
    /// Number of load attempts so far
    pub generation: u64,
}

impl ModuleRecord {
    fn new(name: &str, modified: SystemTime, ctx: &SurfaceContext) -> Self {
        Self {
            name: name.to_string(),
            modified,
            state: ModuleState::Unloaded,
            log_path: ctx.artifacts.log_path(name),
            error_path: ctx.artifacts.error_path(name),
            last_error: None,
            generation: 0,
        }
    }
}

/// Current surface of every module, shared with the event relay
#[derive(Clone, Default)]
pub struct SurfaceTable {
    surfaces: Arc<Mutex<BTreeMap<String, Arc<CapabilitySurface>>>>,
}

impl SurfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str) -> Option<Arc<CapabilitySurface>> {
        lock(&self.surfaces).get(module).cloned()
    }

    /// Current surfaces in module name order
    pub fn snapshot(&self) -> Vec<Arc<CapabilitySurface>> {
        lock(&self.surfaces).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.surfaces).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace(&self, surface: Arc<CapabilitySurface>) -> Option<Arc<CapabilitySurface>> {
        lock(&self.surfaces).insert(surface.module().to_string(), surface)
    }
}

/// Registry of module records and their current surfaces
pub struct ModuleRegistry {
    ctx: SurfaceContext,
    records: BTreeMap<String, ModuleRecord>,
    surfaces: SurfaceTable,
}

impl ModuleRegistry {
    pub fn new(ctx: SurfaceContext) -> Self {
        debug!("Creating module registry");
        Self {
            ctx,
            records: BTreeMap::new(),
            surfaces: SurfaceTable::new(),
        }
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    /// Table the event relay fans out to
    pub fn surfaces(&self) -> SurfaceTable {
        self.surfaces.clone()
    }

    /// True when `name` has no record or was modified since its last load
    pub fn needs_reload(&self, name: &str, modified: SystemTime) -> bool {
        self.records
            .get(name)
            .map_or(true, |record| record.modified != modified)
    }

    /// Evaluate a new version of `name` and make its surface current
    ///
    /// The previous surface is dropped and its spawn rules released. Host
    /// registrations it made stay until something overwrites them. On
    /// failure the new surface remains current with whatever it registered
    /// before the error.
    pub fn reload(&mut self, name: &str, modified: SystemTime, source: &str) -> ModuleState {
        let record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| ModuleRecord::new(name, modified, &self.ctx));
        record.modified = modified;
        record.state = ModuleState::Loading;
        record.generation += 1;
        debug!("Loading module '{}' (generation {})", name, record.generation);

        let outcome = CapabilitySurface::new(&self.ctx, name).and_then(|surface| {
            let surface = Arc::new(surface);
            if let Some(previous) = self.surfaces.replace(Arc::clone(&surface)) {
                let released = self.ctx.spawns.release(previous.id());
                debug!("Superseded surface {} released {} spawn rule(s)", previous.id(), released);
            }
            self.ctx.sandbox.evaluate(&surface, source)
        });

        let state = match outcome {
            Ok(()) => {
                info!("Reloaded world module: {}", name);
                self.ctx.host.warn(&format!("Reloaded world module: {}", name));
                ModuleState::Active
            }
            Err(e) => {
                let detail = match e {
                    HostError::Evaluation { detail, .. } => detail,
                    other => other.to_string(),
                };
                self.ctx
                    .host
                    .error(&format!("Error loading world module: {}\n{}", name, detail));
                if let Some(record) = self.records.get_mut(name) {
                    record.last_error = Some(detail);
                }
                ModuleState::Errored
            }
        };

        if let Some(record) = self.records.get_mut(name) {
            record.state = state;
            if state == ModuleState::Active {
                record.last_error = None;
            }
        }
        state
    }

    pub fn record(&self, name: &str) -> Option<&ModuleRecord> {
        self.records.get(name)
    }

    /// All records in name order
    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.records.values()
    }

    pub fn surface(&self, name: &str) -> Option<Arc<CapabilitySurface>> {
        self.surfaces.get(name)
    }
}
