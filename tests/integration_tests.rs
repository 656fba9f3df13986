/// Integration tests for the world module host
///
/// Drives a `Loader` over a temporary world directory with a manual clock,
/// the way the binary drives it with the wall clock.

use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use worldhost_lib::{
    automation::ManualClock,
    core::{EventKey, Game, GameEvent, GameHost, Host, NoticeLevel},
    HostConfig, HostError, Loader, ModuleState,
};

// ============================================================================
// Helpers
// ============================================================================

struct World {
    dir: TempDir,
    loader: Loader,
    game: Arc<Mutex<Game>>,
    clock: ManualClock,
}

impl World {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(adjust: impl FnOnce(HostConfig) -> HostConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let config = adjust(HostConfig::new(dir.path()).unwrap());
        let (host, game) = Host::new_shared(Game::new());
        let clock = ManualClock::new();
        let loader = Loader::with_clock(config, host, Arc::new(clock.clone()));
        Self {
            dir,
            loader,
            game,
            clock,
        }
    }

    /// Write a module with an explicit modification time
    fn write(&self, name: &str, source: &str, mtime_secs: u64) {
        write_module(self.dir.path(), name, source, mtime_secs);
    }

    fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.game.lock().unwrap().messages(level)
    }

    fn error_artifact(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(".errors").join(name)
    }
}

fn write_module(dir: &Path, name: &str, source: &str, mtime_secs: u64) {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .unwrap();
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_clean_module_loads() {
    let world = World::new();
    world.write(
        "forest.lua",
        r#"room("forest", { description = "Tall pines", exits = { south = "plaza" } })"#,
        100,
    );

    let report = world.loader.scan().unwrap();

    assert_eq!(report.reloaded, vec!["forest.lua".to_string()]);
    assert!(!world.error_artifact("forest.lua").exists());
    assert!(world
        .messages(NoticeLevel::Warn)
        .contains(&"Reloaded world module: forest.lua".to_string()));
    assert_eq!(
        world.game.lock().unwrap().room("forest").unwrap().description,
        "Tall pines"
    );
}

#[test]
fn test_broken_module_reports_error() {
    let world = World::new();
    world.write("bug.lua", "undefinedCapability('plaza')", 100);

    let report = world.loader.scan().unwrap();

    assert_eq!(report.failed, vec!["bug.lua".to_string()]);
    let artifact = fs::read_to_string(world.error_artifact("bug.lua")).unwrap();
    assert!(artifact.contains("undefinedCapability"), "artifact: {}", artifact);
    assert!(world
        .messages(NoticeLevel::Broadcast)
        .contains(&"Oh no some one broke bug.lua!".to_string()));

    let errors = world.messages(NoticeLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Error loading world module: bug.lua"));
    assert_eq!(
        world.loader.registry().record("bug.lua").unwrap().state,
        ModuleState::Errored
    );
}

#[test]
fn test_spawn_schedule() {
    let world = World::new();
    world.write(
        "plaza.lua",
        r#"
        room("plaza", { description = "Market square" })
        item("plaza", "sword", { respawnTimer = 5, damage = 4 })
        handler("spawn", function(room, item)
            broadcast("spawned " .. item.name .. " in " .. room)
        end)
        "#,
        100,
    );
    world.loader.scan().unwrap();

    let swords = || {
        world
            .game
            .lock()
            .unwrap()
            .room("plaza")
            .unwrap()
            .items
            .iter()
            .filter(|item| item.name == "sword")
            .count()
    };

    world.clock.set(0.0);
    world.loader.tick();
    assert_eq!(swords(), 0);

    world.clock.set(6.0);
    world.loader.tick();
    assert_eq!(swords(), 1);

    world.clock.set(11.0);
    world.loader.tick();
    assert_eq!(swords(), 1);

    assert_eq!(
        world.messages(NoticeLevel::Broadcast),
        vec!["spawned sword in plaza".to_string()]
    );
    let game = world.game.lock().unwrap();
    let sword = game.room("plaza").unwrap().get_item("sword").unwrap();
    assert_eq!(sword.properties.get("damage"), Some(&json!(4)));
}

#[test]
fn test_failing_tick_handler_runs_once() {
    let world = World::new();
    world.write(
        "bad.lua",
        r#"
        calls = 0
        handler("tick", function()
            calls = calls + 1
            error("tick exploded")
        end)
        "#,
        100,
    );
    world.loader.scan().unwrap();
    assert!(!world.error_artifact("bad.lua").exists());

    world.loader.tick();
    let artifact = fs::read_to_string(world.error_artifact("bad.lua")).unwrap();
    assert!(artifact.contains("tick exploded"));

    world.loader.tick();
    world.loader.tick();

    let calls: i64 = world
        .loader
        .registry()
        .surface("bad.lua")
        .unwrap()
        .lua()
        .globals()
        .get("calls")
        .unwrap();
    assert_eq!(calls, 1);
    assert_eq!(
        world.messages(NoticeLevel::Broadcast),
        vec!["Oh dear there was an error handling the tick event!".to_string()]
    );
}

// ============================================================================
// Reload properties
// ============================================================================

#[test]
fn test_unchanged_file_is_not_reloaded() {
    let world = World::new();
    world.write("a.lua", "log('loaded')", 100);

    world.loader.scan().unwrap();
    let before = world.loader.registry().record("a.lua").cloned().unwrap();

    let report = world.loader.scan().unwrap();
    let after = world.loader.registry().record("a.lua").cloned().unwrap();

    assert!(report.reloaded.is_empty());
    assert_eq!(report.unchanged, vec!["a.lua".to_string()]);
    assert_eq!(before, after);
}

#[test]
fn test_burst_of_scans_reloads_once_per_change() {
    let world = World::new();
    world.write("a.lua", "x = 1", 100);

    for _ in 0..3 {
        world.loader.scan().unwrap();
    }
    world.write("a.lua", "x = 2", 200);
    let reloads: usize = (0..3)
        .map(|_| world.loader.scan().unwrap().reloaded.len())
        .sum();

    assert_eq!(reloads, 1);
    assert_eq!(world.loader.registry().record("a.lua").unwrap().generation, 2);
}

#[test]
fn test_error_artifact_cleared_after_fix() {
    let world = World::new();
    world.write("a.lua", "error('first draft')", 100);
    world.loader.scan().unwrap();
    assert!(world.error_artifact("a.lua").exists());

    world.write("a.lua", "room('fixed', {})", 200);
    let report = world.loader.scan().unwrap();

    assert_eq!(report.reloaded, vec!["a.lua".to_string()]);
    assert!(!world.error_artifact("a.lua").exists());
    assert_eq!(
        world.loader.registry().record("a.lua").unwrap().state,
        ModuleState::Active
    );
}

#[test]
fn test_log_artifact_truncated_on_reload() {
    let world = World::new();
    world.write("chatty.lua", "log('version one')", 100);
    world.loader.scan().unwrap();

    world.write("chatty.lua", "log('version two')", 200);
    world.loader.scan().unwrap();

    let log = fs::read_to_string(world.dir.path().join(".logs").join("chatty.lua")).unwrap();
    assert_eq!(log, "version two\n");
}

#[test]
fn test_deleted_module_keeps_stale_record() {
    let world = World::new();
    world.write("gone.lua", "room('ruins', {})", 100);
    world.loader.scan().unwrap();

    fs::remove_file(world.dir.path().join("gone.lua")).unwrap();
    let report = world.loader.scan().unwrap();

    assert_eq!(report.missing, vec!["gone.lua".to_string()]);
    assert!(world.loader.registry().record("gone.lua").is_some());
    assert!(world.game.lock().unwrap().room("ruins").is_some());
}

#[test]
fn test_unreadable_module_reports_error_and_keeps_record() {
    let world = World::new();
    world.write("a.lua", "room('hall', {})", 100);
    world.loader.scan().unwrap();

    let path = world.dir.path().join("a.lua");
    fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(200))
        .unwrap();

    let report = world.loader.scan().unwrap();

    assert_eq!(report.failed, vec!["a.lua".to_string()]);
    let registry = world.loader.registry();
    let record = registry.record("a.lua").unwrap();
    assert_eq!(record.modified, SystemTime::UNIX_EPOCH + Duration::from_secs(100));
    assert_eq!(record.state, ModuleState::Active);
    drop(registry);

    let artifact = fs::read_to_string(world.error_artifact("a.lua")).unwrap();
    assert!(artifact.contains("a.lua"), "artifact: {}", artifact);
    let errors = world.messages(NoticeLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Error loading world module: a.lua"));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_event_fans_out_to_every_module() {
    let world = World::new();
    for name in ["a.lua", "b.lua", "c.lua"] {
        world.write(
            name,
            &format!(r#"handler("say", function(who, text) broadcast("{}: " .. who .. " " .. text) end)"#, name),
            100,
        );
    }
    world.loader.scan().unwrap();

    world
        .loader
        .host()
        .emit(GameEvent::new("say", vec![json!("alice"), json!("hello")]));

    assert_eq!(
        world.messages(NoticeLevel::Broadcast),
        vec![
            "a.lua: alice hello".to_string(),
            "b.lua: alice hello".to_string(),
            "c.lua: alice hello".to_string(),
        ]
    );
}

#[test]
fn test_one_broken_module_does_not_affect_others() {
    let world = World::new();
    world.write("a.lua", "room('a', {})", 100);
    world.write("b.lua", "this is not lua", 100);
    world.write("c.lua", "room('c', {})", 100);

    let report = world.loader.scan().unwrap();

    assert_eq!(report.reloaded, vec!["a.lua".to_string(), "c.lua".to_string()]);
    assert_eq!(report.failed, vec!["b.lua".to_string()]);
    let game = world.game.lock().unwrap();
    assert!(game.room("a").is_some());
    assert!(game.room("c").is_some());
}

#[test]
fn test_modules_do_not_share_globals() {
    let world = World::new();
    world.write("a.lua", "shared = 'from a'", 100);
    world.write("b.lua", "if shared ~= nil then error('leaked') end", 100);

    let report = world.loader.scan().unwrap();

    assert_eq!(report.reloaded.len(), 2);
}

#[test]
fn test_last_registration_wins_across_modules() {
    let world = World::new();
    world.write("a.lua", "room('hall', { description = 'from a' })", 100);
    world.write("b.lua", "room('hall', { description = 'from b' })", 100);

    world.loader.scan().unwrap();

    assert_eq!(
        world.game.lock().unwrap().room("hall").unwrap().description,
        "from b"
    );
}

#[test]
fn test_command_failure_is_contained() {
    let world = World::new();
    world.write(
        "cmds.lua",
        r#"
        command("dance", "Dance a little", function(player)
            error("two left feet")
        end)
        command("wave", "Wave", function(player, args)
            broadcast(player .. " waves")
        end)
        "#,
        100,
    );
    world.loader.scan().unwrap();
    let host = world.loader.host();

    let err = host.run_command("alice", "dance").unwrap_err();
    assert!(matches!(err, HostError::Handler { .. }));
    assert!(host.run_command("alice", "wave").unwrap());

    assert_eq!(
        world.messages(NoticeLevel::Broadcast),
        vec![
            "Oh dear there was an error running the dance command!".to_string(),
            "alice waves".to_string(),
        ]
    );
    let artifact = fs::read_to_string(world.error_artifact("cmds.lua")).unwrap();
    assert!(artifact.contains("two left feet"));
}

#[test]
fn test_prevent_default_from_module() {
    let world = World::new();
    world.write(
        "guard.lua",
        r#"event("enter", "vault", function(who) preventDefault() end)"#,
        100,
    );
    world.loader.scan().unwrap();
    let host = world.loader.host();

    assert!(!host.emit(GameEvent::scoped("enter", "vault", vec![json!("thief")])));
    assert!(host.emit(GameEvent::scoped("enter", "plaza", vec![json!("thief")])));
    assert_eq!(
        world.loader.registry().surface("guard.lua").unwrap().listener_count(&EventKey::scoped("enter", "vault")),
        1
    );
}

#[test]
fn test_spawn_during_tick_keeps_tick_prevent_default() {
    let world = World::new();
    world.write(
        "a.lua",
        r#"handler("tick", function() preventDefault() end)"#,
        100,
    );
    world.write(
        "b.lua",
        r#"
        room("plaza", {})
        item("plaza", "sword", { respawnTimer = 5 })
        "#,
        100,
    );
    world.loader.scan().unwrap();

    assert!(!world.loader.tick());

    world.clock.set(6.0);
    assert!(!world.loader.tick());
    assert!(world
        .game
        .lock()
        .unwrap()
        .room("plaza")
        .unwrap()
        .get_item("sword")
        .is_some());
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_timers_fire_on_clock() {
    let world = World::new();
    world.write(
        "bell.lua",
        r#"
        setTimeout(function() broadcast("bong") end, 2000)
        setTimeout(function() error("cracked bell") end, 500)
        "#,
        100,
    );
    world.loader.scan().unwrap();

    assert_eq!(world.loader.run_timers(), 0);
    world.clock.set(1.0);
    assert_eq!(world.loader.run_timers(), 1);
    world.clock.set(3.0);
    assert_eq!(world.loader.run_timers(), 1);

    let broadcasts = world.messages(NoticeLevel::Broadcast);
    assert_eq!(broadcasts.len(), 2);
    assert!(broadcasts[0].contains("cracked bell"));
    assert_eq!(broadcasts[1], "bong");

    let artifact = fs::read_to_string(world.error_artifact("bell.lua")).unwrap();
    assert!(artifact.contains("cracked bell"), "artifact: {}", artifact);
}

#[test]
fn test_superseded_module_timer_still_fires() {
    let world = World::new();
    world.write(
        "a.lua",
        r#"setTimeout(function() broadcast("old timer") end, 1000)"#,
        100,
    );
    world.loader.scan().unwrap();

    world.write("a.lua", "x = 1", 200);
    world.loader.scan().unwrap();

    world.clock.set(2.0);
    world.loader.run_timers();

    assert_eq!(
        world.messages(NoticeLevel::Broadcast),
        vec!["old timer".to_string()]
    );
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_watchdog_stops_runaway_module() {
    let world = World::with_config(|mut config| {
        config.eval_timeout_ms = Some(50);
        config
    });
    world.write("loop.lua", "while true do end", 100);
    world.write("ok.lua", "room('safe', {})", 100);

    let report = world.loader.scan().unwrap();

    assert_eq!(report.failed, vec!["loop.lua".to_string()]);
    assert_eq!(report.reloaded, vec!["ok.lua".to_string()]);
    let artifact = fs::read_to_string(world.error_artifact("loop.lua")).unwrap();
    assert!(artifact.contains("budget"));
}

#[test]
fn test_any_extension_loads_other_files() {
    let world = World::with_config(|mut config| {
        config.extension = None;
        config
    });
    world.write("forest.world", "room('forest', {})", 100);
    world.write("~backup.world", "error('should be hidden')", 100);

    let report = world.loader.scan().unwrap();

    assert_eq!(report.reloaded, vec!["forest.world".to_string()]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_run_loop_loads_and_ticks() {
    let world = World::with_config(|mut config| {
        config.tick_interval_ms = 10;
        config
    });
    world.write(
        "ticker.lua",
        r#"
        ticks = 0
        handler("tick", function() ticks = ticks + 1 end)
        "#,
        100,
    );

    world
        .loader
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    let ticks: i64 = world
        .loader
        .registry()
        .surface("ticker.lua")
        .unwrap()
        .lua()
        .globals()
        .get("ticks")
        .unwrap();
    assert!(ticks >= 1, "expected at least one tick, got {}", ticks);
}
