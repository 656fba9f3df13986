/// worldhost - hot-reloading host for Lua world modules
///
/// Authors drop Lua files into a watched directory. Each file is evaluated
/// in its own sandbox against a small world DSL (rooms, items, commands,
/// event handlers, timers); changed files are re-evaluated on the next
/// directory pass and failures stay confined to the file that caused them.

// Module declarations
pub mod automation;
pub mod config;
pub mod core;
pub mod error;
pub mod modules;
pub mod persistence;
pub mod scripting;

// Re-export commonly used types
pub use crate::config::{HostConfig, HostConfigBuilder};
pub use crate::core::{EventKey, Game, GameEvent, GameHost, Host, Notice, NoticeLevel};
pub use crate::error::{HostError, Result};
pub use crate::modules::{Loader, ModuleRecord, ModuleState, ScanReport};

use tokio::sync::broadcast::error::RecvError;

/// Initialize logging infrastructure
///
/// Log lines go to stderr so stdout carries only host notices.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("worldhost starting...");
}

/// Host the world directory of `config` with an in-memory game until Ctrl-C
pub async fn run(config: HostConfig) -> Result<()> {
    let game = Game::new();
    let mut notices = game.notice_bus().subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => println!("[{:?}] {}", notice.level, notice.message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notice console fell behind, {} notice(s) dropped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let loader = Loader::new(config, Host::new(game));
    loader
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
}
