use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use worldhost_lib::HostConfig;

#[derive(Parser)]
#[command(version, about = "Hot-reloading host for Lua world modules", long_about = None)]
pub struct Cli {
    /// Directory containing world modules
    #[arg(value_name = "ROOT", required_unless_present = "config")]
    root: Option<PathBuf>,

    /// JSON configuration file; other flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Milliseconds between directory scans
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Milliseconds between tick events
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,

    /// Abort module code running longer than this
    #[arg(long, value_name = "MS")]
    eval_timeout_ms: Option<u64>,

    /// Only load files with this extension
    #[arg(long, value_name = "EXT", conflicts_with = "any_extension")]
    extension: Option<String>,

    /// Load every non-hidden file regardless of extension
    #[arg(long)]
    any_extension: bool,
}

impl Cli {
    fn into_config(self) -> Result<HostConfig> {
        let mut config = match (&self.config, &self.root) {
            (Some(path), _) => HostConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            (None, Some(root)) => HostConfig::new(root.clone())?,
            (None, None) => anyhow::bail!("a world directory or --config is required"),
        };

        if let (Some(_), Some(root)) = (&self.config, self.root) {
            config.root = root;
        }
        if let Some(ms) = self.poll_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = self.tick_ms {
            config.tick_interval_ms = ms;
        }
        if self.eval_timeout_ms.is_some() {
            config.eval_timeout_ms = self.eval_timeout_ms;
        }
        if self.any_extension {
            config.extension = None;
        } else if self.extension.is_some() {
            config.extension = self.extension;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    worldhost_lib::init_logging();

    let config = cli.into_config()?;
    worldhost_lib::run(config)
        .await
        .context("world host stopped with an error")
}
