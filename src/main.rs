use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecospark::audio::{AudioSink, DeviceAudio, SilentAudio};
use ecospark::auth::secret_digest;
use ecospark::hardware::{DigitalOutputPort, DirAssetStore, LogOnlyPins, SysfsGpio};
use ecospark::shutdown::{CommandShutdown, LogShutdown, ShutdownHook};
use ecospark::{Acceptor, ConfiguredAddress, Hardware, ServerConfig, ServerContext};

#[derive(Parser)]
#[command(name = "ecospark")]
#[command(about = "Effects controller for remotely triggered light and sound sequences")]
#[command(version)]
struct Cli {
    /// RON config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the asset directory
    #[arg(long)]
    instructions_dir: Option<PathBuf>,

    /// Print the digest clients must present, then exit
    #[arg(long)]
    print_hash: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(dir) = cli.instructions_dir {
        config.instructions_dir = dir;
    }
    config.validate()?;

    if cli.print_hash {
        println!("{}", secret_digest(&config.secret));
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    std::fs::create_dir_all(&config.instructions_dir).with_context(|| {
        format!(
            "failed to create instructions directory {}",
            config.instructions_dir.display()
        )
    })?;

    let pins: Arc<dyn DigitalOutputPort> = match &config.gpio_root {
        Some(root) => Arc::new(SysfsGpio::new(root)),
        None => {
            warn!("no gpio_root configured, pin changes are only logged");
            Arc::new(LogOnlyPins)
        }
    };

    let audio: Arc<dyn AudioSink> = if config.audio_enabled {
        match DeviceAudio::open() {
            Ok(device) => Arc::new(device),
            Err(e) => {
                warn!(error = %e, "audio output unavailable, continuing without sound");
                Arc::new(SilentAudio)
            }
        }
    } else {
        Arc::new(SilentAudio)
    };

    let hardware = Hardware {
        pins,
        audio,
        assets: Arc::new(DirAssetStore::new(&config.instructions_dir)),
    };

    let command = config.shutdown_command.clone().and_then(CommandShutdown::new);
    let shutdown: Box<dyn ShutdownHook> = match command {
        Some(command) => Box::new(command),
        None => Box::new(LogShutdown),
    };

    let acceptor = Acceptor::bind(&ConfiguredAddress(config.listen.clone()))
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        instructions = %config.instructions_dir.display(),
        "ecospark ready"
    );

    let mut ctx = ServerContext::new(config, hardware, shutdown);
    acceptor.serve(&mut ctx)?;

    info!("ecospark stopped");
    Ok(())
}
