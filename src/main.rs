use std::path::PathBuf;

use clap::Parser;
use dombus_gateway::config::Config;
use dombus_gateway::gateway::Gateway;

/// RS485 DomBus field bus to MQTT/Home-Assistant bridge.
#[derive(Parser, Debug)]
#[command(name = "dombus-gatewayd", version, about)]
struct Args {
    /// Path to the TOML configuration document.
    #[arg(short, long, default_value = "/etc/dombus-gateway/config.toml")]
    config: PathBuf,

    /// Overrides the configured data directory (Modules.json/Devices.json).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Raises log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Lowers log verbosity to warnings and errors only.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = Config::load(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.data_dir).map_err(|source| dombus_gateway::error::GatewayError::DataDir {
        path: config.data_dir.display().to_string(),
        source,
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(config, &local))
}

async fn run(config: Config, local: &tokio::task::LocalSet) -> anyhow::Result<()> {
    let gateway = Gateway::new(config);
    gateway.run(local).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested, saving state");

    gateway.save().await?;
    Ok(())
}
