use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use meshgate_core::{GatewayConfig, HmacKey, TransportConfig};
use meshgate_protocol::CommandAuthenticator;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "meshgate", version, about = "Thread commissioning gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway
    Run {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Shared command key, overriding the configuration
        #[arg(long, env = "MESHGATE_KEY", hide_env_values = true)]
        key: Option<String>,

        /// Serve the UART on this TCP port instead of stdin/stdout
        #[arg(long)]
        tcp: Option<u16>,

        /// Directory for persistent network settings
        #[arg(long)]
        store: Option<PathBuf>,

        /// Seconds a command may run before the watchdog complains (0 disables)
        #[arg(long)]
        watchdog_secs: Option<u64>,

        /// Serve Prometheus metrics on this address
        #[cfg(feature = "prometheus")]
        #[arg(long)]
        metrics_addr: Option<std::net::SocketAddr>,
    },

    /// Print a signed command line
    Sign {
        /// YAML configuration file to take the key from
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Shared command key, overriding the configuration
        #[arg(long, env = "MESHGATE_KEY", hide_env_values = true)]
        key: Option<String>,

        /// Command to sign, e.g. "add * J01NME"
        body: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr; stdout carries protocol responses.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>, key: Option<String>) -> Result<GatewayConfig, String> {
    let mut config = match path {
        Some(path) => GatewayConfig::from_path(path).map_err(|e| e.to_string())?,
        None => GatewayConfig::default(),
    };
    if let Some(key) = key {
        config.hmac_key = HmacKey::new(key);
    }
    Ok(config)
}

fn cmd_run(config: GatewayConfig) -> ExitCode {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        error!(target: "MAIN", "failed to install Ctrl-C handler: {}", e);
    }

    meshgate_metrics::describe_metrics();

    match meshgate_runner::run(&config, shutdown) {
        Ok(summary) => {
            info!(
                target: "MAIN",
                "stopped after {} boot(s), {} command(s): {:?}",
                summary.boots,
                summary.commands,
                summary.exit
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "MAIN", "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_sign(config: GatewayConfig, body: &str) -> ExitCode {
    match CommandAuthenticator::new(config.hmac_key.as_bytes()) {
        Ok(auth) => {
            println!("{}", auth.sign_line(body));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "MAIN", "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            key,
            tcp,
            store,
            watchdog_secs,
            #[cfg(feature = "prometheus")]
            metrics_addr,
        } => {
            let mut config = match load_config(config.as_ref(), key) {
                Ok(config) => config,
                Err(e) => {
                    error!(target: "MAIN", "{}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Some(port) = tcp {
                config.serial.transport = TransportConfig::Tcp { port };
            }
            if let Some(dir) = store {
                config.store_dir = Some(dir);
            }
            if let Some(secs) = watchdog_secs {
                config.watchdog_timeout_secs = secs;
            }

            #[cfg(feature = "prometheus")]
            if let Some(addr) = metrics_addr {
                if let Err(e) = meshgate_metrics::install_prometheus(addr) {
                    error!(target: "MAIN", "failed to start metrics exporter: {}", e);
                    return ExitCode::FAILURE;
                }
                info!(target: "MAIN", "metrics on http://{}/metrics", addr);
            }

            cmd_run(config)
        }
        Commands::Sign { config, key, body } => match load_config(config.as_ref(), key) {
            Ok(config) => cmd_sign(config, &body),
            Err(e) => {
                error!(target: "MAIN", "{}", e);
                ExitCode::FAILURE
            }
        },
    }
}
