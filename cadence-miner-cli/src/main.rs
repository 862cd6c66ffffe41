use std::{path::PathBuf, sync::Arc};

use cadence_miner_lib::{
    init_global_logger, probe::wait_until_ready, tls, ConfigSettings, HttpChannel, LoggerConfig,
    Scheduler,
};
use clap::Parser;
use eyre::WrapErr;
use log::info;

/// Triggers block generation on a remote node at a steady cadence.
#[derive(Debug, Parser)]
#[command(name = "cadence-miner", version, about)]
struct Cli {
    /// Config file (defaults to ~/.cadence-miner/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target block interval in seconds
    #[arg(long, value_name = "SECONDS")]
    blocktime: Option<u64>,

    /// Seconds to wait before retrying after errors
    #[arg(long, value_name = "SECONDS")]
    retry: Option<u64>,

    /// JSON-RPC endpoint of the node
    #[arg(long)]
    rpc_url: Option<String>,

    #[arg(long)]
    rpc_user: Option<String>,

    #[arg(long)]
    rpc_password: Option<String>,

    /// Path to the node's certificate authority
    #[arg(long, value_name = "FILE")]
    ca: Option<PathBuf>,

    /// Path to the client certificate
    #[arg(long, value_name = "FILE")]
    cert: Option<PathBuf>,

    /// Path to the client certificate key
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let paths = [
            ("ca_path", &self.ca),
            ("cert_path", &self.cert),
            ("key_path", &self.key),
            ("log_file", &self.log_file),
        ];
        let mut overrides: Vec<(&'static str, String)> = paths
            .into_iter()
            .filter_map(|(key, path)| {
                path.as_ref()
                    .map(|path| (key, path.to_string_lossy().into_owned()))
            })
            .collect();
        overrides.extend(self.blocktime.map(|secs| ("target_block_time", secs.to_string())));
        overrides.extend(self.retry.map(|secs| ("retry_duration", secs.to_string())));
        overrides.extend(self.rpc_url.clone().map(|url| ("rpc_url", url)));
        overrides.extend(self.rpc_user.clone().map(|user| ("rpc_user", user)));
        overrides.extend(self.rpc_password.clone().map(|password| ("rpc_password", password)));
        overrides.extend(self.log_level.clone().map(|level| ("log_level", level)));
        overrides
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let settings = ConfigSettings::load(cli.config.clone(), &cli.overrides())
        .wrap_err("failed to load configuration")?;

    let _logger = init_global_logger(LoggerConfig {
        console_output: true,
        file_output: settings.log_file.is_some(),
        log_file_path: settings.log_file.clone(),
        max_log_entries: 1000,
        level: settings.log_level,
    })
    .wrap_err("failed to initialise logger")?;
    info!(target: "status", "🌸 cadence miner started");
    info!(
        target: "status",
        "⏱️ target block time {}s, retry after {}s",
        settings.target_block_time.as_secs(),
        settings.retry_duration.as_secs()
    );

    let client = tls::build_client(&settings.tls).wrap_err("failed to set up TLS")?;
    let channel = Arc::new(HttpChannel::new(
        client,
        settings.rpc_url.clone(),
        settings.basic_auth.clone(),
    ));
    info!(target: "status", "🛰️ node endpoint {}", channel.url());

    wait_until_ready(channel.as_ref(), &settings.probe)
        .await
        .wrap_err("node did not become ready")?;

    // Create a handle to capture CTRL+C
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.lock().ok().and_then(|mut guard| guard.take()) {
            let _ = tx.send(());
        }
    })
    .wrap_err("failed to install ctrl-c handler")?;

    let mut scheduler = Scheduler::new(channel, settings.scheduler_settings());
    let attempt = &scheduler.settings().attempt;
    info!(
        target: "status",
        "⛏️ generate deadline {}ms, watchdog {}ms, stop request deadline {}ms",
        attempt.deadline().as_millis(),
        attempt.watchdog().as_millis(),
        attempt.stop_deadline().as_millis()
    );
    tokio::select! {
        _ = rx => {
            info!(target: "shutdown", "👋 Received shutdown signal, stopping miner...");
        }
        () = scheduler.run() => {}
    }

    let stats = scheduler.stats();
    info!(
        target: "shutdown",
        "blocks mined: {}, stopped attempts: {}, failed attempts: {}, missed polls: {}",
        stats.blocks_mined,
        stats.expected_failures,
        stats.unexpected_failures,
        stats.observation_failures
    );
    Ok(())
}
