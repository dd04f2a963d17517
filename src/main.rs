mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gdbserver::{GdbServer, Lifecycle, ServerConfig, StopNotifier};
use ppusim::Emulator;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize the logger first
    simple_logger::SimpleLogger::new()
        .with_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .with_module_level(
            "gdbserver",
            if cli.verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            },
        )
        .init()
        .context("failed to initialise logging")?;

    log::info!("cellgdb - PPU debug server starting...");

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }

    let stop = StopNotifier::new();
    let emulator = Arc::new(Emulator::new(&cli.sim_config(), stop.clone()).context("failed to build the PPU core")?);

    let server = GdbServer::bind(&config, emulator.clone(), stop)
        .await
        .context("failed to start the GDB server")?;
    let handle = server.map(GdbServer::spawn);

    if cli.start || handle.is_none() {
        emulator.run();
    } else {
        log::info!("Waiting for a debugger to continue execution");
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    log::info!("Shutting down");

    if let Some(handle) = handle {
        handle.stop().await?;
    }
    emulator.shutdown();
    Ok(())
}
