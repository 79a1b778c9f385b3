use anyhow::Result;
use triphase::config::Config;
use triphase::driver::{DriverCommand, PhaseDriver};
use triphase::hal::{PhaseIo, SimulatedIo};
use triphase::modbus::ModbusIo;
use triphase::web;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    triphase::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Triphase best-phase selector starting up");

    let io: Box<dyn PhaseIo> = if config.simulate {
        info!("Running against the simulated mains backend");
        Box::new(SimulatedIo::new(&config.sampler))
    } else {
        Box::new(ModbusIo::new(&config.modbus, &config.channels))
    };

    // Create driver command channel
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DriverCommand>();

    let mut driver = PhaseDriver::new(config.clone(), io, cmd_rx)
        .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    // Spawn web server beside the driver
    let state = web::AppState {
        snapshot_rx: driver.subscribe_snapshot(),
        history_rx: driver.subscribe_history(),
        commands_tx: cmd_tx.clone(),
        status_tx: driver.status_sender(),
        log_file: config.logging.file.clone(),
    };
    let host = config.web.host.clone();
    let port = config.web.port;
    let web_task = tokio::spawn(async move {
        if let Err(e) = web::serve(state, &host, port).await {
            error!("Web server error: {}", e);
        }
    });

    // Run the driver in the current task
    match driver.run().await {
        Ok(_) => {
            info!("Driver shutdown complete");
            web_task.abort();
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            web_task.abort();
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
