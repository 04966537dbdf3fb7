use anyhow::Result;
use tracing::{info, warn, Instrument};
use zone_heating_controller::{config::Config, controller::AppState, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    run().instrument(telemetry::service_span()).await
}

async fn run() -> Result<()> {
    let cfg = Config::load()?;
    if cfg.zones.is_empty() {
        warn!("no zones configured; nothing to control");
    }

    let state = AppState::new(cfg)?;
    state.start().await?;

    for sim in state.simulators() {
        if let Some(addr) = sim.local_addr().await {
            info!(zone_id = sim.zone_id(), name = sim.name(), %addr, "register device listening");
        }
    }
    info!(zones = state.simulators().len(), "starting zone heating controller");

    let signal = telemetry::shutdown_signal().await;

    state.shutdown().await;
    warn!(%signal, "shutdown complete");
    Ok(())
}
