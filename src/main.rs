use cablekit::{init_logging, BUILD_DATE, VERSION};
use cablekit_relay::Relay;
use cablekit_settings::Config;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!("cablekit relay v{} (built {})", VERSION, BUILD_DATE);

    // CREATE_CONFIG=1 writes a config template and exits, so a fresh
    // install can start from a documented file instead of bare defaults.
    if std::env::var("CREATE_CONFIG").is_ok() {
        let path = Config::write_template()?;
        println!("wrote config template to {}", path.display());
        return Ok(());
    }

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(Path::new(&path))?,
        None => Config::load_or_default()?,
    };

    let relay = Relay::spawn(config).await?;
    tracing::info!(addr = %relay.addr, "relay running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
