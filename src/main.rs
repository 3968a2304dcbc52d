use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::info;

use pulsevis::{Config, Engine};

fn main() -> Result<()> {
    let config = Config::load_from_file("config.toml").unwrap_or_else(|e| {
        eprintln!("No usable config.toml ({}), using defaults", e);
        Config::default()
    });
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = config.log_level.as_deref() {
        builder.parse_filters(level);
    }
    builder.init();
    info!("Loaded config: {:?}", config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        r.store(false, Ordering::Relaxed);
    })?;

    Engine::new(config).run(running)
}
