use anyhow::{Context, Result};
use petri_app::{
    SharedWorld,
    renderer::{Renderer, RendererContext},
    terminal::TerminalRenderer,
};
use petri_core::{PetriConfig, World};
use std::sync::{Arc, Mutex};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let world = bootstrap_world()?;
    let renderer = TerminalRenderer::default();
    info!(renderer = renderer.name(), "Starting Petri arena shell");
    renderer.run(RendererContext { world })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world() -> Result<SharedWorld> {
    let mut config = PetriConfig::default();
    if let Some(seed) = env_u64("PETRI_SEED") {
        config.rng_seed = Some(seed);
    }
    if let Some(bots) = env_usize("PETRI_INITIAL_BOTS") {
        config.initial_bots = bots;
    }
    if let Ok(name) = std::env::var("PETRI_PLAYER_NAME")
        && !name.trim().is_empty()
    {
        config.player_name = name.trim().to_string();
    }

    let world = World::new(config).context("failed to build arena world")?;
    info!(
        population = world.population(),
        seed = ?world.config().rng_seed,
        world_width = world.config().world_width(),
        world_height = world.config().world_height(),
        "Primed arena world",
    );
    Ok(Arc::new(Mutex::new(world)))
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
}
