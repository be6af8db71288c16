mod app;
mod config;
mod gpu;
mod session;
mod simulation;

use std::path::PathBuf;

use anyhow::Context;
use winit::event_loop::{ControlFlow, EventLoop};

use crate::app::App;
use crate::config::{SimulationConfig, Theme};
use crate::session::Preferences;

/// Environment fallback for `--config`
const CONFIG_ENV: &str = "FLUID_CONFIG";

/// Command line options
#[derive(Debug, PartialEq)]
struct Options {
    theme: Theme,
    config_path: Option<PathBuf>,
}

impl Options {
    fn parse(args: &[String], config_env: Option<String>) -> anyhow::Result<Self> {
        let value_of = |flag: &str| {
            args.windows(2)
                .find(|pair| pair[0] == flag)
                .map(|pair| pair[1].clone())
        };

        let theme = match value_of("--theme") {
            Some(token) => Theme::parse(&token)
                .with_context(|| format!("unknown theme '{}', expected dark or light", token))?,
            None => Theme::Dark,
        };
        let config_path = value_of("--config").or(config_env).map(PathBuf::from);

        Ok(Self { theme, config_path })
    }
}

fn load_config(path: Option<&PathBuf>) -> SimulationConfig {
    let Some(path) = path else {
        return SimulationConfig::default();
    };
    match SimulationConfig::load(path) {
        Ok(config) => {
            log::info!("Loaded config from {}", path.display());
            config
        }
        Err(err) => {
            log::warn!("{:#}; using defaults", err);
            SimulationConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = Options::parse(&args, std::env::var(CONFIG_ENV).ok())?;
    let config = load_config(options.config_path.as_ref());
    let preferences = Preferences::from_env(&args);

    log::info!("Starting fluid backdrop ({:?} theme)", options.theme);

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(options.theme, config, preferences);
    event_loop.run_app(&mut app).context("event loop terminated with an error")?;
    Ok(())
}
