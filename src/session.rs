use std::sync::Arc;
use std::time::Instant;

use winit::window::Window;

use crate::config::{SimulationConfig, Theme};
use crate::gpu::{GpuBackend, GpuContext};
use crate::simulation::Simulation;

/// Environment switch equivalent to `--reduced-motion`
pub const REDUCED_MOTION_ENV: &str = "FLUID_REDUCED_MOTION";

/// User preferences that can veto the animation entirely
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Preferences {
    pub reduced_motion: bool,
}

impl Preferences {
    pub fn from_sources(args: &[String], reduced_motion_env: Option<&str>) -> Self {
        let from_args = args.iter().any(|arg| arg == "--reduced-motion");
        let from_env = matches!(reduced_motion_env, Some("1") | Some("true"));
        Self {
            reduced_motion: from_args || from_env,
        }
    }

    pub fn from_env(args: &[String]) -> Self {
        let env = std::env::var(REDUCED_MOTION_ENV).ok();
        Self::from_sources(args, env.as_deref())
    }
}

/// One mounted fluid background. Stopping consumes it, so it can only stop once.
pub enum Session {
    Running(Box<Simulation<GpuBackend>>),
    /// Nothing was started; every call is a no-op
    Inactive,
}

impl Session {
    /// Negotiate a context and start simulating into `window`.
    ///
    /// Returns [`Session::Inactive`] when reduced motion is requested or no
    /// usable GPU context exists; neither is reported as an error.
    pub fn start(
        window: Arc<Window>,
        theme: Theme,
        config: &SimulationConfig,
        preferences: Preferences,
    ) -> Self {
        if preferences.reduced_motion {
            log::info!("Reduced motion requested, fluid background disabled");
            return Session::Inactive;
        }

        let context = match pollster::block_on(GpuContext::negotiate(window.clone(), config.transparent)) {
            Ok(context) => context,
            Err(err) => {
                log::warn!("No usable GPU context, fluid background disabled: {}", err);
                return Session::Inactive;
            }
        };

        let mut config = config.clone();
        context.capabilities.constrain(&mut config);
        log::info!(
            "Starting {:?} session: sim {}, dye {}, shading {}",
            theme,
            config.sim_resolution,
            config.dye_resolution,
            config.shading
        );

        let backend = GpuBackend::new(context, &config);
        let simulation = Simulation::new(config, backend, theme, Instant::now());
        window.request_redraw();
        Session::Running(Box::new(simulation))
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Session::Running(_))
    }

    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        if let Session::Running(simulation) = self {
            simulation.pointer_moved(x, y);
        }
    }

    pub fn resized(&mut self, width: u32, height: u32) {
        if let Session::Running(simulation) = self {
            simulation.backend_mut().resize(width, height);
        }
    }

    /// Step and present one frame, then ask for the next one
    pub fn redraw(&mut self, window: &Window) -> bool {
        let Session::Running(simulation) = self else {
            return false;
        };
        let rendered = simulation.frame(Instant::now());
        window.request_redraw();
        rendered
    }

    /// Release every target, program and the device
    pub fn stop(self) {
        let Session::Running(simulation) = self else {
            return;
        };
        let frames = simulation.frame_number();
        let (backend, released) = simulation.teardown();
        log::debug!("Released {} field targets", released);
        backend.destroy();
        log::info!("Session stopped after {} frames", frames);
    }
}
