use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

// ============================================
// Grid Resolution
// ============================================

/// Major-axis resolution of the velocity/pressure grid
pub const SIM_RESOLUTION: u32 = 128;

/// Major-axis resolution of the visible dye grid
pub const DYE_RESOLUTION: u32 = 1440;

/// Dye resolution used when the device cannot linearly filter float textures
pub const UNFILTERED_DYE_RESOLUTION: u32 = 256;

// ============================================
// Fluid Parameters
// ============================================

pub const DENSITY_DISSIPATION: f32 = 3.5;
pub const VELOCITY_DISSIPATION: f32 = 2.0;

/// Fraction of last frame's pressure kept as the Jacobi warm start
pub const PRESSURE: f32 = 0.1;
pub const PRESSURE_ITERATIONS: u32 = 20;

/// Vorticity confinement strength
pub const CURL: f32 = 3.0;

/// Splat radius in percent of the texture; divided by 100 before use
pub const SPLAT_RADIUS: f32 = 0.2;
pub const SPLAT_FORCE: f32 = 6000.0;

/// Pointer colors are regenerated once this many times per second
pub const COLOR_UPDATE_SPEED: f32 = 10.0;

/// Velocity components are clamped to +/- this after vorticity confinement
pub const VELOCITY_LIMIT: f32 = 1000.0;

/// Upper bound on a single simulation step (seconds)
pub const MAX_FRAME_DT: f32 = 1.0 / 60.0;

// ============================================
// Theme
// ============================================

/// Pointer color brightness against a dark page (additive blending)
pub const DARK_BRIGHTNESS: f32 = 0.3;

/// Pointer color brightness against a light page (subtractive blending)
pub const LIGHT_BRIGHTNESS: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn brightness(self) -> f32 {
        match self {
            Theme::Dark => DARK_BRIGHTNESS,
            Theme::Light => LIGHT_BRIGHTNESS,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            _ => None,
        }
    }
}

/// Tunable simulation parameters, fixed for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sim_resolution: u32,
    pub dye_resolution: u32,
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    pub pressure: f32,
    pub pressure_iterations: u32,
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub shading: bool,
    pub color_update_speed: f32,
    pub paused: bool,
    pub background_color: [f32; 3],
    pub transparent: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: SIM_RESOLUTION,
            dye_resolution: DYE_RESOLUTION,
            density_dissipation: DENSITY_DISSIPATION,
            velocity_dissipation: VELOCITY_DISSIPATION,
            pressure: PRESSURE,
            pressure_iterations: PRESSURE_ITERATIONS,
            curl: CURL,
            splat_radius: SPLAT_RADIUS,
            splat_force: SPLAT_FORCE,
            shading: true,
            color_update_speed: COLOR_UPDATE_SPEED,
            paused: false,
            background_color: [0.0, 0.0, 0.0],
            transparent: true,
        }
    }
}

impl SimulationConfig {
    /// Parse a JSON override file; missing fields keep their defaults.
    pub fn from_json(source: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(source).context("invalid simulation config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would produce empty field targets
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.sim_resolution > 0,
            "sim_resolution must be at least 1, got {}",
            self.sim_resolution
        );
        anyhow::ensure!(
            self.dye_resolution > 0,
            "dye_resolution must be at least 1, got {}",
            self.dye_resolution
        );
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&source)
    }

    /// Splat radius in texture units, before aspect correction
    pub fn splat_radius_uv(&self) -> f32 {
        self.splat_radius / 100.0
    }

    /// Color the surface is cleared to before the dye is composited
    pub fn clear_color(&self) -> [f32; 4] {
        if self.transparent {
            [0.0, 0.0, 0.0, 0.0]
        } else {
            let [r, g, b] = self.background_color;
            [r, g, b, 1.0]
        }
    }
}
