use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{SimulationConfig, Theme};
use crate::simulation::clock::FrameClock;
use crate::simulation::passes::{execute, frame_plan, pass_budget, Backend, FrameContext};
use crate::simulation::pointer::PointerTracker;
use crate::simulation::pool::{grid_resolution, FramebufferPool};

/// All per-session simulation state, driven one frame at a time.
pub struct Simulation<B: Backend> {
    config: SimulationConfig,
    backend: B,
    pool: FramebufferPool<B::Target>,
    pointers: PointerTracker,
    clock: FrameClock,
    surface_size: (u32, u32),
    rng: StdRng,
    frame_number: u64,
}

impl<B: Backend> Simulation<B> {
    pub fn new(config: SimulationConfig, backend: B, theme: Theme, now: Instant) -> Self {
        Self::with_rng(config, backend, theme, now, StdRng::from_entropy())
    }

    pub fn with_rng(
        config: SimulationConfig,
        backend: B,
        theme: Theme,
        now: Instant,
        mut rng: StdRng,
    ) -> Self {
        let pointers = PointerTracker::new(theme, &mut rng);
        let mut simulation = Self {
            config,
            backend,
            pool: FramebufferPool::new(),
            pointers,
            clock: FrameClock::new(now),
            surface_size: (0, 0),
            rng,
            frame_number: 0,
        };

        let (width, height) = simulation.backend.surface_size();
        if width > 0 && height > 0 {
            simulation.rebuild_targets((width, height));
        }
        simulation
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pool(&self) -> &FramebufferPool<B::Target> {
        &self.pool
    }

    pub fn pointers(&self) -> &PointerTracker {
        &self.pointers
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Pointer position in surface pixels, y down
    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        let (width, height) = self.backend.surface_size();
        self.pointers.pointer_moved(x, y, width, height);
    }

    /// Run one full frame. Returns `false` if the frame was skipped.
    pub fn frame(&mut self, now: Instant) -> bool {
        let dt = self.clock.tick(now);

        let (width, height) = self.backend.surface_size();
        if width == 0 || height == 0 {
            return false;
        }

        let budget = pass_budget(&self.config, self.pointers.pointers().len());
        if !self.backend.begin_frame(budget) {
            return false;
        }

        self.check_resize();
        self.pointers
            .update_colors(dt, self.config.color_update_speed, &mut self.rng);
        let splats = self.pointers.take_splats();

        let Some(fields) = self.pool.fields().copied() else {
            self.backend.end_frame();
            return false;
        };
        let plan = frame_plan(&FrameContext {
            config: &self.config,
            dt,
            splats: &splats,
            surface_size: self.surface_size,
            velocity_texel: fields.velocity.texel_size(),
            dye_texel: fields.dye.texel_size(),
        });
        execute(&plan, &mut self.pool, &mut self.backend);
        self.backend.end_frame();

        self.frame_number += 1;
        true
    }

    /// Rebuild every target if the drawable size changed since the last frame
    fn check_resize(&mut self) -> bool {
        let size = self.backend.surface_size();
        if size == self.surface_size || size.0 == 0 || size.1 == 0 {
            return false;
        }
        log::info!(
            "Surface resized {}x{} -> {}x{}, rebuilding targets",
            self.surface_size.0,
            self.surface_size.1,
            size.0,
            size.1
        );
        self.rebuild_targets(size);
        true
    }

    fn rebuild_targets(&mut self, (width, height): (u32, u32)) {
        let sim = grid_resolution(self.config.sim_resolution, width, height);
        let dye = grid_resolution(self.config.dye_resolution, width, height);
        self.pool.rebuild(&mut self.backend, sim, dye);
        self.surface_size = (width, height);
        log::debug!(
            "Targets: velocity {}x{}, dye {}x{} ({} live)",
            sim.0,
            sim.1,
            dye.0,
            dye.1,
            self.pool.len()
        );
    }

    /// Release every target and hand back the backend for destruction
    pub fn teardown(mut self) -> (B, usize) {
        let released = self.pool.release_all(&mut self.backend);
        (self.backend, released)
    }
}
