//! The per-frame pass pipeline as data.
//!
//! A frame is an ordered list of [`PassDescriptor`]s built by [`frame_plan`]
//! and run by [`execute`] against a [`Backend`]. Every pass reads the fields it
//! names and writes exactly one target; double-buffered outputs are swapped
//! right after the pass so the next pass reads the fresh version.

use crate::config::{SimulationConfig, VELOCITY_LIMIT};
use crate::simulation::pool::{Field, FieldClass, FramebufferPool};

/// Uniform block shared by every program (64 bytes, WGSL layout)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],
    /// Texel size of the advected field, used for manual bilinear filtering
    pub dye_texel_size: [f32; 2],
    pub point: [f32; 2],
    pub dt: f32,
    pub dissipation: f32,
    /// vec3 color padded to vec4
    pub color: [f32; 4],
    pub aspect_ratio: f32,
    pub radius: f32,
    pub curl: f32,
    pub value: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    Copy,
    Clear,
    Splat,
    Advection,
    Divergence,
    Curl,
    Vorticity,
    Pressure,
    GradientSubtract,
    Display,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 10] = [
        ProgramKind::Copy,
        ProgramKind::Clear,
        ProgramKind::Splat,
        ProgramKind::Advection,
        ProgramKind::Divergence,
        ProgramKind::Curl,
        ProgramKind::Vorticity,
        ProgramKind::Pressure,
        ProgramKind::GradientSubtract,
        ProgramKind::Display,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProgramKind::Copy => "copy",
            ProgramKind::Clear => "clear",
            ProgramKind::Splat => "splat",
            ProgramKind::Advection => "advection",
            ProgramKind::Divergence => "divergence",
            ProgramKind::Curl => "curl",
            ProgramKind::Vorticity => "vorticity",
            ProgramKind::Pressure => "pressure",
            ProgramKind::GradientSubtract => "gradient-subtract",
            ProgramKind::Display => "display",
        }
    }
}

/// Which step of the frame a pass belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    SplatVelocity,
    SplatDye,
    Curl,
    Vorticity,
    Divergence,
    PressureDecay,
    PressureIteration(u32),
    GradientSubtract,
    AdvectVelocity,
    AdvectDye,
    Display,
}

impl Stage {
    pub fn program(self) -> ProgramKind {
        match self {
            Stage::SplatVelocity | Stage::SplatDye => ProgramKind::Splat,
            Stage::Curl => ProgramKind::Curl,
            Stage::Vorticity => ProgramKind::Vorticity,
            Stage::Divergence => ProgramKind::Divergence,
            Stage::PressureDecay => ProgramKind::Clear,
            Stage::PressureIteration(_) => ProgramKind::Pressure,
            Stage::GradientSubtract => ProgramKind::GradientSubtract,
            Stage::AdvectVelocity | Stage::AdvectDye => ProgramKind::Advection,
            Stage::Display => ProgramKind::Display,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Output {
    /// The field's write side (or the single target)
    Field(Field),
    /// The visible surface, cleared to `clear` before compositing
    Surface { clear: [f32; 4] },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassDescriptor {
    pub stage: Stage,
    /// Bound in order as `tex_a`, `tex_b`
    pub inputs: Vec<Field>,
    pub output: Output,
    pub uniforms: PassUniforms,
}

impl PassDescriptor {
    /// Clear color if this pass composites to the surface
    pub fn surface_clear(&self) -> Option<[f32; 4]> {
        match self.output {
            Output::Surface { clear } => Some(clear),
            Output::Field(_) => None,
        }
    }
}

/// A pending pointer impulse
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Splat {
    pub point: [f32; 2],
    pub delta: [f32; 2],
    pub color: [f32; 3],
}

pub enum PassOutput<'a, T> {
    Target(&'a T),
    Surface,
}

/// Something that can allocate field targets and run passes over them.
pub trait Backend {
    type Target;

    fn create_target(&mut self, width: u32, height: u32, class: FieldClass) -> Self::Target;

    /// Give a target back; it must not be used afterwards
    fn release_target(&mut self, target: Self::Target);

    /// Resample `source` into `destination` (the resize copy pass)
    fn copy_target(&mut self, source: &Self::Target, destination: &Self::Target);

    fn run_pass(
        &mut self,
        pass: &PassDescriptor,
        inputs: &[&Self::Target],
        output: PassOutput<'_, Self::Target>,
    );

    /// Current drawable size in pixels
    fn surface_size(&self) -> (u32, u32);

    /// Prepare for a frame of at most `pass_budget` passes; `false` skips the frame
    fn begin_frame(&mut self, _pass_budget: usize) -> bool {
        true
    }

    fn end_frame(&mut self) {}
}

/// Everything the plan builder needs to know about the current frame
pub struct FrameContext<'a> {
    pub config: &'a SimulationConfig,
    pub dt: f32,
    pub splats: &'a [Splat],
    pub surface_size: (u32, u32),
    pub velocity_texel: [f32; 2],
    pub dye_texel: [f32; 2],
}

impl FrameContext<'_> {
    fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.surface_size;
        width as f32 / height.max(1) as f32
    }
}

/// Upper bound on the number of passes a frame can encode, resize copies included
pub fn pass_budget(config: &SimulationConfig, splat_count: usize) -> usize {
    const RESIZE_COPIES: usize = 2;
    const FIXED_STAGES: usize = 8;
    splat_count * 2 + config.pressure_iterations as usize + FIXED_STAGES + RESIZE_COPIES
}

/// Build the full ordered pass list for one frame
pub fn frame_plan(frame: &FrameContext<'_>) -> Vec<PassDescriptor> {
    let config = frame.config;
    let mut plan = Vec::with_capacity(pass_budget(config, frame.splats.len()));

    for splat in frame.splats {
        plan.extend(splat_passes(frame, splat));
    }

    if !config.paused {
        plan.extend(vorticity_passes(config, frame.dt, frame.velocity_texel));
        plan.extend(projection_passes(config, frame.velocity_texel));
        plan.extend(advection_passes(frame));
    }

    plan.push(display_pass(config, frame.surface_size));
    plan
}

/// Gaussian radius, stretched on landscape surfaces so the footprint stays round
pub fn correct_radius(radius: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        radius * aspect_ratio
    } else {
        radius
    }
}

pub fn splat_passes(frame: &FrameContext<'_>, splat: &Splat) -> [PassDescriptor; 2] {
    let config = frame.config;
    let aspect_ratio = frame.aspect_ratio();
    let base = PassUniforms {
        texel_size: frame.velocity_texel,
        point: splat.point,
        aspect_ratio,
        radius: correct_radius(config.splat_radius_uv(), aspect_ratio),
        ..Default::default()
    };

    let force = [
        splat.delta[0] * config.splat_force,
        splat.delta[1] * config.splat_force,
    ];
    let [r, g, b] = splat.color;

    [
        PassDescriptor {
            stage: Stage::SplatVelocity,
            inputs: vec![Field::Velocity],
            output: Output::Field(Field::Velocity),
            uniforms: PassUniforms {
                color: [force[0], force[1], 0.0, 0.0],
                ..base
            },
        },
        PassDescriptor {
            stage: Stage::SplatDye,
            inputs: vec![Field::Dye],
            output: Output::Field(Field::Dye),
            uniforms: PassUniforms {
                texel_size: frame.dye_texel,
                color: [r, g, b, 0.0],
                ..base
            },
        },
    ]
}

pub fn vorticity_passes(
    config: &SimulationConfig,
    dt: f32,
    velocity_texel: [f32; 2],
) -> [PassDescriptor; 2] {
    [
        PassDescriptor {
            stage: Stage::Curl,
            inputs: vec![Field::Velocity],
            output: Output::Field(Field::Curl),
            uniforms: PassUniforms {
                texel_size: velocity_texel,
                ..Default::default()
            },
        },
        PassDescriptor {
            stage: Stage::Vorticity,
            inputs: vec![Field::Velocity, Field::Curl],
            output: Output::Field(Field::Velocity),
            uniforms: PassUniforms {
                texel_size: velocity_texel,
                curl: config.curl,
                dt,
                value: VELOCITY_LIMIT,
                ..Default::default()
            },
        },
    ]
}

/// Divergence, damped warm start, Jacobi relaxation and gradient subtraction
pub fn projection_passes(config: &SimulationConfig, velocity_texel: [f32; 2]) -> Vec<PassDescriptor> {
    let uniforms = PassUniforms {
        texel_size: velocity_texel,
        ..Default::default()
    };
    let mut passes = Vec::with_capacity(config.pressure_iterations as usize + 3);

    passes.push(PassDescriptor {
        stage: Stage::Divergence,
        inputs: vec![Field::Velocity],
        output: Output::Field(Field::Divergence),
        uniforms,
    });
    passes.push(PassDescriptor {
        stage: Stage::PressureDecay,
        inputs: vec![Field::Pressure],
        output: Output::Field(Field::Pressure),
        uniforms: PassUniforms {
            value: config.pressure,
            ..uniforms
        },
    });
    for iteration in 0..config.pressure_iterations {
        passes.push(PassDescriptor {
            stage: Stage::PressureIteration(iteration),
            inputs: vec![Field::Pressure, Field::Divergence],
            output: Output::Field(Field::Pressure),
            uniforms,
        });
    }
    passes.push(PassDescriptor {
        stage: Stage::GradientSubtract,
        inputs: vec![Field::Pressure, Field::Velocity],
        output: Output::Field(Field::Velocity),
        uniforms,
    });
    passes
}

pub fn advection_passes(frame: &FrameContext<'_>) -> [PassDescriptor; 2] {
    let config = frame.config;
    let base = PassUniforms {
        texel_size: frame.velocity_texel,
        dt: frame.dt,
        ..Default::default()
    };
    [
        PassDescriptor {
            stage: Stage::AdvectVelocity,
            inputs: vec![Field::Velocity, Field::Velocity],
            output: Output::Field(Field::Velocity),
            uniforms: PassUniforms {
                dye_texel_size: frame.velocity_texel,
                dissipation: config.velocity_dissipation,
                ..base
            },
        },
        PassDescriptor {
            stage: Stage::AdvectDye,
            inputs: vec![Field::Velocity, Field::Dye],
            output: Output::Field(Field::Dye),
            uniforms: PassUniforms {
                dye_texel_size: frame.dye_texel,
                dissipation: config.density_dissipation,
                ..base
            },
        },
    ]
}

pub fn display_pass(config: &SimulationConfig, surface_size: (u32, u32)) -> PassDescriptor {
    let (width, height) = surface_size;
    PassDescriptor {
        stage: Stage::Display,
        inputs: vec![Field::Dye],
        output: Output::Surface {
            clear: config.clear_color(),
        },
        uniforms: PassUniforms {
            texel_size: [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32],
            ..Default::default()
        },
    }
}

/// Run `plan` in order, swapping double buffers after each write
pub fn execute<B: Backend>(
    plan: &[PassDescriptor],
    pool: &mut FramebufferPool<B::Target>,
    backend: &mut B,
) {
    for pass in plan {
        let Some(fields) = pool.fields().copied() else {
            log::warn!("Skipping {:?}: no field targets allocated", pass.stage);
            return;
        };

        let inputs: Vec<&B::Target> = pass
            .inputs
            .iter()
            .filter_map(|field| pool.get(fields.read(*field)))
            .collect();
        if inputs.len() != pass.inputs.len() {
            log::warn!("Skipping {:?}: missing input target", pass.stage);
            continue;
        }

        match pass.output {
            Output::Field(field) => {
                let Some(target) = pool.get(fields.write(field)) else {
                    log::warn!("Skipping {:?}: missing output target", pass.stage);
                    continue;
                };
                backend.run_pass(pass, &inputs, PassOutput::Target(target));
                if let Some(fields) = pool.fields_mut() {
                    fields.swap(field);
                }
            }
            Output::Surface { .. } => {
                backend.run_pass(pass, &inputs, PassOutput::Surface);
            }
        }
    }
}
