use std::num::NonZeroU64;

use wgpu::{
    BindGroupLayout, CommandEncoder, PipelineLayout, Sampler, SurfaceTexture, Texture,
    TextureFormat, TextureView,
};

use crate::config::SimulationConfig;
use crate::gpu::buffers::{UniformArena, UNIFORM_SIZE};
use crate::gpu::context::GpuContext;
use crate::gpu::programs::{FeatureSet, GpuProgram, ProgramCache};
use crate::simulation::{
    Backend, FieldClass, PassDescriptor, PassOutput, PassUniforms, ProgramKind,
};

/// Slots reserved up front; a frame with many splats grows the arena
const INITIAL_UNIFORM_SLOTS: usize = 64;

/// An offscreen field texture
pub struct RenderTarget {
    texture: Texture,
    view: TextureView,
    format: TextureFormat,
}

/// Commands recorded for the frame in flight
struct Frame {
    encoder: CommandEncoder,
    surface_texture: SurfaceTexture,
    view: TextureView,
}

/// Where a pass draws
enum Destination<'a> {
    Target(&'a RenderTarget),
    Surface([f32; 4]),
}

/// Runs passes as full-screen fragment draws on the GPU
pub struct GpuBackend {
    context: GpuContext,
    programs: ProgramCache<GpuProgram>,
    bind_group_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    sampler: Sampler,
    uniforms: UniformArena,
    shading: bool,
    manual_filtering: bool,
    frame: Option<Frame>,
    /// Released while a frame was being recorded; destroyed after submit
    retired: Vec<RenderTarget>,
}

impl GpuBackend {
    pub fn new(context: GpuContext, config: &SimulationConfig) -> Self {
        let device = &context.device;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            log::error!("Uncaptured GPU error: {}", err);
        }));

        let linear_filtering = context.capabilities.linear_filtering;
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: linear_filtering,
                },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pass-bind-group-layout"),
            entries: &[
                // Pass uniforms, one slot per pass
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(UNIFORM_SIZE),
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(if linear_filtering {
                        wgpu::SamplerBindingType::Filtering
                    } else {
                        wgpu::SamplerBindingType::NonFiltering
                    }),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let filter = if linear_filtering {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("field-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });

        let uniforms = UniformArena::new(device, INITIAL_UNIFORM_SLOTS);

        let mut backend = Self {
            programs: ProgramCache::new(),
            bind_group_layout,
            pipeline_layout,
            sampler,
            uniforms,
            shading: config.shading,
            manual_filtering: !linear_filtering,
            frame: None,
            retired: Vec::new(),
            context,
        };
        backend.compile_programs();
        backend
    }

    fn compile_programs(&mut self) {
        for kind in ProgramKind::ALL {
            let features = FeatureSet::for_program(kind, self.shading, self.manual_filtering);
            self.programs.get(&self.context.device, kind, features);
        }
        log::info!(
            "Compiled {} programs ({} with diagnostics)",
            self.programs.len(),
            self.programs.diagnostics().len()
        );
    }

    /// Reconfigure the swapchain for a new window size
    pub fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    /// Record one full-screen draw of `kind` into the current frame
    fn draw(
        &mut self,
        kind: ProgramKind,
        uniforms: &PassUniforms,
        inputs: &[&RenderTarget],
        destination: Destination<'_>,
    ) {
        let Self {
            context,
            programs,
            bind_group_layout,
            pipeline_layout,
            sampler,
            uniforms: arena,
            shading,
            manual_filtering,
            frame,
            ..
        } = self;

        let Some(frame) = frame.as_mut() else {
            log::warn!("Dropping {} pass recorded outside a frame", kind.label());
            return;
        };
        let Some(&first) = inputs.first() else {
            log::warn!("Dropping {} pass without inputs", kind.label());
            return;
        };
        let second = inputs.get(1).copied().unwrap_or(first);
        let Some(offset) = arena.push(uniforms) else {
            log::warn!("Uniform arena exhausted, dropping {} pass", kind.label());
            return;
        };

        let (view, format, clear) = match destination {
            Destination::Target(target) => (&target.view, target.format, wgpu::Color::TRANSPARENT),
            Destination::Surface([r, g, b, a]) => (
                &frame.view,
                context.format(),
                wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                },
            ),
        };

        let features = FeatureSet::for_program(kind, *shading, *manual_filtering);
        let pipeline = programs
            .get(&context.device, kind, features)
            .pipeline(&context.device, pipeline_layout, format);

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kind.label()),
            layout: bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: arena.buffer(),
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_SIZE),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&first.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&second.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(kind.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[offset]);
        pass.draw(0..3, 0..1); // Draw fullscreen triangle
    }

    /// Free every GPU object and the device itself
    pub fn destroy(mut self) {
        self.frame = None;
        for target in self.retired.drain(..) {
            target.texture.destroy();
        }
        let programs = self.programs.clear();
        log::debug!("Released {} programs", programs);
        self.context.destroy();
    }
}

impl Backend for GpuBackend {
    type Target = RenderTarget;

    fn create_target(&mut self, width: u32, height: u32, class: FieldClass) -> RenderTarget {
        let format = self.context.capabilities.formats.get(class);
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("field-target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        RenderTarget {
            texture,
            view,
            format,
        }
    }

    fn release_target(&mut self, target: RenderTarget) {
        if self.frame.is_some() {
            self.retired.push(target);
        } else {
            target.texture.destroy();
        }
    }

    fn copy_target(&mut self, source: &RenderTarget, destination: &RenderTarget) {
        let size = destination.texture.size();
        let uniforms = PassUniforms {
            texel_size: [1.0 / size.width as f32, 1.0 / size.height as f32],
            ..Default::default()
        };
        self.draw(
            ProgramKind::Copy,
            &uniforms,
            &[source],
            Destination::Target(destination),
        );
    }

    fn run_pass(
        &mut self,
        pass: &PassDescriptor,
        inputs: &[&RenderTarget],
        output: PassOutput<'_, RenderTarget>,
    ) {
        let destination = match output {
            PassOutput::Target(target) => Destination::Target(target),
            PassOutput::Surface => match pass.surface_clear() {
                Some(clear) => Destination::Surface(clear),
                None => {
                    log::warn!("Skipping {:?}: field pass routed to the surface", pass.stage);
                    return;
                }
            },
        };
        self.draw(pass.stage.program(), &pass.uniforms, inputs, destination);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.context.config.width, self.context.config.height)
    }

    fn begin_frame(&mut self, pass_budget: usize) -> bool {
        if self.frame.is_some() {
            log::warn!("Frame already in flight");
            return false;
        }

        let surface_texture = match self.context.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                // Reconfigure surface
                self.context.reconfigure();
                return false;
            }
            Err(e) => {
                log::error!("Surface error: {:?}", e);
                return false;
            }
        };

        self.uniforms.begin_frame(&self.context.device, pass_budget);
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        self.frame = Some(Frame {
            encoder,
            surface_texture,
            view,
        });
        true
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };

        self.uniforms.flush(&self.context.queue);
        self.context
            .queue
            .submit(std::iter::once(frame.encoder.finish()));
        frame.surface_texture.present();

        for target in self.retired.drain(..) {
            target.texture.destroy();
        }
    }
}
