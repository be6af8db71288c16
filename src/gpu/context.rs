use std::fmt;
use std::sync::Arc;

use wgpu::{
    Adapter, CompositeAlphaMode, Device, Instance, Queue, Surface, SurfaceConfiguration,
    TextureFormat, TextureFormatFeatureFlags, TextureUsages,
};
use winit::window::Window;

use crate::config::{SimulationConfig, UNFILTERED_DYE_RESOLUTION};
use crate::simulation::FieldClass;

/// Why no rendering context could be acquired
#[derive(Debug)]
pub enum NegotiationError {
    Surface(wgpu::CreateSurfaceError),
    NoAdapter,
    Device(wgpu::RequestDeviceError),
    UnsupportedSurface,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::Surface(err) => write!(f, "surface creation failed: {}", err),
            NegotiationError::NoAdapter => write!(f, "no compatible adapter"),
            NegotiationError::Device(err) => write!(f, "device request failed: {}", err),
            NegotiationError::UnsupportedSurface => write!(f, "surface reports no usable format"),
        }
    }
}

impl std::error::Error for NegotiationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NegotiationError::Surface(err) => Some(err),
            NegotiationError::Device(err) => Some(err),
            NegotiationError::NoAdapter | NegotiationError::UnsupportedSurface => None,
        }
    }
}

/// One step of the context chain, tried in order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rung {
    Primary,
    Secondary,
    Software,
}

impl Rung {
    const CHAIN: [Rung; 3] = [Rung::Primary, Rung::Secondary, Rung::Software];

    fn backends(self) -> wgpu::Backends {
        match self {
            Rung::Primary => wgpu::Backends::PRIMARY,
            Rung::Secondary => wgpu::Backends::SECONDARY,
            Rung::Software => wgpu::Backends::all(),
        }
    }
}

const FALLBACK_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const RGBA_CHAIN: &[TextureFormat] = &[TextureFormat::Rgba16Float];
const RG_CHAIN: &[TextureFormat] = &[TextureFormat::Rg16Float, TextureFormat::Rgba16Float];
const R_CHAIN: &[TextureFormat] = &[
    TextureFormat::R16Float,
    TextureFormat::Rg16Float,
    TextureFormat::Rgba16Float,
];

/// Concrete texture format per field class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldFormats {
    pub rgba: TextureFormat,
    pub rg: TextureFormat,
    pub r: TextureFormat,
}

impl FieldFormats {
    /// Walk each class's chain and take the first format `renderable` accepts,
    /// degrading to 8-bit RGBA when none does
    pub fn negotiate<F: Fn(TextureFormat) -> bool>(renderable: F) -> Self {
        let pick = |chain: &[TextureFormat]| {
            chain
                .iter()
                .copied()
                .find(|format| renderable(*format))
                .unwrap_or(FALLBACK_FORMAT)
        };
        Self {
            rgba: pick(RGBA_CHAIN),
            rg: pick(RG_CHAIN),
            r: pick(R_CHAIN),
        }
    }

    pub fn get(&self, class: FieldClass) -> TextureFormat {
        match class {
            FieldClass::Rgba => self.rgba,
            FieldClass::Rg => self.rg,
            FieldClass::R => self.r,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub half_float: bool,
    pub linear_filtering: bool,
    pub formats: FieldFormats,
}

impl Capabilities {
    pub fn probe(adapter: &Adapter) -> Self {
        let renderable = |format: TextureFormat| {
            adapter
                .get_texture_format_features(format)
                .allowed_usages
                .contains(TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING)
        };
        let formats = FieldFormats::negotiate(renderable);
        let linear_filtering = adapter
            .get_texture_format_features(formats.rgba)
            .flags
            .contains(TextureFormatFeatureFlags::FILTERABLE);

        Self {
            half_float: renderable(TextureFormat::Rgba16Float),
            linear_filtering,
            formats,
        }
    }

    /// Apply the session-wide downgrades for missing linear filtering
    pub fn constrain(&self, config: &mut SimulationConfig) {
        if !self.linear_filtering {
            config.dye_resolution = UNFILTERED_DYE_RESOLUTION;
            config.shading = false;
        }
    }
}

/// Prefer a non-sRGB format; colors are already in display space
pub fn pick_surface_format(formats: &[TextureFormat]) -> Option<TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())
}

pub fn pick_alpha_mode(modes: &[CompositeAlphaMode], transparent: bool) -> CompositeAlphaMode {
    if transparent && modes.contains(&CompositeAlphaMode::PreMultiplied) {
        return CompositeAlphaMode::PreMultiplied;
    }
    modes.first().copied().unwrap_or(CompositeAlphaMode::Auto)
}

/// GPU context holding the device, queue and configured surface
pub struct GpuContext {
    pub surface: Surface<'static>,
    pub device: Device,
    pub queue: Queue,
    pub config: SurfaceConfiguration,
    pub capabilities: Capabilities,
}

impl GpuContext {
    /// Acquire the best context the platform offers, walking the backend chain
    pub async fn negotiate(window: Arc<Window>, transparent: bool) -> Result<Self, NegotiationError> {
        let mut last_error = NegotiationError::NoAdapter;
        for rung in Rung::CHAIN {
            match Self::try_rung(window.clone(), rung, transparent).await {
                Ok(context) => return Ok(context),
                Err(err) => {
                    log::warn!("{:?} context unavailable: {}", rung, err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn try_rung(window: Arc<Window>, rung: Rung, transparent: bool) -> Result<Self, NegotiationError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: rung.backends(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(NegotiationError::Surface)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: rung == Rung::Software,
            })
            .await
            .ok_or(NegotiationError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using GPU: {} ({:?})", info.name, info.backend);

        let capabilities = Capabilities::probe(&adapter);
        log::info!(
            "Half float: {}, linear filtering: {}, formats: {:?}",
            capabilities.half_float,
            capabilities.linear_filtering,
            capabilities.formats
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("fluid-backdrop-device"),
                    required_features: adapter.features()
                        & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(NegotiationError::Device)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format =
            pick_surface_format(&surface_caps.formats).ok_or(NegotiationError::UnsupportedSurface)?;
        let size = window.inner_size();
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: pick_alpha_mode(&surface_caps.alpha_modes, transparent),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            capabilities,
        })
    }

    /// Handle window resize
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format
    }

    /// Tear the device down now rather than whenever the last handle drops
    pub fn destroy(self) {
        self.device.destroy();
    }
}
