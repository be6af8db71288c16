//! Shader program families, their feature-flag variants, and the cache that
//! compiles each variant at most once.

use std::collections::HashMap;
use std::fmt;

use wgpu::{BlendState, Device, PipelineLayout, RenderPipeline, ShaderModule, TextureFormat};

use crate::simulation::ProgramKind;

const COMMON_SOURCE: &str = include_str!("../shaders/common.wgsl");

fn fragment_source(kind: ProgramKind) -> &'static str {
    match kind {
        ProgramKind::Copy => include_str!("../shaders/copy.wgsl"),
        ProgramKind::Clear => include_str!("../shaders/clear.wgsl"),
        ProgramKind::Splat => include_str!("../shaders/splat.wgsl"),
        ProgramKind::Advection => include_str!("../shaders/advection.wgsl"),
        ProgramKind::Divergence => include_str!("../shaders/divergence.wgsl"),
        ProgramKind::Curl => include_str!("../shaders/curl.wgsl"),
        ProgramKind::Vorticity => include_str!("../shaders/vorticity.wgsl"),
        ProgramKind::Pressure => include_str!("../shaders/pressure.wgsl"),
        ProgramKind::GradientSubtract => include_str!("../shaders/gradient_subtract.wgsl"),
        ProgramKind::Display => include_str!("../shaders/display.wgsl"),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    Shading,
    ManualFiltering,
}

impl Feature {
    pub const ALL: [Feature; 2] = [Feature::Shading, Feature::ManualFiltering];

    pub fn keyword(self) -> &'static str {
        match self {
            Feature::Shading => "SHADING",
            Feature::ManualFiltering => "MANUAL_FILTERING",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Feature::Shading => 1,
            Feature::ManualFiltering => 2,
        }
    }
}

/// Set of active feature toggles for one program variant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureSet(u8);

impl FeatureSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn active(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.into_iter().filter(|feature| self.contains(*feature))
    }

    /// Order-independent key: wrapping sum of each active keyword's hash
    pub fn hash(&self) -> i32 {
        self.active()
            .map(|feature| keyword_hash(feature.keyword()))
            .fold(0i32, i32::wrapping_add)
    }

    /// Features a program family compiles with under the session's settings
    pub fn for_program(kind: ProgramKind, shading: bool, manual_filtering: bool) -> Self {
        match kind {
            ProgramKind::Display if shading => Self::empty().with(Feature::Shading),
            ProgramKind::Advection if manual_filtering => {
                Self::empty().with(Feature::ManualFiltering)
            }
            _ => Self::empty(),
        }
    }
}

/// 32-bit string hash (`h = h * 31 + c`, wrapping)
pub fn keyword_hash(keyword: &str) -> i32 {
    keyword
        .chars()
        .fold(0i32, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i32))
}

/// Full WGSL source of a variant: flag constants, shared prelude, fragment stage
pub fn program_source(kind: ProgramKind, features: FeatureSet) -> String {
    let mut source = String::new();
    for feature in Feature::ALL {
        source.push_str(&format!(
            "const {}: bool = {};\n",
            feature.keyword(),
            features.contains(feature)
        ));
    }
    source.push_str(COMMON_SOURCE);
    source.push('\n');
    source.push_str(fragment_source(kind));
    source
}

/// A compile that failed validation but still produced a usable handle
pub struct ShaderError<P> {
    pub kind: ProgramKind,
    pub diagnostic: String,
    pub program: P,
}

impl<P> fmt::Debug for ShaderError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderError")
            .field("kind", &self.kind)
            .field("diagnostic", &self.diagnostic)
            .finish_non_exhaustive()
    }
}

impl<P> fmt::Display for ShaderError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} program failed to compile: {}", self.kind.label(), self.diagnostic)
    }
}

impl<P> std::error::Error for ShaderError<P> {}

pub trait ProgramCompiler {
    type Program;

    fn compile(
        &self,
        kind: ProgramKind,
        source: &str,
    ) -> Result<Self::Program, ShaderError<Self::Program>>;
}

/// Memoizes compiled programs by (family, feature hash)
pub struct ProgramCache<P> {
    programs: HashMap<(ProgramKind, i32), P>,
    diagnostics: Vec<String>,
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Cached variant, compiling it on first request. A failed compile is
    /// logged and recorded; its program is cached and returned regardless.
    pub fn get<C>(&mut self, compiler: &C, kind: ProgramKind, features: FeatureSet) -> &mut P
    where
        C: ProgramCompiler<Program = P>,
    {
        let diagnostics = &mut self.diagnostics;
        self.programs
            .entry((kind, features.hash()))
            .or_insert_with(|| {
                let source = program_source(kind, features);
                match compiler.compile(kind, &source) {
                    Ok(program) => program,
                    Err(err) => {
                        log::warn!("{}", err);
                        diagnostics.push(err.diagnostic);
                        err.program
                    }
                }
            })
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Drop every program; returns how many were released
    pub fn clear(&mut self) -> usize {
        let released = self.programs.len();
        self.programs.clear();
        released
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled module plus the pipelines built from it, one per target format
pub struct GpuProgram {
    kind: ProgramKind,
    module: ShaderModule,
    pipelines: HashMap<TextureFormat, RenderPipeline>,
}

impl GpuProgram {
    fn new(kind: ProgramKind, module: ShaderModule) -> Self {
        Self {
            kind,
            module,
            pipelines: HashMap::new(),
        }
    }

    pub fn pipeline(
        &mut self,
        device: &Device,
        layout: &PipelineLayout,
        format: TextureFormat,
    ) -> &RenderPipeline {
        let Self {
            kind,
            module,
            pipelines,
        } = self;
        let kind = *kind;
        let module: &ShaderModule = module;
        pipelines.entry(format).or_insert_with(|| {
            // Display composites over the cleared surface, everything else overwrites
            let blend = match kind {
                ProgramKind::Display => BlendState::PREMULTIPLIED_ALPHA_BLENDING,
                _ => BlendState::REPLACE,
            };
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(kind.label()),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }
}

impl ProgramCompiler for Device {
    type Program = GpuProgram;

    fn compile(&self, kind: ProgramKind, source: &str) -> Result<GpuProgram, ShaderError<GpuProgram>> {
        self.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kind.label()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let error = pollster::block_on(self.pop_error_scope());

        let program = GpuProgram::new(kind, module);
        match error {
            None => Ok(program),
            Some(err) => Err(ShaderError {
                kind,
                diagnostic: err.to_string(),
                program,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Stands in for the GPU: hands out numbered programs and counts compiles
    struct CountingCompiler {
        compiles: Cell<usize>,
        fail: bool,
    }

    impl CountingCompiler {
        fn new(fail: bool) -> Self {
            Self {
                compiles: Cell::new(0),
                fail,
            }
        }
    }

    impl ProgramCompiler for CountingCompiler {
        type Program = (usize, String);

        fn compile(
            &self,
            kind: ProgramKind,
            source: &str,
        ) -> Result<(usize, String), ShaderError<(usize, String)>> {
            let id = self.compiles.get();
            self.compiles.set(id + 1);
            let program = (id, source.to_string());
            if self.fail {
                Err(ShaderError {
                    kind,
                    diagnostic: format!("error in {}", kind.label()),
                    program,
                })
            } else {
                Ok(program)
            }
        }
    }

    #[test]
    fn test_keyword_hash_matches_known_values() {
        assert_eq!(keyword_hash(""), 0);
        assert_eq!(keyword_hash("SHADING"), -1523179638);
        assert_eq!(keyword_hash("MANUAL_FILTERING"), -310714351);
    }

    #[test]
    fn test_feature_hash_is_order_independent_sum() {
        let a = FeatureSet::empty()
            .with(Feature::Shading)
            .with(Feature::ManualFiltering);
        let b = FeatureSet::empty()
            .with(Feature::ManualFiltering)
            .with(Feature::Shading);
        assert_eq!(a, b);
        assert_eq!(a.hash(), -1833893989);
        assert_eq!(FeatureSet::empty().hash(), 0);
    }

    #[test]
    fn test_cache_hit_skips_compiler() {
        let compiler = CountingCompiler::new(false);
        let mut cache = ProgramCache::new();
        let shaded = FeatureSet::empty().with(Feature::Shading);

        let first = cache.get(&compiler, ProgramKind::Display, shaded).0;
        let second = cache.get(&compiler, ProgramKind::Display, shaded).0;
        assert_eq!(first, second);
        assert_eq!(compiler.compiles.get(), 1);

        cache.get(&compiler, ProgramKind::Display, FeatureSet::empty());
        cache.get(&compiler, ProgramKind::Copy, FeatureSet::empty());
        assert_eq!(compiler.compiles.get(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_failed_compile_is_recorded_and_still_returned() {
        let compiler = CountingCompiler::new(true);
        let mut cache = ProgramCache::new();

        let program = cache.get(&compiler, ProgramKind::Curl, FeatureSet::empty());
        assert_eq!(program.0, 0);
        assert_eq!(cache.diagnostics(), &["error in curl".to_string()]);

        // The broken program is cached like any other
        cache.get(&compiler, ProgramKind::Curl, FeatureSet::empty());
        assert_eq!(compiler.compiles.get(), 1);
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_source_declares_every_flag() {
        let source = program_source(
            ProgramKind::Advection,
            FeatureSet::for_program(ProgramKind::Advection, true, true),
        );
        assert!(source.starts_with("const SHADING: bool = false;\nconst MANUAL_FILTERING: bool = true;\n"));
        assert!(source.contains("fn vs_main"));
        assert!(source.contains("fn fs_main"));
    }

    #[test]
    fn test_features_only_apply_to_their_family() {
        assert!(FeatureSet::for_program(ProgramKind::Display, true, true).contains(Feature::Shading));
        assert_eq!(
            FeatureSet::for_program(ProgramKind::Display, false, true),
            FeatureSet::empty()
        );
        assert_eq!(
            FeatureSet::for_program(ProgramKind::Pressure, true, true),
            FeatureSet::empty()
        );
    }
}
