//! CPU rendition of every pass, texel for texel the same math as the WGSL
//! programs. Tests use it to check field-level behavior without a GPU.

use std::cell::RefCell;

use crate::simulation::passes::{Backend, PassDescriptor, PassOutput, PassUniforms, ProgramKind, Stage};
use crate::simulation::pool::FieldClass;

type Texel = [f32; 4];

pub struct ReferenceTarget {
    width: u32,
    height: u32,
    class: FieldClass,
    texels: RefCell<Vec<Texel>>,
}

impl ReferenceTarget {
    fn new(width: u32, height: u32, class: FieldClass) -> Self {
        Self {
            width,
            height,
            class,
            texels: RefCell::new(vec![[0.0; 4]; (width * height) as usize]),
        }
    }

    fn uv(&self, index: usize) -> [f32; 2] {
        let x = (index as u32 % self.width) as f32 + 0.5;
        let y = (index as u32 / self.width) as f32 + 0.5;
        [x / self.width as f32, y / self.height as f32]
    }

    fn store(&self, texels: Vec<Texel>) {
        let mask = match self.class {
            FieldClass::Rgba => [1.0, 1.0, 1.0, 1.0],
            FieldClass::Rg => [1.0, 1.0, 0.0, 0.0],
            FieldClass::R => [1.0, 0.0, 0.0, 0.0],
        };
        *self.texels.borrow_mut() = texels
            .into_iter()
            .map(|t| [t[0] * mask[0], t[1] * mask[1], t[2] * mask[2], t[3] * mask[3]])
            .collect();
    }
}

/// Bilinear, clamp-to-edge sampling with texel centers at (i + 0.5) / size
fn sample(target: &ReferenceTarget, texels: &[Texel], uv: [f32; 2]) -> Texel {
    let (width, height) = (target.width as i64, target.height as i64);
    let sx = uv[0] * width as f32 - 0.5;
    let sy = uv[1] * height as f32 - 0.5;
    let (x0, y0) = (sx.floor(), sy.floor());
    let (fx, fy) = (sx - x0, sy - y0);

    let fetch = |x: i64, y: i64| -> Texel {
        let x = x.clamp(0, width - 1);
        let y = y.clamp(0, height - 1);
        texels[(y * width + x) as usize]
    };
    let (x0, y0) = (x0 as i64, y0 as i64);
    let a = fetch(x0, y0);
    let b = fetch(x0 + 1, y0);
    let c = fetch(x0, y0 + 1);
    let d = fetch(x0 + 1, y0 + 1);

    let mut out = [0.0; 4];
    for i in 0..4 {
        let bottom = a[i] + (b[i] - a[i]) * fx;
        let top = c[i] + (d[i] - c[i]) * fx;
        out[i] = bottom + (top - bottom) * fy;
    }
    out
}

struct Neighbors {
    uv: [f32; 2],
    l: [f32; 2],
    r: [f32; 2],
    t: [f32; 2],
    b: [f32; 2],
}

impl Neighbors {
    fn new(uv: [f32; 2], texel: [f32; 2]) -> Self {
        Self {
            uv,
            l: [uv[0] - texel[0], uv[1]],
            r: [uv[0] + texel[0], uv[1]],
            t: [uv[0], uv[1] + texel[1]],
            b: [uv[0], uv[1] - texel[1]],
        }
    }
}

fn divergence<F: Fn([f32; 2]) -> Texel>(velocity: F, n: &Neighbors) -> f32 {
    let center = velocity(n.uv);
    let mut left = velocity(n.l)[0];
    let mut right = velocity(n.r)[0];
    let mut top = velocity(n.t)[1];
    let mut bottom = velocity(n.b)[1];
    if n.l[0] < 0.0 {
        left = -center[0];
    }
    if n.r[0] > 1.0 {
        right = -center[0];
    }
    if n.t[1] > 1.0 {
        top = -center[1];
    }
    if n.b[1] < 0.0 {
        bottom = -center[1];
    }
    0.5 * (right - left + top - bottom)
}

fn shade<A, B>(program: ProgramKind, u: &PassUniforms, n: &Neighbors, a: A, b: B) -> Texel
where
    A: Fn([f32; 2]) -> Texel,
    B: Fn([f32; 2]) -> Texel,
{
    match program {
        ProgramKind::Copy => a(n.uv),
        ProgramKind::Clear => a(n.uv).map(|c| c * u.value),
        ProgramKind::Splat => {
            let px = (n.uv[0] - u.point[0]) * u.aspect_ratio;
            let py = n.uv[1] - u.point[1];
            let weight = (-(px * px + py * py) / u.radius).exp();
            let base = a(n.uv);
            [
                base[0] + weight * u.color[0],
                base[1] + weight * u.color[1],
                base[2] + weight * u.color[2],
                1.0,
            ]
        }
        ProgramKind::Advection => {
            let velocity = a(n.uv);
            let coord = [
                n.uv[0] - u.dt * velocity[0] * u.texel_size[0],
                n.uv[1] - u.dt * velocity[1] * u.texel_size[1],
            ];
            let decay = 1.0 + u.dissipation * u.dt;
            b(coord).map(|c| c / decay)
        }
        ProgramKind::Divergence => [divergence(a, n), 0.0, 0.0, 1.0],
        ProgramKind::Curl => {
            let vorticity = a(n.r)[1] - a(n.l)[1] - a(n.t)[0] + a(n.b)[0];
            [0.5 * vorticity, 0.0, 0.0, 1.0]
        }
        ProgramKind::Vorticity => {
            let (l, r, t, bt, c) = (b(n.l)[0], b(n.r)[0], b(n.t)[0], b(n.b)[0], b(n.uv)[0]);
            let mut force = [0.5 * (t.abs() - bt.abs()), 0.5 * (r.abs() - l.abs())];
            let length = (force[0] * force[0] + force[1] * force[1]).sqrt() + 0.0001;
            force = [force[0] / length * u.curl * c, -(force[1] / length * u.curl * c)];
            let velocity = a(n.uv);
            [
                (velocity[0] + force[0] * u.dt).clamp(-u.value, u.value),
                (velocity[1] + force[1] * u.dt).clamp(-u.value, u.value),
                0.0,
                1.0,
            ]
        }
        ProgramKind::Pressure => {
            let sum = a(n.l)[0] + a(n.r)[0] + a(n.b)[0] + a(n.t)[0];
            [(sum - b(n.uv)[0]) * 0.25, 0.0, 0.0, 1.0]
        }
        ProgramKind::GradientSubtract => {
            let velocity = b(n.uv);
            [
                velocity[0] - (a(n.r)[0] - a(n.l)[0]),
                velocity[1] - (a(n.t)[0] - a(n.b)[0]),
                0.0,
                1.0,
            ]
        }
        ProgramKind::Display => {
            let c = a(n.uv);
            let alpha = c[0].max(c[1]).max(c[2]);
            [c[0], c[1], c[2], alpha]
        }
    }
}

pub struct ReferenceBackend {
    surface_size: (u32, u32),
    surface: Vec<Texel>,
    executed: Vec<Stage>,
    live_targets: usize,
}

impl ReferenceBackend {
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        Self {
            surface_size: (surface_width, surface_height),
            surface: Vec::new(),
            executed: Vec::new(),
            live_targets: 0,
        }
    }

    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.surface_size = (width, height);
    }

    /// Stages run so far, in order
    pub fn executed(&self) -> &[Stage] {
        &self.executed
    }

    pub fn clear_executed(&mut self) {
        self.executed.clear();
    }

    pub fn live_targets(&self) -> usize {
        self.live_targets
    }

    /// Last composited frame
    pub fn surface(&self) -> &[Texel] {
        &self.surface
    }

    pub fn fill<F: Fn(f32, f32) -> Texel>(&self, target: &ReferenceTarget, f: F) {
        let texels = (0..(target.width * target.height) as usize)
            .map(|index| {
                let [x, y] = target.uv(index);
                f(x, y)
            })
            .collect();
        target.store(texels);
    }

    pub fn for_each_texel<F: FnMut(f32, f32, Texel)>(&self, target: &ReferenceTarget, mut f: F) {
        for (index, texel) in target.texels.borrow().iter().enumerate() {
            let [x, y] = target.uv(index);
            f(x, y, *texel);
        }
    }
}

impl Backend for ReferenceBackend {
    type Target = ReferenceTarget;

    fn create_target(&mut self, width: u32, height: u32, class: FieldClass) -> ReferenceTarget {
        self.live_targets += 1;
        ReferenceTarget::new(width, height, class)
    }

    fn release_target(&mut self, _target: ReferenceTarget) {
        self.live_targets -= 1;
    }

    fn copy_target(&mut self, source: &ReferenceTarget, destination: &ReferenceTarget) {
        let texels = source.texels.borrow();
        let out = (0..(destination.width * destination.height) as usize)
            .map(|index| sample(source, &texels, destination.uv(index)))
            .collect();
        destination.store(out);
    }

    fn run_pass(
        &mut self,
        pass: &PassDescriptor,
        inputs: &[&ReferenceTarget],
        output: PassOutput<'_, ReferenceTarget>,
    ) {
        if matches!(output, PassOutput::Surface) && pass.surface_clear().is_none() {
            log::warn!("Skipping {:?}: field pass routed to the surface", pass.stage);
            return;
        }
        self.executed.push(pass.stage);
        let Some(&first) = inputs.first() else {
            return;
        };
        let second = inputs.get(1).copied().unwrap_or(first);
        let a_texels = first.texels.borrow();
        let b_texels = second.texels.borrow();
        let a = |uv| sample(first, &a_texels, uv);
        let b = |uv| sample(second, &b_texels, uv);
        let program = pass.stage.program();

        let (width, height) = match output {
            PassOutput::Target(target) => (target.width, target.height),
            PassOutput::Surface => self.surface_size,
        };
        let out: Vec<Texel> = (0..width * height)
            .map(|index| {
                let uv = [
                    ((index % width) as f32 + 0.5) / width as f32,
                    ((index / width) as f32 + 0.5) / height as f32,
                ];
                shade(program, &pass.uniforms, &Neighbors::new(uv, pass.uniforms.texel_size), a, b)
            })
            .collect();

        match output {
            PassOutput::Target(target) => target.store(out),
            PassOutput::Surface => self.surface = out,
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }
}

/// Mean |divergence| of a velocity target, using the divergence pass stencil
pub fn mean_abs_divergence(_backend: &ReferenceBackend, velocity: &ReferenceTarget) -> f32 {
    let texels = velocity.texels.borrow();
    let texel = [1.0 / velocity.width as f32, 1.0 / velocity.height as f32];
    let count = texels.len();
    let total: f32 = (0..count)
        .map(|index| {
            let n = Neighbors::new(velocity.uv(index), texel);
            divergence(|uv| sample(velocity, &texels, uv), &n).abs()
        })
        .sum();
    total / count as f32
}
