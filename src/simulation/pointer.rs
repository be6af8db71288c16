use rand::Rng;

use crate::config::Theme;
use crate::simulation::passes::Splat;

/// One tracked input point, in texture space (origin bottom-left, 0..1).
#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    pub id: i32,
    pub texcoord: [f32; 2],
    pub prev_texcoord: [f32; 2],
    /// Aspect-corrected motion since the previous event
    pub delta: [f32; 2],
    /// Set by input, cleared once the stepper has splatted it
    pub moved: bool,
    pub color: [f32; 3],
    placed: bool,
}

impl Pointer {
    fn new(id: i32, color: [f32; 3]) -> Self {
        Self {
            id,
            texcoord: [0.0, 0.0],
            prev_texcoord: [0.0, 0.0],
            delta: [0.0, 0.0],
            moved: false,
            color,
            placed: false,
        }
    }
}

/// Converts raw pointer motion into splat requests and cycles pointer colors.
///
/// Only a single pointer is tracked; the state is kept as a list so further
/// pointers (touch) can be added without changing the stepper.
pub struct PointerTracker {
    pointers: Vec<Pointer>,
    brightness: f32,
    color_timer: f32,
}

impl PointerTracker {
    pub fn new<R: Rng>(theme: Theme, rng: &mut R) -> Self {
        let brightness = theme.brightness();
        Self {
            pointers: vec![Pointer::new(-1, generate_color(rng, brightness))],
            brightness,
            color_timer: 0.0,
        }
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    /// Feed a move event in surface pixels (y down).
    ///
    /// The first event only places the pointer, so entering the surface does
    /// not splat a stroke from the origin.
    pub fn pointer_moved(&mut self, x: f32, y: f32, surface_width: u32, surface_height: u32) {
        if surface_width == 0 || surface_height == 0 {
            return;
        }
        let aspect_ratio = surface_width as f32 / surface_height as f32;
        let pointer = &mut self.pointers[0];

        pointer.prev_texcoord = pointer.texcoord;
        pointer.texcoord = [
            x / surface_width as f32,
            1.0 - y / surface_height as f32,
        ];

        if !pointer.placed {
            pointer.id = 0;
            pointer.placed = true;
            pointer.prev_texcoord = pointer.texcoord;
        }

        pointer.delta = [
            correct_delta_x(pointer.texcoord[0] - pointer.prev_texcoord[0], aspect_ratio),
            correct_delta_y(pointer.texcoord[1] - pointer.prev_texcoord[1], aspect_ratio),
        ];
        pointer.moved = pointer.delta[0].abs() > 0.0 || pointer.delta[1].abs() > 0.0;
    }

    /// Advance the color-cycle timer; on wrap every pointer gets a new color
    pub fn update_colors<R: Rng>(&mut self, dt: f32, speed: f32, rng: &mut R) {
        self.color_timer += dt * speed;
        if self.color_timer >= 1.0 {
            self.color_timer = wrap(self.color_timer, 0.0, 1.0);
            for pointer in &mut self.pointers {
                pointer.color = generate_color(rng, self.brightness);
            }
        }
    }

    /// Consume every pending movement as a splat request
    pub fn take_splats(&mut self) -> Vec<Splat> {
        self.pointers
            .iter_mut()
            .filter(|pointer| pointer.moved)
            .map(|pointer| {
                pointer.moved = false;
                Splat {
                    point: pointer.texcoord,
                    delta: pointer.delta,
                    color: pointer.color,
                }
            })
            .collect()
    }
}

fn correct_delta_x(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio < 1.0 {
        delta * aspect_ratio
    } else {
        delta
    }
}

fn correct_delta_y(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        delta / aspect_ratio
    } else {
        delta
    }
}

fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return min;
    }
    (value - min) % range + min
}

/// Random fully saturated hue, scaled by the theme brightness
pub fn generate_color<R: Rng>(rng: &mut R, brightness: f32) -> [f32; 3] {
    let [r, g, b] = hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0);
    [r * brightness, g * brightness, b * brightness]
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    match (sector as i32).rem_euclid(6) {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}
