use std::collections::HashMap;

use crate::simulation::passes::Backend;

/// Channel layout a field needs; the backend maps it to a concrete format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldClass {
    Rgba,
    Rg,
    R,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetInfo {
    pub width: u32,
    pub height: u32,
    pub class: FieldClass,
}

fn texel_size(width: u32, height: u32) -> [f32; 2] {
    [1.0 / width as f32, 1.0 / height as f32]
}

/// Two equally sized targets with swappable read/write roles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoubleBuffer {
    read: TargetId,
    write: TargetId,
    pub width: u32,
    pub height: u32,
}

impl DoubleBuffer {
    pub fn read(&self) -> TargetId {
        self.read
    }

    pub fn write(&self) -> TargetId {
        self.write
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }

    pub fn texel_size(&self) -> [f32; 2] {
        texel_size(self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Velocity,
    Dye,
    Pressure,
    Divergence,
    Curl,
}

/// Targets for every simulated field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fields {
    pub velocity: DoubleBuffer,
    pub dye: DoubleBuffer,
    pub pressure: DoubleBuffer,
    pub divergence: TargetId,
    pub curl: TargetId,
}

impl Fields {
    fn double(&self, field: Field) -> Option<&DoubleBuffer> {
        match field {
            Field::Velocity => Some(&self.velocity),
            Field::Dye => Some(&self.dye),
            Field::Pressure => Some(&self.pressure),
            Field::Divergence | Field::Curl => None,
        }
    }

    fn single(&self, field: Field) -> TargetId {
        match field {
            Field::Divergence => self.divergence,
            Field::Curl => self.curl,
            Field::Velocity => self.velocity.read,
            Field::Dye => self.dye.read,
            Field::Pressure => self.pressure.read,
        }
    }

    /// Target a pass samples when it names `field` as an input
    pub fn read(&self, field: Field) -> TargetId {
        self.double(field)
            .map(DoubleBuffer::read)
            .unwrap_or_else(|| self.single(field))
    }

    /// Target a pass renders into when it names `field` as its output
    pub fn write(&self, field: Field) -> TargetId {
        self.double(field)
            .map(DoubleBuffer::write)
            .unwrap_or_else(|| self.single(field))
    }

    /// Swap a double-buffered field; single targets are left alone
    pub fn swap(&mut self, field: Field) {
        match field {
            Field::Velocity => self.velocity.swap(),
            Field::Dye => self.dye.swap(),
            Field::Pressure => self.pressure.swap(),
            Field::Divergence | Field::Curl => {}
        }
    }
}

/// Grid size for a major-axis `resolution` on a surface of the given size.
///
/// The shorter side gets `resolution` texels and the longer side is scaled by
/// the aspect ratio, whichever way the surface is oriented.
pub fn grid_resolution(resolution: u32, surface_width: u32, surface_height: u32) -> (u32, u32) {
    let width = surface_width.max(1) as f32;
    let height = surface_height.max(1) as f32;
    let mut aspect_ratio = width / height;
    if aspect_ratio < 1.0 {
        aspect_ratio = 1.0 / aspect_ratio;
    }

    let min = resolution;
    let max = (resolution as f32 * aspect_ratio).round() as u32;

    if surface_width > surface_height {
        (max, min)
    } else {
        (min, max)
    }
}

struct Slot<T> {
    info: TargetInfo,
    target: T,
}

/// Owns every offscreen target; each one is released exactly once.
pub struct FramebufferPool<T> {
    slots: HashMap<TargetId, Slot<T>>,
    next_id: u32,
    fields: Option<Fields>,
}

impl<T> FramebufferPool<T> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 0,
            fields: None,
        }
    }

    pub fn get(&self, id: TargetId) -> Option<&T> {
        self.slots.get(&id).map(|slot| &slot.target)
    }

    pub fn info(&self, id: TargetId) -> Option<TargetInfo> {
        self.slots.get(&id).map(|slot| slot.info)
    }

    /// Number of live targets
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn fields(&self) -> Option<&Fields> {
        self.fields.as_ref()
    }

    pub fn fields_mut(&mut self) -> Option<&mut Fields> {
        self.fields.as_mut()
    }

    pub fn create_target<B>(&mut self, backend: &mut B, width: u32, height: u32, class: FieldClass) -> TargetId
    where
        B: Backend<Target = T>,
    {
        let id = TargetId(self.next_id);
        self.next_id += 1;
        let target = backend.create_target(width, height, class);
        self.slots.insert(
            id,
            Slot {
                info: TargetInfo { width, height, class },
                target,
            },
        );
        id
    }

    pub fn create_double_target<B>(&mut self, backend: &mut B, width: u32, height: u32, class: FieldClass) -> DoubleBuffer
    where
        B: Backend<Target = T>,
    {
        DoubleBuffer {
            read: self.create_target(backend, width, height, class),
            write: self.create_target(backend, width, height, class),
            width,
            height,
        }
    }

    /// Resize keeping content: the read side is resampled through the copy
    /// pass, the write side starts empty. Both old targets are released.
    pub fn resize_double_target<B>(&mut self, backend: &mut B, buffer: DoubleBuffer, width: u32, height: u32) -> DoubleBuffer
    where
        B: Backend<Target = T>,
    {
        if buffer.width == width && buffer.height == height {
            return buffer;
        }
        let Some(class) = self.info(buffer.read).map(|info| info.class) else {
            return buffer;
        };

        let read = self.create_target(backend, width, height, class);
        if let (Some(source), Some(destination)) = (self.get(buffer.read), self.get(read)) {
            backend.copy_target(source, destination);
        }
        let write = self.create_target(backend, width, height, class);

        self.release(backend, buffer.read);
        self.release(backend, buffer.write);

        DoubleBuffer {
            read,
            write,
            width,
            height,
        }
    }

    pub fn release<B>(&mut self, backend: &mut B, id: TargetId)
    where
        B: Backend<Target = T>,
    {
        if let Some(slot) = self.slots.remove(&id) {
            backend.release_target(slot.target);
        }
    }

    /// (Re)build every field for the given simulation and dye grid sizes.
    ///
    /// Velocity and dye keep their content across a resize; pressure,
    /// divergence and curl are transient and always start from zero.
    pub fn rebuild<B>(&mut self, backend: &mut B, sim: (u32, u32), dye: (u32, u32))
    where
        B: Backend<Target = T>,
    {
        let (sim_width, sim_height) = sim;
        let (dye_width, dye_height) = dye;

        let (velocity, dye) = match self.fields.take() {
            None => (
                self.create_double_target(backend, sim_width, sim_height, FieldClass::Rg),
                self.create_double_target(backend, dye_width, dye_height, FieldClass::Rgba),
            ),
            Some(old) => {
                self.release(backend, old.divergence);
                self.release(backend, old.curl);
                self.release(backend, old.pressure.read);
                self.release(backend, old.pressure.write);
                (
                    self.resize_double_target(backend, old.velocity, sim_width, sim_height),
                    self.resize_double_target(backend, old.dye, dye_width, dye_height),
                )
            }
        };

        let divergence = self.create_target(backend, sim_width, sim_height, FieldClass::R);
        let curl = self.create_target(backend, sim_width, sim_height, FieldClass::R);
        let pressure = self.create_double_target(backend, sim_width, sim_height, FieldClass::R);

        self.fields = Some(Fields {
            velocity,
            dye,
            pressure,
            divergence,
            curl,
        });
    }

    /// Release every remaining target; returns how many were freed
    pub fn release_all<B>(&mut self, backend: &mut B) -> usize
    where
        B: Backend<Target = T>,
    {
        self.fields = None;
        let released = self.slots.len();
        for (_, slot) in self.slots.drain() {
            backend.release_target(slot.target);
        }
        released
    }
}

impl<T> Default for FramebufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::reference::ReferenceBackend;

    #[test]
    fn test_swap_involution() {
        let mut backend = ReferenceBackend::new(8, 8);
        let mut pool = FramebufferPool::new();
        let original = pool.create_double_target(&mut backend, 4, 4, FieldClass::Rg);

        let mut buffer = original;
        buffer.swap();
        assert_eq!(buffer.read(), original.write());
        assert_eq!(buffer.write(), original.read());
        buffer.swap();
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_landscape_resolution() {
        assert_eq!(grid_resolution(128, 1920, 1080), (228, 128));
    }

    #[test]
    fn test_portrait_resolution() {
        assert_eq!(grid_resolution(128, 1080, 1920), (128, 228));
    }

    #[test]
    fn test_square_resolution() {
        assert_eq!(grid_resolution(128, 500, 500), (128, 128));
    }

    #[test]
    fn test_rebuild_allocates_every_field() {
        let mut backend = ReferenceBackend::new(8, 8);
        let mut pool = FramebufferPool::new();
        pool.rebuild(&mut backend, (32, 16), (64, 32));

        let fields = *pool.fields().unwrap();
        assert_eq!(pool.len(), 8);
        assert_eq!(pool.info(fields.velocity.read()).unwrap().class, FieldClass::Rg);
        assert_eq!(pool.info(fields.dye.write()).unwrap().width, 64);
        assert_eq!(pool.info(fields.curl).unwrap().class, FieldClass::R);
        assert_eq!(fields.velocity.texel_size(), [1.0 / 32.0, 1.0 / 16.0]);
        assert_eq!(fields.read(Field::Curl), fields.write(Field::Curl));
        assert_ne!(fields.read(Field::Pressure), fields.write(Field::Pressure));
    }

    #[test]
    fn test_resize_preserves_content_and_releases_old_targets() {
        let mut backend = ReferenceBackend::new(8, 8);
        let mut pool = FramebufferPool::new();
        pool.rebuild(&mut backend, (16, 16), (16, 16));
        let old = *pool.fields().unwrap();
        backend.fill(pool.get(old.dye.read()).unwrap(), |_, _| [0.5, 0.25, 0.125, 1.0]);

        pool.rebuild(&mut backend, (16, 8), (32, 16));
        let new = *pool.fields().unwrap();

        assert_eq!(pool.len(), 8, "superseded targets must be released");
        assert_eq!(backend.live_targets(), 8);
        assert!(pool.get(old.dye.read()).is_none());
        assert!(pool.get(old.pressure.read()).is_none());
        assert_eq!(pool.info(new.dye.read()).unwrap().width, 32);

        backend.for_each_texel(pool.get(new.dye.read()).unwrap(), |_, _, value| {
            assert!((value[0] - 0.5).abs() < 1e-6);
        });
        backend.for_each_texel(pool.get(new.dye.write()).unwrap(), |_, _, value| {
            assert_eq!(value, [0.0; 4]);
        });
    }

    #[test]
    fn test_unchanged_size_keeps_velocity_and_dye() {
        let mut backend = ReferenceBackend::new(8, 8);
        let mut pool = FramebufferPool::new();
        pool.rebuild(&mut backend, (16, 16), (32, 32));
        let old = *pool.fields().unwrap();

        pool.rebuild(&mut backend, (16, 16), (32, 32));
        let new = *pool.fields().unwrap();
        assert_eq!(new.velocity, old.velocity);
        assert_eq!(new.dye, old.dye);
        assert_ne!(new.pressure, old.pressure);
        assert_ne!(new.divergence, old.divergence);
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_release_all_frees_each_target_once() {
        let mut backend = ReferenceBackend::new(8, 8);
        let mut pool = FramebufferPool::new();
        pool.rebuild(&mut backend, (16, 16), (32, 32));
        pool.rebuild(&mut backend, (8, 16), (16, 32));

        assert_eq!(pool.release_all(&mut backend), 8);
        assert_eq!(pool.len(), 0);
        assert!(pool.fields().is_none());
        assert_eq!(backend.live_targets(), 0);
        assert_eq!(pool.release_all(&mut backend), 0);
    }
}
