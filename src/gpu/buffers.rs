use wgpu::{Buffer, BufferUsages, Device, Queue};

use crate::simulation::PassUniforms;

/// Size of one pass's uniform block
pub const UNIFORM_SIZE: u64 = std::mem::size_of::<PassUniforms>() as u64;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

/// CPU side of the arena: one aligned slot per pass, filled during a frame
pub struct UniformSlots {
    stride: u64,
    capacity: usize,
    staging: Vec<u8>,
}

impl UniformSlots {
    pub fn new(alignment: u64, capacity: usize) -> Self {
        Self {
            stride: align_up(UNIFORM_SIZE, alignment),
            capacity,
            staging: Vec::new(),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        (self.staging.len() as u64 / self.stride) as usize
    }

    /// Start a frame; returns `true` if the capacity had to grow
    pub fn reset(&mut self, pass_budget: usize) -> bool {
        self.staging.clear();
        if pass_budget <= self.capacity {
            return false;
        }
        self.capacity = pass_budget.next_power_of_two();
        true
    }

    /// Byte offset of the new slot, or `None` once the frame's slots are used up
    pub fn push(&mut self, uniforms: &PassUniforms) -> Option<u32> {
        if self.len() >= self.capacity {
            return None;
        }
        let offset = self.staging.len();
        self.staging.extend_from_slice(bytemuck::bytes_of(uniforms));
        self.staging.resize(offset + self.stride as usize, 0);
        Some(offset as u32)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.staging
    }
}

/// Per-frame uniform storage bound with a dynamic offset per pass
pub struct UniformArena {
    buffer: Buffer,
    slots: UniformSlots,
}

impl UniformArena {
    pub fn new(device: &Device, capacity: usize) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let slots = UniformSlots::new(alignment, capacity);
        Self {
            buffer: Self::create_buffer(device, &slots),
            slots,
        }
    }

    fn create_buffer(device: &Device, slots: &UniformSlots) -> Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pass-uniforms"),
            size: slots.stride() * slots.capacity() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Make room for `pass_budget` passes before any of them is recorded
    pub fn begin_frame(&mut self, device: &Device, pass_budget: usize) {
        if self.slots.reset(pass_budget) {
            log::debug!("Growing uniform arena to {} slots", self.slots.capacity());
            self.buffer = Self::create_buffer(device, &self.slots);
        }
    }

    pub fn push(&mut self, uniforms: &PassUniforms) -> Option<u32> {
        self.slots.push(uniforms)
    }

    /// Upload everything recorded this frame; call before submitting
    pub fn flush(&self, queue: &Queue) {
        let bytes = self.slots.bytes();
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(64, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(64, 0), 64);
    }

    #[test]
    fn test_slots_are_aligned_and_bounded() {
        let mut slots = UniformSlots::new(256, 2);
        let uniforms = PassUniforms {
            dt: 0.5,
            ..Default::default()
        };
        assert_eq!(slots.push(&uniforms), Some(0));
        assert_eq!(slots.push(&uniforms), Some(256));
        assert_eq!(slots.push(&uniforms), None);
        assert_eq!(slots.bytes().len(), 512);

        // dt sits at byte 24 of the block
        let dt = f32::from_ne_bytes(slots.bytes()[256 + 24..256 + 28].try_into().unwrap());
        assert_eq!(dt, 0.5);
    }

    #[test]
    fn test_reset_grows_to_budget() {
        let mut slots = UniformSlots::new(64, 8);
        slots.push(&PassUniforms::default());
        assert!(!slots.reset(8));
        assert_eq!(slots.len(), 0);

        assert!(slots.reset(33));
        assert_eq!(slots.capacity(), 64);
        assert_eq!(slots.stride(), 64);
    }
}
