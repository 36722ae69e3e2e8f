//! Ray records and ray buffers.
//!
//! The compaction core only ever asks a ray one question: is it still alive?
//! [`Ray`] captures that; [`PathRay`] is the concrete GPU-layout record the
//! path tracer produces, and [`RayBuffer`] is a fixed-capacity buffer with a
//! logical length.

use bytemuck::{Pod, Zeroable};

use crate::util::{Error, Result};

/// A ray record the compactor can classify.
///
/// The predicate must be total: every ray is either active or terminated.
pub trait Ray: Copy + Send + Sync {
    /// Whether the ray survives into the next bounce.
    fn is_active(&self) -> bool;
}

/// Ray left the scene without hitting anything.
pub const RAY_MISSED: u32 = 1 << 0;
/// Ray hit an emitter; its contribution is final.
pub const RAY_HIT_LIGHT: u32 = 1 << 1;
/// Throughput dropped to zero (absorbed or killed by roulette).
pub const RAY_ABSORBED: u32 = 1 << 2;
/// Any flag that ends a path.
pub const RAY_TERMINATED: u32 = RAY_MISSED | RAY_HIT_LIGHT | RAY_ABSORBED;

/// GPU-friendly path ray (48 bytes, matches the WGSL `PathRay` struct).
///
/// Every `vec3` is followed by a `u32` so the layout matches WGSL storage
/// alignment without explicit padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PathRay {
    pub origin: [f32; 3],
    /// Bounces left before the path is cut.
    pub remaining_bounces: u32,
    pub direction: [f32; 3],
    /// Framebuffer pixel this path contributes to.
    pub pixel_index: u32,
    /// Accumulated path throughput.
    pub throughput: [f32; 3],
    /// `RAY_*` termination flags.
    pub flags: u32,
}

impl PathRay {
    /// New primary ray with full throughput.
    pub fn new(origin: [f32; 3], direction: [f32; 3], pixel_index: u32, max_bounces: u32) -> Self {
        Self {
            origin,
            remaining_bounces: max_bounces,
            direction,
            pixel_index,
            throughput: [1.0; 3],
            flags: 0,
        }
    }

    /// Mark the ray terminated with the given `RAY_*` flag.
    #[inline]
    pub fn terminate(&mut self, flag: u32) {
        self.flags |= flag & RAY_TERMINATED;
    }

    /// Raw bytes of a ray slice for GPU upload.
    pub fn as_bytes(rays: &[PathRay]) -> &[u8] {
        bytemuck::cast_slice(rays)
    }
}

impl Ray for PathRay {
    #[inline]
    fn is_active(&self) -> bool {
        self.remaining_bounces > 0 && self.flags & RAY_TERMINATED == 0
    }
}

/// Fixed-capacity ray storage with a logical length.
///
/// Slots past `len` are allocated but hold no meaningful rays.
#[derive(Debug, Clone)]
pub struct RayBuffer<R> {
    data: Vec<R>,
    len: usize,
}

impl<R: Ray + Default> RayBuffer<R> {
    /// Empty buffer able to hold `capacity` rays.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![R::default(); capacity],
            len: 0,
        }
    }
}

impl<R: Ray> RayBuffer<R> {
    /// Wrap existing rays; capacity and length both equal `rays.len()`.
    pub fn from_vec(rays: Vec<R>) -> Self {
        let len = rays.len();
        Self { data: rays, len }
    }

    /// Number of rays in use.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Declared capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Append a ray. Fails once the buffer is full.
    pub fn push(&mut self, ray: R) -> Result<()> {
        let capacity = self.data.len();
        let slot = self.data.get_mut(self.len).ok_or(Error::CapacityExceeded {
            count: self.len + 1,
            capacity,
        })?;
        *slot = ray;
        self.len += 1;
        Ok(())
    }

    /// Shrink the logical length; larger values are ignored.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Set the logical length, exposing whatever the slots currently hold.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(Error::CapacityExceeded { count: len, capacity: self.data.len() });
        }
        self.len = len;
        Ok(())
    }

    /// Rays in use.
    pub fn as_slice(&self) -> &[R] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [R] {
        &mut self.data[..self.len]
    }

    /// Whole backing storage including the unused tail.
    pub fn storage(&self) -> &[R] {
        &self.data
    }

    pub fn storage_mut(&mut self) -> &mut [R] {
        &mut self.data
    }

    /// Split the used prefix at `mid`, e.g. surviving vs terminated rays after compaction.
    pub fn split_at(&self, mid: usize) -> (&[R], &[R]) {
        self.as_slice().split_at(mid.min(self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_ray_layout() {
        assert_eq!(std::mem::size_of::<PathRay>(), 48);
        assert_eq!(std::mem::align_of::<PathRay>(), 4);
    }

    #[test]
    fn test_path_ray_predicate() {
        let mut ray = PathRay::new([0.0; 3], [0.0, 0.0, -1.0], 7, 2);
        assert!(ray.is_active());

        ray.remaining_bounces = 0;
        assert!(!ray.is_active());

        ray.remaining_bounces = 1;
        ray.terminate(RAY_HIT_LIGHT);
        assert!(!ray.is_active());
    }

    #[test]
    fn test_terminate_ignores_unknown_bits() {
        let mut ray = PathRay::new([0.0; 3], [1.0, 0.0, 0.0], 0, 4);
        ray.terminate(1 << 20);
        assert_eq!(ray.flags, 0);
        assert!(ray.is_active());
    }

    #[test]
    fn test_ray_buffer_push_and_capacity() {
        let mut buf: RayBuffer<PathRay> = RayBuffer::new(2);
        assert!(buf.is_empty());
        buf.push(PathRay::default()).unwrap();
        buf.push(PathRay::default()).unwrap();
        assert_eq!(buf.len(), 2);

        let err = buf.push(PathRay::default()).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { count: 3, capacity: 2 }));
    }

    #[test]
    fn test_ray_buffer_len_bounds() {
        let mut buf: RayBuffer<PathRay> = RayBuffer::new(4);
        buf.set_len(4).unwrap();
        assert!(buf.set_len(5).is_err());

        buf.truncate(10);
        assert_eq!(buf.len(), 4);
        buf.truncate(1);
        assert_eq!(buf.as_slice().len(), 1);
        assert_eq!(buf.storage().len(), 4);
    }
}
