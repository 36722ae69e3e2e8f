//! Synthetic bounce simulation standing in for the render loop.

use rayon::prelude::*;

use raycompact::ray::{PathRay, RAY_ABSORBED, RAY_HIT_LIGHT, RAY_MISSED};

/// PCG32 default multiplier.
const PCG_MULT: u64 = 6364136223846793005;
/// PCG32 default increment base.
const PCG_INIT: u64 = 0x853c49e6748fea9b;

/// Throughput below which a path counts as absorbed.
const MIN_THROUGHPUT: f32 = 1e-3;

/// Small PCG32 RNG, one stream per ray.
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// Create a new RNG stream for a stream index and global seed.
    pub fn new(idx: u64, seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: ((idx + 1) << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(PCG_INIT.wrapping_add(seed));
        rng.next_u32();
        rng
    }

    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULT).wrapping_add(self.inc | 1);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        let u = self.next_u32();
        let bits = (u >> 9) | 0x3f800000;
        f32::from_bits(bits) - 1.0
    }
}

/// Termination odds per bounce.
#[derive(Debug, Clone, Copy)]
pub struct BounceOdds {
    /// Probability a ray leaves the scene.
    pub miss: f32,
    /// Probability a ray hits an emitter.
    pub light: f32,
    pub seed: u64,
}

/// One primary ray per pixel of a square-ish image, all with `max_bounces` left.
pub fn primary_rays(count: usize, max_bounces: u32) -> Vec<PathRay> {
    let width = (count as f64).sqrt().ceil().max(1.0) as usize;
    (0..count)
        .into_par_iter()
        .map(|i| {
            let u = (i % width) as f32 / width as f32 - 0.5;
            let v = (i / width) as f32 / width as f32 - 0.5;
            let len = (u * u + v * v + 1.0).sqrt();
            PathRay::new([0.0; 3], [u / len, v / len, -1.0 / len], i as u32, max_bounces)
        })
        .collect()
}

/// Advance every ray by one bounce, terminating some of them.
///
/// Each ray draws from its own stream keyed by pixel and bounce, so the
/// outcome does not depend on where the ray sits in the buffer.
pub fn bounce(rays: &mut [PathRay], bounce: u32, odds: BounceOdds) {
    rays.par_iter_mut().for_each(|ray| {
        let stream = (u64::from(ray.pixel_index) << 8) | u64::from(bounce & 0xff);
        let mut rng = Pcg32::new(stream, odds.seed);
        let roll = rng.next_f32();

        if roll < odds.miss {
            ray.terminate(RAY_MISSED);
        } else if roll < odds.miss + odds.light {
            ray.terminate(RAY_HIT_LIGHT);
        } else {
            ray.remaining_bounces = ray.remaining_bounces.saturating_sub(1);
            let albedo = 0.5 + 0.5 * rng.next_f32();
            for c in &mut ray.throughput {
                *c *= albedo;
            }
            if ray.throughput.iter().all(|&c| c < MIN_THROUGHPUT) {
                ray.terminate(RAY_ABSORBED);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use raycompact::ray::Ray;

    #[test]
    fn test_pcg_is_deterministic() {
        let mut a = Pcg32::new(3, 42);
        let mut b = Pcg32::new(3, 42);
        for _ in 0..8 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        let f = a.next_f32();
        assert!((0.0..1.0).contains(&f));
    }

    #[test]
    fn test_bounce_terminates_everything_when_all_miss() {
        let mut rays = primary_rays(64, 4);
        bounce(&mut rays, 0, BounceOdds { miss: 1.0, light: 0.0, seed: 1 });
        assert!(rays.iter().all(|r| !r.is_active()));
    }

    #[test]
    fn test_bounce_spends_budget() {
        let mut rays = primary_rays(16, 1);
        bounce(&mut rays, 0, BounceOdds { miss: 0.0, light: 0.0, seed: 1 });
        assert!(rays.iter().all(|r| r.remaining_bounces == 0 && !r.is_active()));
    }
}
