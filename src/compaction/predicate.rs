//! Predicate evaluation: one active flag and one terminated flag per slot.

use rayon::prelude::*;

use crate::ray::Ray;

/// Fill the two mask arrays for `rays`.
///
/// Slots `[0, rays.len())` get `active = is_active() as u32` and
/// `terminated = 1 - active`; padding slots past the rays get 0 in both.
pub fn evaluate<R: Ray>(rays: &[R], active: &mut [u32], terminated: &mut [u32]) {
    debug_assert_eq!(active.len(), terminated.len());
    debug_assert!(rays.len() <= active.len());

    active
        .par_iter_mut()
        .zip(terminated.par_iter_mut())
        .enumerate()
        .for_each(|(i, (a, t))| match rays.get(i) {
            Some(ray) => {
                *a = u32::from(ray.is_active());
                *t = 1 - *a;
            }
            None => {
                *a = 0;
                *t = 0;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Flag(bool);

    impl Ray for Flag {
        fn is_active(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_masks_and_padding() {
        let rays = [Flag(true), Flag(false), Flag(true)];
        let mut active = vec![9; 8];
        let mut terminated = vec![9; 8];
        evaluate(&rays, &mut active, &mut terminated);

        assert_eq!(active, vec![1, 0, 1, 0, 0, 0, 0, 0]);
        assert_eq!(terminated, vec![0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_input_clears_masks() {
        let mut active = vec![1; 4];
        let mut terminated = vec![1; 4];
        evaluate::<Flag>(&[], &mut active, &mut terminated);
        assert!(active.iter().chain(&terminated).all(|&v| v == 0));
    }
}
