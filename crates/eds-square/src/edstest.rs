//! Random squares for tests and the operator CLI.

use rand::Rng;

use crate::extend::XorExtender;
use crate::square::ExtendedSquare;

/// `k²` random shares of `share_size` bytes each.
pub fn random_ods<R: Rng + ?Sized>(k: usize, share_size: usize, rng: &mut R) -> Vec<Vec<u8>> {
    (0..k * k)
        .map(|_| {
            let mut share = vec![0u8; share_size];
            rng.fill_bytes(&mut share);
            share
        })
        .collect()
}

/// A random `2k × 2k` square extended with [`XorExtender`].
///
/// # Panics
/// If `k` is not a power of two or `share_size` is zero.
pub fn random_eds<R: Rng + ?Sized>(k: usize, share_size: usize, rng: &mut R) -> ExtendedSquare {
    ExtendedSquare::compute(random_ods(k, share_size, rng), &XorExtender)
        .expect("random square parameters must be valid")
}
