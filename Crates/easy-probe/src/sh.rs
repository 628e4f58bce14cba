// easy-probe/Crates/easy-probe/src/sh.rs

//! Second-order real spherical harmonics and the sampling helpers used to
//! project light onto them.

use glam::{vec3, Vec3};
use std::f32::consts::{FRAC_1_PI, PI, TAU};

/// Number of basis functions in bands L0 through L2.
pub const SH_BASIS_COUNT: usize = 9;

/// Samples whose PDF falls below this are skipped.
pub const MIN_SAMPLE_PDF: f32 = 1e-6;

/// The normalization constant of each basis function.
///
/// Coefficients are projected with the full basis function and scaled by its
/// constant once more, so that a shader can reconstruct irradiance with plain
/// polynomials in the normal.
pub fn basis_constants() -> [f32; SH_BASIS_COUNT] {
    let sqrt_inv_pi = FRAC_1_PI.sqrt();
    let l1 = (3.0 / (4.0 * PI)).sqrt();
    let l2 = 0.5 * (15.0 * FRAC_1_PI).sqrt();
    [
        0.5 * sqrt_inv_pi,
        l1,
        l1,
        l1,
        l2,
        l2,
        0.75 * (5.0 * FRAC_1_PI).sqrt(),
        l2,
        0.25 * (15.0 * FRAC_1_PI).sqrt(),
    ]
}

/// Evaluates the nine basis functions, normalization included, for a
/// direction. The direction is normalized first.
pub fn basis(direction: Vec3) -> [f32; SH_BASIS_COUNT] {
    let Vec3 { x, y, z } = direction.normalize_or_zero();
    let sqrt_inv_pi = FRAC_1_PI.sqrt();
    let l1 = (3.0 / (4.0 * PI)).sqrt();
    let l2 = (15.0 * FRAC_1_PI).sqrt();
    [
        0.5 * sqrt_inv_pi,
        l1 * x,
        l1 * y,
        l1 * z,
        0.5 * l2 * x * y,
        0.5 * l2 * z * y,
        0.25 * (5.0 * FRAC_1_PI).sqrt() * (3.0 * z * z - 1.0),
        0.5 * l2 * z * x,
        0.25 * l2 * (x * x - y * y),
    ]
}

/// The `index`-th element of the Halton sequence in the given base.
///
/// `index` starts at 1; index 0 maps to 0.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f32;
        result += fraction * (index % base) as f32;
        index /= base;
    }
    result
}

/// The two low-discrepancy numbers for a sample. The sequence repeats every
/// 1024 samples.
pub fn sample_point(sample_index: u32) -> (f32, f32) {
    let index = (sample_index & 1023) + 1;
    (halton(index, 2), halton(index, 3))
}

/// A uniformly distributed point on the unit sphere.
pub fn uniform_sphere_point(u1: f32, u2: f32) -> Vec3 {
    let phi = TAU * u2;
    let cos_theta = 1.0 - 2.0 * u1;
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    vec3(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

/// A direction distributed proportionally to the cosine around `normal`,
/// and its PDF.
///
/// A uniform point on the unit sphere touching the origin at the tip of
/// `normal` is picked, and the direction towards it is returned.
pub fn cosine_weighted_direction(u1: f32, u2: f32, normal: Vec3) -> (Vec3, f32) {
    let normal = normal.normalize_or_zero();
    let direction = (normal + uniform_sphere_point(u1, u2)).normalize_or_zero();
    let pdf = FRAC_1_PI * direction.dot(normal).max(0.0);
    (direction, pdf)
}
