use std::f32::consts::TAU;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::parser::ply::encode_binary_ply;
use crate::splat::RawVertexRecord;

/// Zeroth-order spherical-harmonics constant.
pub const SH_C0: f32 = 0.282_094_8;

// --- Demo scene generators ---

fn random_sphere_point(rng: &mut impl Rng) -> Vec3 {
    let z = rng.random_range(-1.0_f32..1.0_f32);
    let theta = rng.random_range(0.0_f32..TAU);
    let r = (1.0 - z * z).sqrt();
    Vec3::new(r * theta.cos(), z, r * theta.sin())
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [f32; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = value * saturation;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}

/// Inverse of the shader's `sigmoid(opacity)`.
fn logit(alpha: f32) -> f32 {
    let a = alpha.clamp(1e-4, 1.0 - 1e-4);
    (a / (1.0 - a)).ln()
}

/// Stores activated values the way trained scenes do: log scale, logit
/// opacity, DC color coefficients.
fn encode_record(position: Vec3, rgb: [f32; 3], alpha: f32, scale: Vec3) -> RawVertexRecord {
    RawVertexRecord {
        position: position.to_array(),
        opacity: logit(alpha),
        scale: scale.to_array().map(f32::ln),
        sh_dc: rgb.map(|c| (c - 0.5) / SH_C0),
        ..Default::default()
    }
}

fn generate_torus_knot(count: usize, rng: &mut impl Rng) -> Vec<RawVertexRecord> {
    let p = 2.0;
    let q = 3.0;
    // Small radii so the scene fits the default view from z=5.
    let major = 1.4;
    let minor = 0.38;

    (0..count)
        .map(|i| {
            let t = i as f32 / count.max(1) as f32 * TAU * 2.0;

            // Knot lies in the XZ plane with Y up.
            let base = Vec3::new(
                (major + minor * (q * t).cos()) * (p * t).cos(),
                minor * (q * t).sin(),
                (major + minor * (q * t).cos()) * (p * t).sin(),
            );
            let jitter = Vec3::new(
                rng.random_range(-0.04_f32..0.04_f32),
                rng.random_range(-0.04_f32..0.04_f32),
                rng.random_range(-0.04_f32..0.04_f32),
            );

            let hue = ((q * t).sin() * 0.5 + 0.5) * 360.0;
            let scale = rng.random_range(0.018_f32..0.042_f32);
            encode_record(
                base + jitter,
                hsv_to_rgb(hue, 0.80, 0.95),
                rng.random_range(0.68_f32..0.95_f32),
                Vec3::new(scale, scale * rng.random_range(0.9_f32..1.2_f32), scale),
            )
        })
        .collect()
}

fn generate_sphere_clusters(count: usize, rng: &mut impl Rng) -> Vec<RawVertexRecord> {
    let centers = [
        Vec3::new(1.8, 0.3, 0.4),
        Vec3::new(-1.6, -0.2, 0.8),
        Vec3::new(0.3, 1.2, -1.6),
        Vec3::new(-0.5, -1.0, -1.4),
    ];
    let palette = [
        [1.0, 0.47, 0.31],
        [0.39, 0.82, 1.0],
        [0.63, 1.0, 0.51],
        [1.0, 0.86, 0.35],
    ];

    (0..count)
        .map(|i| {
            let cluster = i % centers.len();
            let dir = random_sphere_point(rng);
            let radius = rng.random::<f32>().cbrt() * rng.random_range(0.5_f32..1.4_f32);
            let position = centers[cluster] + dir * radius;

            let rgb = palette[cluster]
                .map(|c: f32| (c + rng.random_range(-0.1_f32..0.1_f32)).clamp(0.0, 1.0));
            let scale = rng.random_range(0.02_f32..0.06_f32);
            encode_record(
                position,
                rgb,
                rng.random_range(0.60_f32..0.95_f32),
                Vec3::new(scale, scale * rng.random_range(0.8_f32..1.3_f32), scale),
            )
        })
        .collect()
}

/// Two thirds torus knot, one third sphere clusters. Same seed, same scene.
pub fn generate_demo_records(count: usize, seed: u64) -> Vec<RawVertexRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let knot = count * 2 / 3;
    let mut records = generate_torus_knot(knot, &mut rng);
    records.extend(generate_sphere_clusters(count - knot, &mut rng));
    records
}

/// Demo scene as a binary little-endian PLY with degree-0 color.
pub fn generate_demo_ply(count: usize, seed: u64) -> Vec<u8> {
    encode_binary_ply(&generate_demo_records(count, seed), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ply::decode_header;

    #[test]
    fn same_seed_same_scene() {
        let a = generate_demo_records(300, 7);
        let b = generate_demo_records(300, 7);
        let c = generate_demo_records(300, 8);
        assert_eq!(a.len(), 300);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn scene_fits_default_bounds() {
        for record in generate_demo_records(2_000, 1) {
            assert!(record.position.iter().all(|p| p.abs() < 4.0));
            assert!(record.scale.iter().all(|s| *s < 0.0));
        }
    }

    #[test]
    fn color_encoding_inverts_shader_activation() {
        let record = encode_record(Vec3::ZERO, [0.9, 0.5, 0.1], 0.8, Vec3::splat(0.05));
        for (dc, rgb) in record.sh_dc.iter().zip([0.9, 0.5, 0.1]) {
            assert!((0.5 + SH_C0 * dc - rgb).abs() < 1e-5);
        }
        let alpha = 1.0 / (1.0 + (-record.opacity).exp());
        assert!((alpha - 0.8).abs() < 1e-5);
    }

    #[test]
    fn demo_ply_decodes() {
        let bytes = generate_demo_ply(50, 3);
        let header = decode_header(&bytes).expect("demo header");
        assert_eq!(header.vertex_count(), 50);
        assert_eq!(header.rest_coefficient_count(), 0);
    }

    #[test]
    fn hue_wheel_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]);
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), [0.0, 1.0, 0.0]);
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), [0.0, 0.0, 1.0]);
    }
}
