use bytemuck::{Pod, Zeroable};
use half::f16;

/// Highest spherical-harmonics degree the color record has room for.
pub const MAX_SH_DEGREE: u32 = 3;
/// `f_rest_*` properties needed for a full degree-3 file (15 coefficients x 3 channels).
pub const MAX_REST_COEFFS: usize = 3 * (sh_coeffs_per_channel(MAX_SH_DEGREE) - 1);
/// 32-bit words per point in the color-coefficient buffer.
pub const SH_WORDS_PER_POINT: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawVertexRecord {
    pub position: [f32; 3],
    pub opacity: f32,
    pub scale: [f32; 3],
    /// Decoded for completeness; the packed record has no rotation slot yet.
    pub rotation: [f32; 4],
    pub sh_dc: [f32; 3],
    pub sh_rest: [f32; MAX_REST_COEFFS],
}

impl Default for RawVertexRecord {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            opacity: 0.0,
            scale: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            sh_dc: [0.0; 3],
            sh_rest: [0.0; MAX_REST_COEFFS],
        }
    }
}

/// Per-point shape record read by the preprocess shader as five `u32` words.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PackedGaussian {
    pub position: [f16; 3],
    pub opacity: f16,
    pub scale: [f16; 3],
    pub reserved: [f16; 3],
}

/// Per-point color record. Only the DC term is populated; the remaining words
/// are the slots for degree 1..=3 coefficients and stay zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedColorCoefficients {
    pub words: [u32; SH_WORDS_PER_POINT],
}

impl Default for PackedColorCoefficients {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Projected splat written by the preprocess pass. Every word holds two halfs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Splat2D {
    pub center_ndc: u32,
    pub extent_ndc: u32,
    pub conic_xy: u32,
    pub conic_z_opacity: u32,
    pub color_rg: u32,
    pub color_b_radius: u32,
}

pub const PACKED_GAUSSIAN_SIZE: usize = std::mem::size_of::<PackedGaussian>();
pub const PACKED_COLOR_SIZE: usize = std::mem::size_of::<PackedColorCoefficients>();
pub const SPLAT_2D_SIZE: usize = std::mem::size_of::<Splat2D>();

// Hard fail at compile time if Rust<->WGSL layout drifts.
const _: [(); 20] = [(); PACKED_GAUSSIAN_SIZE];
const _: [(); 96] = [(); PACKED_COLOR_SIZE];
const _: [(); 24] = [(); SPLAT_2D_SIZE];

/// Packs two floats as halfs: `a` in the low 16 bits, `b` in the high 16 bits.
/// Matches WGSL `unpack2x16float`.
pub fn pack_half2(a: f32, b: f32) -> u32 {
    let lo = f16::from_f32(a).to_bits() as u32;
    let hi = f16::from_f32(b).to_bits() as u32;
    (hi << 16) | lo
}

pub fn unpack_half2(word: u32) -> (f32, f32) {
    let lo = f16::from_bits((word & 0xFFFF) as u16);
    let hi = f16::from_bits((word >> 16) as u16);
    (lo.to_f32(), hi.to_f32())
}

/// Degree inferred from the number of `f_rest_*` properties in a file.
pub fn sh_degree_from_rest_count(n_rest: usize) -> u32 {
    let per_channel = n_rest as f64 / 3.0;
    let degree = ((per_channel + 1.0).sqrt() - 1.0).round();
    (degree.max(0.0) as u32).min(MAX_SH_DEGREE)
}

/// Number of coefficients per color channel for a given degree.
pub const fn sh_coeffs_per_channel(degree: u32) -> usize {
    ((degree + 1) * (degree + 1)) as usize
}

impl RawVertexRecord {
    pub fn to_packed_gaussian(&self) -> PackedGaussian {
        PackedGaussian {
            position: self.position.map(f16::from_f32),
            opacity: f16::from_f32(self.opacity),
            scale: self.scale.map(f16::from_f32),
            reserved: [f16::ZERO; 3],
        }
    }

    pub fn to_packed_colors(&self) -> PackedColorCoefficients {
        let [r, g, b] = self.sh_dc;
        let mut packed = PackedColorCoefficients::zeroed();
        packed.words[0] = pack_half2(r, g);
        packed.words[1] = pack_half2(b, 0.0);
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_and_offsets() {
        assert_eq!(PACKED_GAUSSIAN_SIZE, 20);
        assert_eq!(PACKED_COLOR_SIZE, 96);
        assert_eq!(SPLAT_2D_SIZE, 24);
        assert_eq!(std::mem::offset_of!(PackedGaussian, position), 0);
        assert_eq!(std::mem::offset_of!(PackedGaussian, opacity), 6);
        assert_eq!(std::mem::offset_of!(PackedGaussian, scale), 8);
        assert_eq!(std::mem::offset_of!(PackedGaussian, reserved), 14);
    }

    #[test]
    fn half_pair_round_trip() {
        for (a, b) in [(0.0, 0.0), (1.5, -2.25), (-0.125, 1024.0), (65504.0, -65504.0)] {
            let word = pack_half2(a, b);
            assert_eq!(unpack_half2(word), (a, b));
        }
    }

    #[test]
    fn first_value_lands_in_low_bits() {
        let word = pack_half2(1.0, 0.0);
        assert_eq!(word, 0x0000_3C00);
        let word = pack_half2(0.0, 1.0);
        assert_eq!(word, 0x3C00_0000);
    }

    #[test]
    fn rounding_follows_half_precision() {
        let (a, _) = unpack_half2(pack_half2(0.1, 0.0));
        assert_eq!(a, f16::from_f32(0.1).to_f32());
        assert!((a - 0.1).abs() < 1e-3);
    }

    #[test]
    fn sh_degree_inference() {
        assert_eq!(sh_degree_from_rest_count(0), 0);
        assert_eq!(sh_degree_from_rest_count(9), 1);
        assert_eq!(sh_degree_from_rest_count(24), 2);
        assert_eq!(sh_degree_from_rest_count(45), 3);
        assert_eq!(sh_degree_from_rest_count(200), MAX_SH_DEGREE);
        assert_eq!(MAX_REST_COEFFS, 45);
    }

    #[test]
    fn packed_gaussian_fields() {
        let record = RawVertexRecord {
            position: [1.0, -2.0, 0.5],
            opacity: 3.0,
            scale: [-1.0, -2.0, -3.0],
            ..Default::default()
        };
        let packed = record.to_packed_gaussian();
        assert_eq!(packed.position.map(f16::to_f32), [1.0, -2.0, 0.5]);
        assert_eq!(packed.opacity.to_f32(), 3.0);
        assert_eq!(packed.scale.map(f16::to_f32), [-1.0, -2.0, -3.0]);
        assert_eq!(packed.reserved, [f16::ZERO; 3]);
    }

    #[test]
    fn only_dc_term_is_packed() {
        let mut record = RawVertexRecord {
            sh_dc: [0.25, -0.5, 2.0],
            ..Default::default()
        };
        record.sh_rest = [7.0; MAX_REST_COEFFS];
        let packed = record.to_packed_colors();
        assert_eq!(unpack_half2(packed.words[0]), (0.25, -0.5));
        assert_eq!(unpack_half2(packed.words[1]), (2.0, 0.0));
        assert!(packed.words[2..].iter().all(|&w| w == 0));
    }
}
