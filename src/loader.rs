use rayon::prelude::*;
use tracing::{debug, info};

use crate::parser::ply::{decode_header, PlyError, PlyHeader};
use crate::render::gpu::error::RenderError;
use crate::splat::{
    sh_degree_from_rest_count, PACKED_COLOR_SIZE, PACKED_GAUSSIAN_SIZE, SPLAT_2D_SIZE,
};

/// Byte sizes of the three per-point device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointCloudLayout {
    pub num_points: usize,
    pub gaussian_bytes: u64,
    pub sh_bytes: u64,
    pub splat_2d_bytes: u64,
}

impl PointCloudLayout {
    pub fn new(num_points: usize) -> Result<Self, RenderError> {
        let bytes = |record: usize, label| {
            num_points
                .checked_mul(record)
                .map(|b| b as u64)
                .ok_or(RenderError::SizeOverflow(label))
        };
        Ok(Self {
            num_points,
            gaussian_bytes: bytes(PACKED_GAUSSIAN_SIZE, "gaussian buffer size")?,
            sh_bytes: bytes(PACKED_COLOR_SIZE, "color buffer size")?,
            splat_2d_bytes: bytes(SPLAT_2D_SIZE, "splat buffer size")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    pub fn include(&mut self, p: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min: [0, 1, 2].map(|axis| self.min[axis].min(other.min[axis])),
            max: [0, 1, 2].map(|axis| self.max[axis].max(other.max[axis])),
        }
    }

    pub fn center(&self) -> [f32; 3] {
        [0, 1, 2].map(|axis| (self.min[axis] + self.max[axis]) * 0.5)
    }

    pub fn extent(&self) -> [f32; 3] {
        [0, 1, 2].map(|axis| (self.max[axis] - self.min[axis]).max(0.0))
    }
}

/// Decodes every vertex and writes the packed records into the two
/// destination byte slices, in parallel over vertices. Returns the position
/// bounds.
pub fn transcode_vertices(
    header: &PlyHeader<'_>,
    gaussians: &mut [u8],
    colors: &mut [u8],
) -> Result<Bounds, PlyError> {
    let count = header.vertex_count();
    let gaussian_len = count.saturating_mul(PACKED_GAUSSIAN_SIZE);
    let color_len = count.saturating_mul(PACKED_COLOR_SIZE);
    if gaussians.len() < gaussian_len {
        return Err(PlyError::DestinationTooSmall {
            need: gaussian_len,
            have: gaussians.len(),
        });
    }
    if colors.len() < color_len {
        return Err(PlyError::DestinationTooSmall {
            need: color_len,
            have: colors.len(),
        });
    }

    let stride = header.stride();
    gaussians[..gaussian_len]
        .par_chunks_exact_mut(PACKED_GAUSSIAN_SIZE)
        .zip(colors[..color_len].par_chunks_exact_mut(PACKED_COLOR_SIZE))
        .enumerate()
        .try_fold(
            || Bounds::EMPTY,
            |mut bounds, (index, (gaussian, color))| {
                let (_, record) = header.read_vertex(index * stride)?;
                gaussian.copy_from_slice(bytemuck::bytes_of(&record.to_packed_gaussian()));
                color.copy_from_slice(bytemuck::bytes_of(&record.to_packed_colors()));
                bounds.include(record.position);
                Ok(bounds)
            },
        )
        .try_reduce(|| Bounds::EMPTY, |a, b| Ok(a.union(b)))
}

/// The loaded asset: metadata plus the three device buffers. Immutable after load.
#[derive(Debug)]
pub struct PointCloud {
    pub num_points: usize,
    pub sh_degree: u32,
    pub bounds: Bounds,
    pub gaussian_3d_buffer: wgpu::Buffer,
    pub sh_buffer: wgpu::Buffer,
    pub splat_2d_buffer: wgpu::Buffer,
}

fn check_limit(label: &'static str, size: u64, limits: &wgpu::Limits) -> Result<(), RenderError> {
    let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if size > limit {
        return Err(RenderError::BufferTooLarge { label, size, limit });
    }
    Ok(())
}

impl PointCloud {
    pub async fn load(device: &wgpu::Device, bytes: &[u8]) -> Result<Self, RenderError> {
        let header = decode_header(bytes)?;
        let num_points = header.vertex_count();
        if num_points == 0 {
            return Err(RenderError::EmptyPointCloud);
        }

        let n_rest = header.rest_coefficient_count();
        let sh_degree = sh_degree_from_rest_count(n_rest);
        let layout = PointCloudLayout::new(num_points)?;

        let limits = device.limits();
        check_limit("gaussian buffer", layout.gaussian_bytes, &limits)?;
        check_limit("color buffer", layout.sh_bytes, &limits)?;
        check_limit("splat buffer", layout.splat_2d_bytes, &limits)?;

        info!(num_points, sh_degree, n_rest, "processing loaded attributes");

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = Self::upload(device, &header, &layout);
        let validation = device.pop_error_scope().await;
        let oom = device.pop_error_scope().await;
        let (gaussian_3d_buffer, sh_buffer, splat_2d_buffer, bounds) = built?;
        if let Some(err) = validation.or(oom) {
            return Err(RenderError::device("point cloud buffers", err));
        }

        debug!(?bounds, "point cloud uploaded");

        Ok(Self {
            num_points,
            sh_degree,
            bounds,
            gaussian_3d_buffer,
            sh_buffer,
            splat_2d_buffer,
        })
    }

    fn upload(
        device: &wgpu::Device,
        header: &PlyHeader<'_>,
        layout: &PointCloudLayout,
    ) -> Result<(wgpu::Buffer, wgpu::Buffer, wgpu::Buffer, Bounds), RenderError> {
        let gaussian_3d_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gaussian 3d buffer"),
            size: layout.gaussian_bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::STORAGE,
            mapped_at_creation: true,
        });
        let sh_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sh buffer"),
            size: layout.sh_bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::STORAGE,
            mapped_at_creation: true,
        });
        let splat_2d_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat 2d buffer"),
            size: layout.splat_2d_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bounds = {
            let mut gaussians = gaussian_3d_buffer.slice(..).get_mapped_range_mut();
            let mut colors = sh_buffer.slice(..).get_mapped_range_mut();
            transcode_vertices(header, &mut gaussians, &mut colors)
        };
        gaussian_3d_buffer.unmap();
        sh_buffer.unmap();

        Ok((gaussian_3d_buffer, sh_buffer, splat_2d_buffer, bounds?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ply::encode_binary_ply;
    use crate::splat::{unpack_half2, PackedGaussian, RawVertexRecord};

    fn words_of(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    fn three_points() -> Vec<RawVertexRecord> {
        vec![
            RawVertexRecord {
                position: [0.0, 0.0, 0.0],
                opacity: 1.0,
                scale: [-2.0, -2.0, -2.0],
                sh_dc: [0.5, 0.25, -0.5],
                ..Default::default()
            },
            RawVertexRecord {
                position: [1.0, 2.0, 3.0],
                opacity: -1.0,
                scale: [-1.0, -3.0, -2.0],
                sh_dc: [1.0, 0.0, 0.0],
                ..Default::default()
            },
            RawVertexRecord {
                position: [-4.0, 0.5, 1.0],
                opacity: 0.0,
                scale: [-4.0, -4.0, -4.0],
                sh_dc: [0.0, 0.0, 1.0],
                ..Default::default()
            },
        ]
    }

    #[test]
    fn layout_sizes_are_exact() {
        let layout = PointCloudLayout::new(3).expect("layout");
        assert_eq!(layout.gaussian_bytes, 60);
        assert_eq!(layout.sh_bytes, 288);
        assert_eq!(layout.splat_2d_bytes, 72);
        assert!(matches!(
            PointCloudLayout::new(usize::MAX),
            Err(RenderError::SizeOverflow(_))
        ));
    }

    #[test]
    fn transcodes_into_packed_buffers() {
        let records = three_points();
        let bytes = encode_binary_ply(&records, 0);
        let header = decode_header(&bytes).expect("header");
        let layout = PointCloudLayout::new(header.vertex_count()).expect("layout");
        let mut gaussians = vec![0xAAu8; layout.gaussian_bytes as usize];
        let mut colors = vec![0xAAu8; layout.sh_bytes as usize];

        let bounds = transcode_vertices(&header, &mut gaussians, &mut colors).expect("transcode");
        assert_eq!(bounds.min, [-4.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 2.0, 3.0]);
        assert_eq!(bounds.center(), [-1.5, 1.0, 1.5]);

        for (chunk, r) in gaussians.chunks_exact(PACKED_GAUSSIAN_SIZE).zip(&records) {
            let packed: PackedGaussian = bytemuck::pod_read_unaligned(chunk);
            assert_eq!(packed, r.to_packed_gaussian());
        }

        let words = words_of(&colors);
        assert_eq!(words.len(), 3 * 24);
        assert_eq!(unpack_half2(words[0]), (0.5, 0.25));
        assert_eq!(unpack_half2(words[1]), (-0.5, 0.0));
        assert!(words[2..24].iter().all(|&w| w == 0));
        assert_eq!(unpack_half2(words[24]), (1.0, 0.0));
        assert_eq!(unpack_half2(words[49]), (1.0, 0.0));
    }

    #[test]
    fn higher_degree_files_still_pack_24_words() {
        let mut records = three_points();
        for r in &mut records {
            r.sh_rest[..24].fill(0.75);
        }
        let bytes = encode_binary_ply(&records, 24);
        let header = decode_header(&bytes).expect("header");
        assert_eq!(sh_degree_from_rest_count(header.rest_coefficient_count()), 2);

        let mut gaussians = vec![0u8; 60];
        let mut colors = vec![0u8; 288];
        transcode_vertices(&header, &mut gaussians, &mut colors).expect("transcode");
        let words = words_of(&colors);
        for point in words.chunks_exact(24) {
            assert!(point[2..].iter().all(|&w| w == 0));
        }
    }

    #[test]
    fn undersized_destination_is_rejected() {
        let bytes = encode_binary_ply(&three_points(), 0);
        let header = decode_header(&bytes).expect("header");
        let mut gaussians = vec![0u8; 40];
        let mut colors = vec![0u8; 288];
        assert!(matches!(
            transcode_vertices(&header, &mut gaussians, &mut colors),
            Err(PlyError::DestinationTooSmall { need: 60, have: 40 })
        ));

        let mut gaussians = vec![0u8; 60];
        let mut colors = vec![0u8; 100];
        assert!(matches!(
            transcode_vertices(&header, &mut gaussians, &mut colors),
            Err(PlyError::DestinationTooSmall { need: 288, have: 100 })
        ));
    }
}
