use thiserror::Error;

use crate::parser::ply::PlyError;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Ply(#[from] PlyError),
    #[error("point cloud has no vertices")]
    EmptyPointCloud,
    #[error("{points} points need {workgroups} workgroups, device allows {limit} per dimension")]
    TooManyPoints {
        points: usize,
        workgroups: u64,
        limit: u32,
    },
    #[error("{label} needs {size} bytes, device limit is {limit}")]
    BufferTooLarge {
        label: &'static str,
        size: u64,
        limit: u64,
    },
    #[error("size overflow computing {0}")]
    SizeOverflow(&'static str),
    #[error("wgpu rejected {stage}: {message}")]
    Device {
        stage: &'static str,
        message: String,
    },
}

impl RenderError {
    pub(crate) fn device(stage: &'static str, err: wgpu::Error) -> Self {
        Self::Device {
            stage,
            message: err.to_string(),
        }
    }
}

impl From<std::num::TryFromIntError> for RenderError {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::SizeOverflow("integer conversion")
    }
}
