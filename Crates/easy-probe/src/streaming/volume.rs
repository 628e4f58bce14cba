// easy-probe/Crates/easy-probe/src/streaming/volume.rs

//! The render-visible side of streaming: volumes, uniforms, and the renderer
//! that consumes them.

use crate::dataset::{ShComponent, BYTES_PER_GROUP};
use crate::streaming::StreamingError;
use glam::{UVec3, Vec3, Vec4};

/// Texel formats a volume can have.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum VolumeFormat {
    /// Four half floats per texel.
    #[default]
    Rgba16Float,
}

/// A CPU-side 3D texture that mirrors what the renderer displays.
#[derive(Clone, PartialEq, Debug)]
pub struct VolumeBuffer {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: VolumeFormat,
    data: Vec<u8>,
}

/// The values pushed to shaders alongside the volumes.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct ShaderUniforms {
    /// The extent of the volume in world units, one probe spacing included.
    pub volume_size: Vec3,
    /// The world position of the volume origin in xyz, minus half a probe
    /// spacing, and the intensity in w.
    pub world_offset: Vec4,
    /// The frame index used to vary sampling noise. Zero unless temporal
    /// antialiasing is on.
    pub noise_frame_index: u32,
    pub sampling_noise: f32,
}

/// Whatever displays the streamed probes.
///
/// The engine owns the volumes; a renderer only gets to copy them.
pub trait ProbeRenderer {
    /// The largest extent of a 3D texture along any axis.
    fn max_volume_extent(&self) -> u32;

    /// Replaces the contents of the texture for `component`.
    fn upload_volume(&mut self, component: ShComponent, volume: &VolumeBuffer);

    fn push_uniforms(&mut self, uniforms: &ShaderUniforms);
}

impl VolumeFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            VolumeFormat::Rgba16Float => BYTES_PER_GROUP,
        }
    }
}

impl VolumeBuffer {
    /// Creates a zeroed volume.
    pub fn new(size: UVec3, format: VolumeFormat) -> VolumeBuffer {
        let len = size.x as usize * size.y as usize * size.z as usize * format.bytes_per_texel();
        VolumeBuffer {
            width: size.x,
            height: size.y,
            depth: size.z,
            format,
            data: vec![0; len],
        }
    }

    pub fn size(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.depth)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites the whole volume with `bytes`, which must be exactly as
    /// large.
    pub fn update_from_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamingError> {
        if bytes.len() != self.data.len() {
            return Err(StreamingError::RequestOverflow {
                end: bytes.len(),
                capacity: self.data.len(),
            });
        }
        self.data.copy_from_slice(bytes);
        Ok(())
    }

    /// The texel at `(x, y, z)`.
    pub fn texel(&self, x: u32, y: u32, z: u32) -> &[u8] {
        let stride = self.format.bytes_per_texel();
        let index = (z as usize * self.height as usize + y as usize) * self.width as usize
            + x as usize;
        &self.data[index * stride..(index + 1) * stride]
    }
}
