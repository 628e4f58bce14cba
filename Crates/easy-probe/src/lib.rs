// easy-probe/Crates/easy-probe/src/lib.rs

#![doc = include_str!("../../../README.md")]

use glam::Vec3;
use serde_derive::{Deserialize, Serialize};

pub mod bake;
pub mod dataset;
pub mod grid;
pub mod light;
pub mod sh;
pub mod streaming;

pub use crate::bake::{BakeContext, BakeError, BakeReport, BakeSettings};
pub use crate::dataset::{
    DatasetError, DatasetMetadata, DatasetReader, DatasetWriter, ShComponent,
};
pub use crate::grid::{Cell, GridSettings, Probe, ProbeGrid, ProbeVolume};
pub use crate::light::{LightKind, LightSource};
pub use crate::streaming::{
    CameraKind, FrameStatus, IoMode, MemoryBudget, ProbeRenderer, ShBands, ShaderUniforms,
    StreamingCamera, StreamingEngine, StreamingError, StreamingMode, StreamingSettings,
    VolumeBuffer,
};

/// Number of SH coefficients stored per probe: 9 basis functions for each of
/// the R, G, and B channels.
pub const SH_COEFFICIENT_COUNT: usize = 27;

/// Name of the directory, next to the scene, that holds a baked dataset.
pub const OUTPUT_DIR_NAME: &str = "EasyProbe";

/// An axis-aligned bounding box in world space.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Aabb {
        Aabb { min, max }
    }

    /// Returns a box with the given center and full side lengths.
    pub fn from_center_size(center: Vec3, size: Vec3) -> Aabb {
        let half = size * 0.5;
        Aabb {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Returns true if the boxes overlap. Touching faces count as overlapping.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    /// Returns the smallest box enclosing both boxes.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}
