// easy-probe/Crates/easy-probe/src/light.rs

//! Snapshots of the scene lights that feed the baker.

use crate::grid::Cell;
use crate::Aabb;
use glam::Vec3;
use serde_derive::{Deserialize, Serialize};

/// Floor applied to squared distances and ranges before dividing by them.
pub const ATTENUATION_EPSILON: f32 = 0.0001;

/// Bias added to the range falloff so that probes at the edge of a light's
/// range still receive a little light.
pub const ATTENUATION_RANGE_BIAS: f32 = 0.1;

/// The type of a light.
///
/// Only point lights contribute to the bake. The other kinds are accepted so
/// that a whole scene can be handed over, but they bake to zero radiance.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum LightKind {
    #[default]
    Point,
    Spot,
    Directional,
    Area,
}

/// An immutable snapshot of a light, taken when a bake starts.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct LightSource {
    #[serde(default)]
    pub kind: LightKind,
    pub position: Vec3,
    pub intensity: f32,
    /// Linear RGB.
    pub color: Vec3,
    pub range: f32,
    /// The broad-phase box used to skip probes that are out of reach.
    ///
    /// If absent from a scene description, it's derived from the range.
    #[serde(default)]
    pub bounds: Option<Aabb>,
}

impl LightSource {
    /// Creates a point light whose broad-phase box encloses its range.
    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> LightSource {
        LightSource {
            kind: LightKind::Point,
            position,
            intensity,
            color,
            range,
            bounds: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.kind == LightKind::Point
    }

    /// The box spanned by the light's range around its position.
    pub fn range_bounds(&self) -> Aabb {
        Aabb::from_center_size(self.position, Vec3::splat(self.range.max(0.0) * 2.0))
    }

    /// The broad-phase box: the explicit one if set, otherwise the range box.
    pub fn broad_phase_bounds(&self) -> Aabb {
        self.bounds.unwrap_or_else(|| self.range_bounds())
    }

    pub fn intersects_cell(&self, cell: &Cell) -> bool {
        self.broad_phase_bounds().intersects(&cell.bounds())
    }

    /// Point-light attenuation at `probe_position`, scaled by the intensity.
    ///
    /// Never NaN: zero or negative ranges and coincident positions are floored.
    pub fn attenuation(&self, probe_position: Vec3) -> f32 {
        let distance_sqr = (self.position - probe_position).length_squared();
        let range_sqr = self.range * self.range;
        point_light_attenuation(distance_sqr, range_sqr, ATTENUATION_RANGE_BIAS) * self.intensity
    }

    /// Radiance arriving along `direction` at `probe_position`, before
    /// attenuation.
    pub fn radiance(&self, direction: Vec3, probe_position: Vec3) -> Vec3 {
        match self.kind {
            LightKind::Point => {
                let to_light = (self.position - probe_position).normalize_or_zero();
                self.color * direction.dot(to_light).max(0.0)
            }
            LightKind::Spot | LightKind::Directional | LightKind::Area => Vec3::ZERO,
        }
    }
}

fn point_light_attenuation(distance_sqr: f32, range_sqr: f32, bias: f32) -> f32 {
    let inverse_square = 1.0 / distance_sqr.max(ATTENUATION_EPSILON);
    let factor = distance_sqr / range_sqr.max(ATTENUATION_EPSILON);
    let smooth_factor = (1.0 - factor * factor).clamp(0.0, 1.0);
    inverse_square * (smooth_factor + bias)
}
