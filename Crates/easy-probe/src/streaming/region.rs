// easy-probe/Crates/easy-probe/src/streaming/region.rs

//! The camera-relative window of cells that should be resident.

use crate::dataset::DatasetMetadata;
use crate::Aabb;
use glam::{Affine3A, IVec3, Vec3};
use serde_derive::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_3;

/// What a camera is rendering for.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CameraKind {
    #[default]
    Game,
    SceneView,
    /// Asset thumbnails and the like.
    Preview,
    /// Reflection probe captures.
    Reflection,
}

/// The parts of a camera that determine which probes are streamed.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct StreamingCamera {
    /// Camera to world. The camera looks down its local -Z axis.
    pub transform: Affine3A,
    /// Vertical field of view in radians.
    pub vertical_fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub kind: CameraKind,
    /// Whether temporal antialiasing is on, which enables per-frame noise.
    pub temporal_antialiasing: bool,
}

/// A sphere around the region the camera can see.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

/// The box of cells to keep resident, in world units, on cell boundaries.
///
/// `box_min..box_max` is always a cube centered on the camera's cell, and
/// sizes the destination volumes. `valid_min..valid_max` is that cube clamped
/// to the dataset, which is the part that's actually read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StreamingWindow {
    pub box_min: IVec3,
    pub box_max: IVec3,
    pub valid_min: IVec3,
    pub valid_max: IVec3,
}

impl Default for StreamingCamera {
    fn default() -> Self {
        StreamingCamera {
            transform: Affine3A::IDENTITY,
            vertical_fov: FRAC_PI_3,
            aspect_ratio: 16.0 / 9.0,
            near: 0.3,
            kind: CameraKind::Game,
            temporal_antialiasing: false,
        }
    }
}

impl StreamingCamera {
    /// A game camera at `eye` looking towards `target`.
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> StreamingCamera {
        StreamingCamera {
            transform: Affine3A::look_at_rh(eye, target, up).inverse(),
            ..StreamingCamera::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.translation.into()
    }

    pub fn forward(&self) -> Vec3 {
        self.transform.transform_vector3(Vec3::NEG_Z).normalize_or_zero()
    }

    /// Whether this camera moves the streaming window.
    pub fn drives_streaming(&self) -> bool {
        !matches!(self.kind, CameraKind::Preview | CameraKind::Reflection)
    }

    /// The corners of the near plane in world space.
    pub fn near_plane_corners(&self) -> [Vec3; 4] {
        let half_height = self.near * (self.vertical_fov * 0.5).tan();
        let half_width = half_height * self.aspect_ratio;
        [
            Vec3::new(-half_width, -half_height, -self.near),
            Vec3::new(half_width, -half_height, -self.near),
            Vec3::new(half_width, half_height, -self.near),
            Vec3::new(-half_width, half_height, -self.near),
        ]
        .map(|corner| self.transform.transform_point3(corner))
    }

    /// A sphere of at least `budget_radius` that passes through the near-plane
    /// corners and extends forward from them.
    ///
    /// The radius is floored at the near-plane half-diagonal and at half a
    /// cell.
    pub fn bounding_sphere(&self, budget_radius: f32, cell_size: i32) -> BoundingSphere {
        let corners = self.near_plane_corners();
        let near_center = corners.iter().copied().sum::<Vec3>() * 0.25;
        let half_diagonal = near_center.distance(corners[0]);

        let radius = budget_radius
            .max(half_diagonal)
            .max(cell_size as f32 * 0.5);
        let reach = (radius * radius - half_diagonal * half_diagonal).max(0.0).sqrt();
        BoundingSphere {
            center: near_center + self.forward() * reach,
            radius,
        }
    }

    /// The world-space box to stream: the bounding sphere's box, grown to
    /// also enclose a sphere of the same radius around the near plane.
    ///
    /// The box only ever grows as the radius grows.
    pub fn streaming_bounds(&self, budget_radius: f32, cell_size: i32) -> Aabb {
        let sphere = self.bounding_sphere(budget_radius, cell_size);
        let near_center = self.near_plane_corners().iter().copied().sum::<Vec3>() * 0.25;
        let ahead = Aabb::from_center_size(sphere.center, Vec3::splat(sphere.radius * 2.0));
        let around = Aabb::from_center_size(near_center, Vec3::splat(sphere.radius * 2.0));
        ahead.union(&around)
    }
}

impl StreamingWindow {
    /// Snaps `bounds` to a cube of whole cells centered on the cell
    /// containing `anchor`, then clamps it to the dataset.
    ///
    /// Cell coordinates are limited to a quarter of the `i32` range in world
    /// units, so windows of arbitrarily distant cameras still have finite
    /// integer corners.
    pub fn new(bounds: &Aabb, anchor: Vec3, metadata: &DatasetMetadata) -> StreamingWindow {
        let cell_size = metadata.cell_size.max(1);
        let cell_size_f = cell_size as f32;
        let limit = i32::MAX / 4 / cell_size;
        let to_cell = |v: Vec3| {
            v.clamp(Vec3::splat(-limit as f32), Vec3::splat(limit as f32))
                .as_ivec3()
        };

        let center_cell = to_cell((anchor / cell_size_f).floor());
        let min_cell = to_cell((bounds.min / cell_size_f).floor());
        let end_cell = to_cell((bounds.max / cell_size_f).ceil());
        let extent = (center_cell - min_cell)
            .max(end_cell - center_cell - IVec3::ONE)
            .max_element()
            .max(0);

        let min_limit = IVec3::splat(-limit);
        let max_limit = IVec3::splat(limit);
        let box_min = (center_cell - IVec3::splat(extent)).clamp(min_limit, max_limit) * cell_size;
        let box_max =
            (center_cell + IVec3::splat(extent + 1)).clamp(min_limit, max_limit) * cell_size;
        StreamingWindow {
            box_min,
            box_max,
            valid_min: box_min.clamp(metadata.cell_min, metadata.cell_max),
            valid_max: box_max.clamp(metadata.cell_min, metadata.cell_max),
        }
    }

    /// The window for `camera` under `budget_radius`.
    pub fn for_camera(
        camera: &StreamingCamera,
        budget_radius: f32,
        metadata: &DatasetMetadata,
    ) -> StreamingWindow {
        let bounds = camera.streaming_bounds(budget_radius, metadata.cell_size);
        StreamingWindow::new(&bounds, camera.position(), metadata)
    }

    /// The window covering the entire dataset.
    pub fn whole(metadata: &DatasetMetadata) -> StreamingWindow {
        StreamingWindow {
            box_min: metadata.cell_min,
            box_max: metadata.cell_max,
            valid_min: metadata.cell_min,
            valid_max: metadata.cell_max,
        }
    }

    /// True if the window doesn't overlap the dataset by at least one cell.
    /// A window that only touches a face of the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.valid_max.cmple(self.valid_min).any()
    }

    /// The size of the destination volumes, in probes.
    pub fn buffer_size(&self, metadata: &DatasetMetadata) -> IVec3 {
        probe_count(self.box_min, self.box_max, metadata)
    }

    /// The size of the valid part, in probes.
    pub fn valid_probe_count(&self, metadata: &DatasetMetadata) -> IVec3 {
        probe_count(self.valid_min, self.valid_max, metadata)
    }
}

fn probe_count(min: IVec3, max: IVec3, metadata: &DatasetMetadata) -> IVec3 {
    let cells = (max - min) / metadata.cell_size;
    cells * (metadata.probe_count_per_cell_axis - 1) + IVec3::ONE
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn metadata() -> DatasetMetadata {
        DatasetMetadata {
            cell_min: IVec3::new(-12, -4, -8),
            probe_spacing: 2,
            cell_max: IVec3::new(12, 8, 16),
            cell_size: 4,
            probe_count_per_volume_axis: IVec3::new(13, 7, 13),
            probe_count_per_cell_axis: 3,
        }
    }

    fn cameras() -> Vec<StreamingCamera> {
        let mut cameras = vec![];
        for i in 0..40 {
            let t = i as f32;
            let eye = vec3((t * 1.7).sin() * 30.0, (t * 0.9).cos() * 10.0, t - 20.0);
            let target = eye + vec3((t * 0.3).cos(), (t * 1.3).sin() * 0.5, (t * 0.3).sin());
            let mut camera = StreamingCamera::looking_at(eye, target, Vec3::Y);
            camera.near = 0.1 + (i % 5) as f32;
            cameras.push(camera);
        }
        cameras
    }

    #[test]
    fn window_is_a_cube_inside_the_dataset() {
        let metadata = metadata();
        for camera in cameras() {
            for radius in [5.0, 10.0, 15.0] {
                let window = StreamingWindow::for_camera(&camera, radius, &metadata);
                let extent = window.box_max - window.box_min;
                assert_eq!(extent.x, extent.y);
                assert_eq!(extent.y, extent.z);
                assert_eq!(extent % metadata.cell_size, IVec3::ZERO);

                assert!(window.valid_min.cmpge(metadata.cell_min).all());
                assert!(window.valid_max.cmple(metadata.cell_max).all());
                assert!(window.valid_min.cmpge(window.box_min).all() || window.is_empty());
            }
        }
    }

    #[test]
    fn window_encloses_the_bounding_sphere() {
        let metadata = metadata();
        for camera in cameras() {
            let sphere = camera.bounding_sphere(10.0, metadata.cell_size);
            let window = StreamingWindow::for_camera(&camera, 10.0, &metadata);
            let min = sphere.center - Vec3::splat(sphere.radius);
            let max = sphere.center + Vec3::splat(sphere.radius);
            assert!(window.box_min.as_vec3().cmple(min).all());
            assert!(window.box_max.as_vec3().cmpge(max).all());
            for corner in camera.near_plane_corners() {
                assert!(sphere.center.distance(corner) <= sphere.radius + 1e-3);
            }
        }
    }

    #[test]
    fn larger_budgets_never_shrink_the_window() {
        let metadata = metadata();
        for camera in cameras() {
            let sizes: Vec<_> = [5.0, 10.0, 15.0]
                .iter()
                .map(|&radius| {
                    StreamingWindow::for_camera(&camera, radius, &metadata).buffer_size(&metadata)
                })
                .collect();
            assert!(sizes[0].cmple(sizes[1]).all(), "{:?}", sizes);
            assert!(sizes[1].cmple(sizes[2]).all(), "{:?}", sizes);
        }
    }

    #[test]
    fn window_far_from_the_dataset_is_empty() {
        let camera = StreamingCamera::looking_at(vec3(500.0, 0.0, 0.0), vec3(501.0, 0.0, 0.0), Vec3::Y);
        let window = StreamingWindow::for_camera(&camera, 5.0, &metadata());
        assert!(window.is_empty());
    }

    #[test]
    fn window_touching_a_face_is_empty() {
        let metadata = metadata();
        let bounds = Aabb::new(vec3(12.5, 0.5, 0.5), vec3(15.5, 3.5, 3.5));
        let window = StreamingWindow::new(&bounds, vec3(13.0, 1.0, 1.0), &metadata);
        assert_eq!(window.box_min, IVec3::new(12, 0, 0));
        assert_eq!(window.valid_min.x, 12);
        assert_eq!(window.valid_max.x, 12);
        assert!(window.is_empty());
    }

    #[test]
    fn distant_cameras_do_not_overflow() {
        let metadata = metadata();
        for eye in [vec3(1e10, 0.0, 0.0), vec3(-1e30, 1e30, 0.0), vec3(0.0, 0.0, 1e20)] {
            let camera = StreamingCamera {
                transform: Affine3A::from_translation(eye),
                ..StreamingCamera::default()
            };
            for radius in [5.0, 10.0, 15.0] {
                let window = StreamingWindow::for_camera(&camera, radius, &metadata);
                assert!(window.is_empty());
                assert!(window.buffer_size(&metadata).cmpge(IVec3::ONE).all());
            }
        }
    }

    #[test]
    fn odd_cell_sizes_stay_on_cell_boundaries() {
        let metadata = DatasetMetadata {
            cell_min: IVec3::splat(-9),
            probe_spacing: 1,
            cell_max: IVec3::splat(9),
            cell_size: 3,
            probe_count_per_volume_axis: IVec3::splat(19),
            probe_count_per_cell_axis: 4,
        };
        let camera = StreamingCamera::looking_at(vec3(0.5, 1.0, 0.5), vec3(0.5, 1.0, -5.0), Vec3::Y);
        let window = StreamingWindow::for_camera(&camera, 5.0, &metadata);
        assert_eq!(window.box_min % 3, IVec3::ZERO);
        assert_eq!(window.box_max % 3, IVec3::ZERO);
        let size = window.buffer_size(&metadata);
        assert_eq!(size, (window.box_max - window.box_min) + IVec3::ONE);
    }
}
