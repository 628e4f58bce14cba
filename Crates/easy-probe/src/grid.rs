// easy-probe/Crates/easy-probe/src/grid.rs

//! Subdivision of probe volumes into cells, and placement of the probes at
//! the cell grid points.
//!
//! Cells live on a single global grid with cubic cells of `cell_size` units,
//! so overlapping volumes share cells. Probes sit every `probe_spacing` units
//! inside each cell, including on the cell faces, and a probe on a face is
//! shared by every cell touching it.

use crate::light::LightSource;
use crate::{Aabb, SH_COEFFICIENT_COUNT};
use arrayvec::ArrayVec;
use glam::{IVec3, Vec3};
use log::debug;
use serde_derive::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The largest allowed distance between neighboring probes.
pub const MAX_PROBE_SPACING: i32 = 16;
/// The largest allowed cell size.
pub const MAX_CELL_SIZE: i32 = 64;

/// Global placement parameters shared by every volume.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GridSettings {
    /// Distance between neighboring probes, in world units.
    pub probe_spacing: i32,
    /// Side length of a cell, in world units. Always a multiple of
    /// `probe_spacing`.
    pub cell_size: i32,
}

/// An axis-aligned box that should be filled with probes.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProbeVolume {
    pub center: Vec3,
    pub size: Vec3,
}

/// A cube of the global grid.
///
/// Two cells are equal if they have the same position and size.
#[derive(Clone, Debug)]
pub struct Cell {
    /// The center of the cell, rounded down for odd sizes.
    pub position: IVec3,
    pub size: i32,
    /// Index of this cell in [ProbeGrid::cells].
    pub index: usize,
    /// Indices into [ProbeGrid::probes] of every probe inside or on this cell.
    pub probe_indices: Vec<usize>,
}

/// A point at which incident light is recorded.
#[derive(Clone, Debug)]
pub struct Probe {
    pub position: IVec3,
    /// Second-order SH coefficients, laid out as `basis * 3 + channel`.
    pub coefficients: [f32; SH_COEFFICIENT_COUNT],
    /// Every cell this probe belongs to. A grid point touches at most eight
    /// cells.
    pub cells: ArrayVec<usize, 8>,
}

/// The cells and probes produced by a placement pass.
#[derive(Clone, Debug, Default)]
pub struct ProbeGrid {
    pub cells: Vec<Cell>,
    pub probes: Vec<Probe>,
}

impl GridSettings {
    /// Creates settings with `probe_spacing` clamped to the supported range
    /// and `cell_size` adjusted to a multiple of it.
    pub fn new(probe_spacing: i32, cell_size: i32) -> GridSettings {
        let probe_spacing = probe_spacing.clamp(1, MAX_PROBE_SPACING);
        let cell_size = adjusted_multiple(
            probe_spacing,
            cell_size.clamp(probe_spacing, MAX_CELL_SIZE),
            MAX_CELL_SIZE,
        );
        GridSettings {
            probe_spacing,
            cell_size,
        }
    }

    /// Reapplies the clamping of [GridSettings::new] to settings built or
    /// deserialized field by field.
    pub fn normalized(&self) -> GridSettings {
        GridSettings::new(self.probe_spacing, self.cell_size)
    }

    /// The number of probes along one axis of a single cell.
    pub fn probes_per_cell_axis(&self) -> i32 {
        self.cell_size / self.probe_spacing + 1
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings::new(1, 4)
    }
}

/// Returns the smallest multiple of `factor` that's at least `value`, or the
/// largest multiple not above `max` if that would be too big.
pub fn adjusted_multiple(factor: i32, value: i32, max: i32) -> i32 {
    let multiple = (value + factor - 1).div_euclid(factor) * factor;
    if multiple > max {
        (max / factor) * factor
    } else {
        multiple
    }
}

impl ProbeVolume {
    pub fn new(center: Vec3, size: Vec3) -> ProbeVolume {
        ProbeVolume { center, size }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.size * 0.5
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.size * 0.5
    }

    /// Volumes with a zero or negative extent on any axis are ignored.
    pub fn is_valid(&self) -> bool {
        self.size.cmpgt(Vec3::ZERO).all()
    }

    /// Returns a volume enclosing the range of every supported light, padded
    /// by one probe spacing.
    pub fn fit_to_lights(lights: &[LightSource], probe_spacing: i32) -> Option<ProbeVolume> {
        let bounds = lights
            .iter()
            .filter(|light| light.is_supported())
            .map(LightSource::range_bounds)
            .reduce(|a, b| a.union(&b))?;
        Some(ProbeVolume {
            center: bounds.center(),
            size: (bounds.size() + Vec3::splat(probe_spacing as f32)).max(Vec3::ZERO),
        })
    }

    fn cell_index_range(&self, cell_size: i32) -> (IVec3, IVec3) {
        let cell_size = cell_size as f32;
        let start = (self.min() / cell_size).floor().as_ivec3();
        let end = (self.max() / cell_size).ceil().as_ivec3();
        (start, end)
    }
}

impl Cell {
    pub fn min(&self) -> IVec3 {
        self.position - IVec3::splat(self.size / 2)
    }

    pub fn max(&self) -> IVec3 {
        self.min() + IVec3::splat(self.size)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min().as_vec3(), self.max().as_vec3())
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Cell) -> bool {
        self.position == other.position && self.size == other.size
    }
}

impl Eq for Cell {}

impl Probe {
    pub fn new(position: IVec3) -> Probe {
        Probe {
            position,
            coefficients: [0.0; SH_COEFFICIENT_COUNT],
            cells: ArrayVec::new(),
        }
    }
}

impl PartialEq for Probe {
    fn eq(&self, other: &Probe) -> bool {
        self.position == other.position
    }
}

impl Eq for Probe {}

/// The `(z, y, x)` ordering used everywhere a canonical order is needed.
pub fn scan_order_key(position: IVec3) -> (i32, i32, i32) {
    (position.z, position.y, position.x)
}

impl ProbeGrid {
    /// Subdivides the valid volumes into cells and places the probes.
    ///
    /// The result doesn't depend on the order of `volumes`: cells are kept in
    /// scan order, and probes are created while walking them in that order.
    pub fn build(volumes: &[ProbeVolume], settings: &GridSettings) -> ProbeGrid {
        let settings = &settings.normalized();
        let mut grid = ProbeGrid {
            cells: subdivide(volumes, settings.cell_size),
            probes: vec![],
        };
        grid.place_probes(settings);

        debug!(
            "Placed {} probes in {} cells (spacing {}, cell size {})",
            grid.probes.len(),
            grid.cells.len(),
            settings.probe_spacing,
            settings.cell_size
        );
        grid
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The minimum and maximum corners of the box enclosing every cell.
    pub fn cell_bounds(&self) -> Option<(IVec3, IVec3)> {
        let first = self.cells.first()?;
        Some(self.cells.iter().fold(
            (first.min(), first.max()),
            |(min, max), cell| (min.min(cell.min()), max.max(cell.max())),
        ))
    }

    fn place_probes(&mut self, settings: &GridSettings) {
        let mut probe_tags: HashMap<IVec3, usize> = HashMap::new();
        let step = settings.probe_spacing;
        let per_axis = settings.probes_per_cell_axis();

        for cell in &mut self.cells {
            let start = cell.min();
            for x in 0..per_axis {
                for y in 0..per_axis {
                    for z in 0..per_axis {
                        let position = start + IVec3::new(x, y, z) * step;
                        let probe_index = *probe_tags.entry(position).or_insert_with(|| {
                            self.probes.push(Probe::new(position));
                            self.probes.len() - 1
                        });

                        self.probes[probe_index].cells.push(cell.index);
                        cell.probe_indices.push(probe_index);
                    }
                }
            }
        }
    }
}

fn subdivide(volumes: &[ProbeVolume], cell_size: i32) -> Vec<Cell> {
    let mut seen: HashSet<IVec3> = HashSet::new();
    let mut cells = vec![];

    for volume in volumes.iter().filter(|volume| volume.is_valid()) {
        let (start, end) = volume.cell_index_range(cell_size);
        for x in start.x..end.x {
            for y in start.y..end.y {
                for z in start.z..end.z {
                    let position = IVec3::new(x, y, z) * cell_size + IVec3::splat(cell_size / 2);
                    if !seen.insert(position) {
                        continue;
                    }

                    cells.push(Cell {
                        position,
                        size: cell_size,
                        index: 0,
                        probe_indices: vec![],
                    });
                }
            }
        }
    }

    cells.sort_by_key(|cell| scan_order_key(cell.position));
    for (index, cell) in cells.iter_mut().enumerate() {
        cell.index = index;
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;
    use std::collections::BTreeSet;

    fn membership(grid: &ProbeGrid) -> BTreeSet<((i32, i32, i32), Vec<(i32, i32, i32)>)> {
        grid.probes
            .iter()
            .map(|probe| {
                let mut cells: Vec<_> = probe
                    .cells
                    .iter()
                    .map(|&cell| scan_order_key(grid.cells[cell].position))
                    .collect();
                cells.sort();
                (scan_order_key(probe.position), cells)
            })
            .collect()
    }

    #[test]
    fn cube_volume_produces_expected_counts() {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::splat(12.0));
        let grid = ProbeGrid::build(&[volume], &GridSettings::new(2, 6));

        assert_eq!(grid.cells.len(), 8);
        // Two cells per axis, three spacings per cell, plus the closing probe.
        let per_axis = 2 * (6 / 2) + 1;
        assert_eq!(grid.probes.len(), per_axis * per_axis * per_axis);
        assert_eq!(grid.cell_bounds(), Some((IVec3::splat(-6), IVec3::splat(6))));
    }

    #[test]
    fn adjacent_cells_share_face_probes() {
        let volume = ProbeVolume::new(vec3(4.0, 2.0, 2.0), vec3(8.0, 4.0, 4.0));
        let settings = GridSettings::new(2, 4);
        let grid = ProbeGrid::build(&[volume], &settings);
        assert_eq!(grid.cells.len(), 2);

        let per_cell = settings.probes_per_cell_axis() as usize;
        assert!(grid.probes.len() < 2 * per_cell.pow(3));
        assert_eq!(grid.probes.len(), 2 * per_cell.pow(3) - per_cell.pow(2));

        let shared: Vec<_> = grid.probes.iter().filter(|p| p.cells.len() == 2).collect();
        assert_eq!(shared.len(), per_cell.pow(2));
        assert!(shared.iter().all(|probe| probe.position.x == 4));

        for cell in &grid.cells {
            assert_eq!(cell.probe_indices.len(), per_cell.pow(3));
            for &probe in &cell.probe_indices {
                assert!(grid.probes[probe].cells.contains(&cell.index));
            }
        }
    }

    #[test]
    fn placement_ignores_volume_order() {
        let a = ProbeVolume::new(vec3(0.0, 0.0, 0.0), vec3(8.0, 8.0, 8.0));
        let b = ProbeVolume::new(vec3(6.0, 2.0, -3.0), vec3(8.0, 4.0, 10.0));
        let settings = GridSettings::new(2, 4);

        let forward = ProbeGrid::build(&[a, b], &settings);
        let backward = ProbeGrid::build(&[b, a], &settings);

        assert_eq!(forward.cells, backward.cells);
        assert_eq!(membership(&forward), membership(&backward));
    }

    #[test]
    fn overlapping_volumes_do_not_duplicate_cells() {
        let a = ProbeVolume::new(Vec3::ZERO, Vec3::splat(8.0));
        let grid_once = ProbeGrid::build(&[a], &GridSettings::new(2, 4));
        let grid_twice = ProbeGrid::build(&[a, a], &GridSettings::new(2, 4));
        assert_eq!(grid_once.cells.len(), grid_twice.cells.len());
        assert_eq!(grid_once.probes.len(), grid_twice.probes.len());
    }

    #[test]
    fn interior_probe_belongs_to_eight_cells() {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::splat(8.0));
        let grid = ProbeGrid::build(&[volume], &GridSettings::new(4, 4));
        let center = grid
            .probes
            .iter()
            .find(|probe| probe.position == IVec3::ZERO)
            .unwrap();
        assert_eq!(center.cells.len(), 8);
        assert!(grid.probes.iter().all(|probe| !probe.cells.is_empty()));
    }

    #[test]
    fn invalid_volumes_are_skipped() {
        let flat = ProbeVolume::new(Vec3::ZERO, vec3(4.0, 0.0, 4.0));
        let grid = ProbeGrid::build(&[flat], &GridSettings::default());
        assert!(grid.is_empty());
        assert!(grid.probes.is_empty());
        assert_eq!(grid.cell_bounds(), None);
    }

    #[test]
    fn settings_are_normalized() {
        assert_eq!(GridSettings::new(2, 5).cell_size, 6);
        assert_eq!(GridSettings::new(3, 1).cell_size, 3);
        assert_eq!(GridSettings::new(0, 4).probe_spacing, 1);
        assert_eq!(GridSettings::new(7, 1000).cell_size, 63);
        assert_eq!(adjusted_multiple(5, 62, 64), 60);
    }

    #[test]
    fn raw_settings_are_normalized_before_placement() {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::splat(8.0));

        let zero_spacing = GridSettings {
            probe_spacing: 0,
            cell_size: 4,
        };
        let grid = ProbeGrid::build(&[volume], &zero_spacing);
        assert_eq!(grid.cells.len(), 8);
        assert_eq!(grid.probes.len(), 9 * 9 * 9);

        let zero_cell = GridSettings {
            probe_spacing: 2,
            cell_size: 0,
        };
        assert_eq!(zero_cell.normalized(), GridSettings::new(2, 2));
        let grid = ProbeGrid::build(&[volume], &zero_cell);
        assert_eq!(grid.cells.len(), 64);
        assert_eq!(grid.probes.len(), 5 * 5 * 5);
    }

    #[test]
    fn volume_fits_point_lights() {
        let lights = [
            LightSource::point(vec3(-2.0, 0.0, 0.0), Vec3::ONE, 1.0, 1.0),
            LightSource::point(vec3(2.0, 0.0, 0.0), Vec3::ONE, 1.0, 1.0),
        ];
        let volume = ProbeVolume::fit_to_lights(&lights, 2).unwrap();
        assert_eq!(volume.center, Vec3::ZERO);
        assert_eq!(volume.size, vec3(8.0, 4.0, 4.0));
        assert!(ProbeVolume::fit_to_lights(&[], 2).is_none());
    }
}
