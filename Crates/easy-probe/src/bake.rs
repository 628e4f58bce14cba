// easy-probe/Crates/easy-probe/src/bake.rs

//! Projecting point lights onto the probes, and the baking session that ties
//! placement, projection, and serialization together.

use crate::dataset::{DatasetError, DatasetMetadata, DatasetWriter};
use crate::grid::{Cell, GridSettings, ProbeGrid, ProbeVolume};
use crate::light::LightSource;
use crate::sh::{self, MIN_SAMPLE_PDF, SH_BASIS_COUNT};
use crate::{OUTPUT_DIR_NAME, SH_COEFFICIENT_COUNT};
use glam::Vec3;
use log::{debug, error, info};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error as Thiserror;

/// Probes handed to a worker at once.
const PROBE_BATCH_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    /// Monte-Carlo samples per probe and light.
    pub sample_count: u32,
    /// Skip lights whose broad-phase box touches none of a probe's cells.
    pub cull_lights_by_bounds: bool,
}

impl Default for BakeSettings {
    fn default() -> Self {
        BakeSettings {
            sample_count: 256,
            cull_lights_by_bounds: false,
        }
    }
}

#[derive(Thiserror, Debug)]
pub enum BakeError {
    #[error("Failed to prepare the output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("The sample count must be positive")]
    InvalidSampleCount,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Per-probe, per-light values computed alongside the coefficients.
///
/// Both arrays are probe-major: the entry for probe `p` and light `l` is at
/// `p * light_count + l`.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ProbeDiagnostics {
    pub light_count: usize,
    pub attenuation: Vec<f32>,
    /// Always 1, since nothing occludes the lights.
    pub visibility: Vec<f32>,
}

/// The outcome of a bake that wrote a dataset.
#[derive(Clone, Debug)]
pub struct BakeReport {
    pub output_dir: PathBuf,
    pub metadata: DatasetMetadata,
    pub cell_count: usize,
    pub probe_count: usize,
    pub diagnostics: ProbeDiagnostics,
}

/// A baking session for one scene.
///
/// The session owns the probe volumes, the grid built from them, and the
/// location of the output directory. The grid is rebuilt lazily whenever the
/// volumes or settings change.
pub struct BakeContext {
    scene_dir: PathBuf,
    grid_settings: GridSettings,
    volumes: Vec<ProbeVolume>,
    grid: Option<ProbeGrid>,
}

impl BakeContext {
    pub fn new(scene_dir: impl Into<PathBuf>, grid_settings: GridSettings) -> BakeContext {
        BakeContext {
            scene_dir: scene_dir.into(),
            grid_settings: grid_settings.normalized(),
            volumes: vec![],
            grid: None,
        }
    }

    /// The directory that [BakeContext::bake] clears and writes into.
    pub fn output_dir(&self) -> PathBuf {
        self.scene_dir.join(OUTPUT_DIR_NAME)
    }

    pub fn grid_settings(&self) -> &GridSettings {
        &self.grid_settings
    }

    /// Settings are normalized as by [GridSettings::new].
    pub fn set_grid_settings(&mut self, grid_settings: GridSettings) {
        let grid_settings = grid_settings.normalized();
        if grid_settings != self.grid_settings {
            self.grid_settings = grid_settings;
            self.grid = None;
        }
    }

    pub fn volumes(&self) -> &[ProbeVolume] {
        &self.volumes
    }

    pub fn add_volume(&mut self, volume: ProbeVolume) {
        self.volumes.push(volume);
        self.grid = None;
    }

    pub fn set_volumes(&mut self, volumes: Vec<ProbeVolume>) {
        self.volumes = volumes;
        self.grid = None;
    }

    /// The most recently placed grid, unless it has gone stale.
    pub fn grid(&self) -> Option<&ProbeGrid> {
        self.grid.as_ref()
    }

    /// Reruns subdivision and placement.
    pub fn place_probes(&mut self) -> &ProbeGrid {
        self.grid
            .insert(ProbeGrid::build(&self.volumes, &self.grid_settings))
    }

    /// Places probes if needed, bakes them against `lights`, and writes the
    /// dataset to [BakeContext::output_dir], clearing it first.
    ///
    /// Returns `Ok(None)` without touching the disk if there are no cells.
    pub fn bake(
        &mut self,
        lights: &[LightSource],
        settings: &BakeSettings,
    ) -> Result<Option<BakeReport>, BakeError> {
        let result = self.bake_into_output_dir(lights, settings);
        if let Err(ref err) = result {
            error!("Bake failed: {}", err);
        }
        result
    }

    fn bake_into_output_dir(
        &mut self,
        lights: &[LightSource],
        settings: &BakeSettings,
    ) -> Result<Option<BakeReport>, BakeError> {
        if settings.sample_count == 0 {
            return Err(BakeError::InvalidSampleCount);
        }

        if self.grid.is_none() {
            self.place_probes();
        }
        let output_dir = self.output_dir();
        let grid_settings = self.grid_settings;
        let Some(grid) = self.grid.as_mut() else {
            return Ok(None);
        };
        if grid.is_empty() {
            debug!("No valid probe volumes; nothing to bake");
            return Ok(None);
        }

        recreate_dir(&output_dir)?;

        for probe in &mut grid.probes {
            probe.coefficients = [0.0; SH_COEFFICIENT_COUNT];
        }
        let diagnostics = bake_probes(grid, lights, settings);
        let metadata = DatasetWriter::new(&output_dir).write(grid, &grid_settings)?;

        Ok(Some(BakeReport {
            output_dir,
            metadata,
            cell_count: grid.cells.len(),
            probe_count: grid.probes.len(),
            diagnostics,
        }))
    }
}

fn recreate_dir(path: &Path) -> Result<(), BakeError> {
    let wrap = |source| BakeError::OutputDir {
        path: path.to_owned(),
        source,
    };
    if path.exists() {
        fs::remove_dir_all(path).map_err(wrap)?;
    }
    fs::create_dir_all(path).map_err(wrap)
}

/// Adds the contribution of every light to the coefficients of every probe in
/// `grid`.
///
/// Probes are processed in parallel. Each worker owns the coefficients of the
/// probes it was handed, and everything else is read-only, so the result
/// doesn't depend on scheduling.
pub fn bake_probes(
    grid: &mut ProbeGrid,
    lights: &[LightSource],
    settings: &BakeSettings,
) -> ProbeDiagnostics {
    let probe_count = grid.probes.len();
    let light_count = lights.len();
    let mut diagnostics = ProbeDiagnostics {
        light_count,
        attenuation: vec![0.0; probe_count * light_count],
        visibility: vec![1.0; probe_count * light_count],
    };
    if probe_count == 0 || light_count == 0 || settings.sample_count == 0 {
        return diagnostics;
    }

    let start = Instant::now();
    let mut coefficients: Vec<f32> = grid
        .probes
        .iter()
        .flat_map(|probe| probe.coefficients)
        .collect();

    let cells = &grid.cells;
    let probes = &grid.probes;
    coefficients
        .par_chunks_mut(SH_COEFFICIENT_COUNT)
        .zip(diagnostics.attenuation.par_chunks_mut(light_count))
        .enumerate()
        .with_min_len(PROBE_BATCH_SIZE)
        .for_each(|(probe_index, (accumulator, attenuation))| {
            let probe = &probes[probe_index];
            let position = probe.position.as_vec3();
            for (light, attenuation) in lights.iter().zip(attenuation.iter_mut()) {
                if settings.cull_lights_by_bounds
                    && !reaches_any_cell(light, &probe.cells, cells)
                {
                    continue;
                }
                *attenuation =
                    accumulate_light(light, position, settings.sample_count, accumulator);
            }
        });

    for (probe, baked) in grid
        .probes
        .iter_mut()
        .zip(coefficients.chunks_exact(SH_COEFFICIENT_COUNT))
    {
        probe.coefficients.copy_from_slice(baked);
    }

    info!(
        "Baked {} probes against {} lights with {} samples in {:?}",
        probe_count,
        light_count,
        settings.sample_count,
        start.elapsed()
    );
    diagnostics
}

fn reaches_any_cell(light: &LightSource, probe_cells: &[usize], cells: &[Cell]) -> bool {
    probe_cells
        .iter()
        .any(|&cell| light.intersects_cell(&cells[cell]))
}

/// Integrates one light over the sphere around a probe and adds the result to
/// `accumulator`, laid out as `basis * 3 + channel`. Returns the attenuation.
///
/// Directions are drawn with a cosine distribution around the direction to the
/// light, and each sample is divided by its PDF and by the sample count as
/// it's accumulated.
pub fn accumulate_light(
    light: &LightSource,
    probe_position: Vec3,
    sample_count: u32,
    accumulator: &mut [f32],
) -> f32 {
    let attenuation = light.attenuation(probe_position);
    if !light.is_supported() || sample_count == 0 {
        return attenuation;
    }

    let normal = light.position - probe_position;
    let constants = sh::basis_constants();
    let scale = attenuation / sample_count as f32;

    for sample_index in 0..sample_count {
        let (u1, u2) = sh::sample_point(sample_index);
        let (direction, pdf) = sh::cosine_weighted_direction(u1, u2, normal);
        if pdf <= MIN_SAMPLE_PDF {
            continue;
        }

        let radiance = light.radiance(direction, probe_position) * (scale / pdf);
        let basis = sh::basis(direction);
        for index in 0..SH_BASIS_COUNT {
            let encoded = radiance * (basis[index] * constants[index]);
            accumulator[index * 3] += encoded.x;
            accumulator[index * 3 + 1] += encoded.y;
            accumulator[index * 3 + 2] += encoded.z;
        }
    }
    attenuation
}
