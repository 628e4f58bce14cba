// easy-probe/Crates/bake-easy-probe/src/main.rs

use crate::scene::SceneDescription;
use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use easy_probe::{BakeContext, BakeReport, DatasetReader, ProbeGrid, SH_COEFFICIENT_COUNT};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

mod scene;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Places and bakes probes, writing the dataset to `<OUT_DIR>/EasyProbe`
    Bake {
        /// JSON scene description
        scene: PathBuf,

        /// Defaults to the directory containing the scene description
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Overrides the sample count of the scene description
        #[arg(short, long)]
        sample_count: Option<u32>,
    },

    /// Places probes and prints how many there are
    Place {
        /// JSON scene description
        scene: PathBuf,
    },

    /// Prints the metadata of a baked dataset
    Inspect {
        /// The `EasyProbe` directory of a baked scene
        dataset: PathBuf,

        /// Also prints the coefficients of this probe
        #[arg(short, long)]
        probe: Option<usize>,
    },
}

fn main() {
    color_backtrace::install();
    pretty_env_logger::init();

    let args = Args::parse();
    let result = match args.command {
        Command::Bake {
            scene,
            out_dir,
            sample_count,
        } => bake(&scene, out_dir, sample_count).map(|report| match report {
            Some(report) => print_report(&report),
            None => println!("No valid probe volumes; nothing was baked."),
        }),
        Command::Place { scene } => place(&scene).map(|grid| {
            println!("cells={}", grid.cells.len());
            println!("probes={}", grid.probes.len());
        }),
        Command::Inspect { dataset, probe } => inspect(&dataset, probe),
    };

    result.unwrap_or_else(|err| die(format!("{:#}", err)));
}

fn die(message: impl AsRef<str>) -> ! {
    eprintln!("Error: {}", message.as_ref());
    process::exit(1)
}

fn bake(
    scene_path: &Path,
    out_dir: Option<PathBuf>,
    sample_count: Option<u32>,
) -> AnyhowResult<Option<BakeReport>> {
    let scene = SceneDescription::load(scene_path)?;
    let scene_dir = out_dir
        .or_else(|| scene_path.parent().map(Path::to_owned))
        .or_else(|| env::current_dir().ok())
        .context("Couldn't find a suitable output directory")?;

    let mut settings = scene.bake;
    if let Some(sample_count) = sample_count {
        settings.sample_count = sample_count;
    }

    let mut context = BakeContext::new(scene_dir, scene.grid_settings());
    context.set_volumes(scene.volumes());
    context
        .bake(&scene.lights, &settings)
        .context("Failed to bake the probes")
}

fn place(scene_path: &Path) -> AnyhowResult<ProbeGrid> {
    let scene = SceneDescription::load(scene_path)?;
    Ok(ProbeGrid::build(&scene.volumes(), &scene.grid_settings()))
}

fn print_report(report: &BakeReport) {
    println!("output={}", report.output_dir.display());
    println!("cells={}", report.cell_count);
    println!("probes={}", report.probe_count);
    println!("meta={:#?}", report.metadata);

    let attenuation = &report.diagnostics.attenuation;
    if let Some(max) = attenuation.iter().copied().reduce(f32::max) {
        println!("max_attenuation={}", max);
    }
}

fn inspect(dataset: &Path, probe: Option<usize>) -> AnyhowResult<()> {
    let reader = DatasetReader::open(dataset)
        .with_context(|| format!("Failed to open the dataset {}", dataset.display()))?;
    println!("meta={:#?}", reader.metadata());
    println!("probes={}", reader.metadata().total_probe_count());
    println!("cells={}", reader.cell_records()?.len());

    if let Some(index) = probe {
        let coefficients = reader.probe_coefficients(index)?;
        debug_assert_eq!(coefficients.len(), SH_COEFFICIENT_COUNT);
        for (basis, rgb) in coefficients.chunks_exact(3).enumerate() {
            println!("sh[{}]=({}, {}, {})", basis, rgb[0], rgb[1], rgb[2]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SCENE: &str = r#"{
        "grid": { "probe_spacing": 2, "cell_size": 4 },
        "bake": { "sample_count": 8 },
        "volumes": [{ "center": [0, 0, 0], "size": [8, 8, 8] }],
        "lights": [{ "position": [0, 3, 0], "intensity": 1.0, "color": [1, 1, 1], "range": 6.0 }]
    }"#;

    #[test]
    fn bake_writes_next_to_the_scene() {
        let dir = TempDir::new().unwrap();
        let scene_path = dir.path().join("scene.json");
        fs::write(&scene_path, SCENE).unwrap();

        assert_eq!(place(&scene_path).unwrap().probes.len(), 125);

        let report = bake(&scene_path, None, Some(4)).unwrap().unwrap();
        assert_eq!(report.output_dir, dir.path().join(easy_probe::OUTPUT_DIR_NAME));
        inspect(&report.output_dir, Some(0)).unwrap();
        assert!(inspect(&report.output_dir, Some(125)).is_err());
    }

    #[test]
    fn malformed_scenes_are_reported() {
        let dir = TempDir::new().unwrap();
        let scene_path = dir.path().join("scene.json");
        fs::write(&scene_path, "{ \"volumes\": 3 }").unwrap();
        let err = place(&scene_path).unwrap_err();
        assert!(format!("{:#}", err).contains("parse"));
    }
}
