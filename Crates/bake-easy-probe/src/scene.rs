// easy-probe/Crates/bake-easy-probe/src/scene.rs

//! The JSON scene description consumed by the command line tools.

use anyhow::{Context, Result as AnyhowResult};
use easy_probe::{BakeSettings, GridSettings, LightSource, ProbeVolume};
use log::warn;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything needed to place and bake probes for one scene.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    /// Normalized before use, so any values are accepted here.
    pub grid: GridSettings,
    pub bake: BakeSettings,
    pub volumes: Vec<ProbeVolume>,
    /// Adds a volume enclosing the range of every point light.
    pub fit_volume_to_lights: bool,
    pub lights: Vec<LightSource>,
}

impl SceneDescription {
    pub fn load(path: &Path) -> AnyhowResult<SceneDescription> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read the scene description {}", path.display()))?;
        let scene: SceneDescription = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse the scene description {}", path.display()))?;

        let unsupported = scene.lights.iter().filter(|light| !light.is_supported()).count();
        if unsupported > 0 {
            warn!("{} lights aren't point lights and won't contribute", unsupported);
        }
        Ok(scene)
    }

    pub fn grid_settings(&self) -> GridSettings {
        GridSettings::new(self.grid.probe_spacing, self.grid.cell_size)
    }

    /// The listed volumes, plus the fitted one if requested.
    pub fn volumes(&self) -> Vec<ProbeVolume> {
        let mut volumes = self.volumes.clone();
        if self.fit_volume_to_lights {
            let spacing = self.grid_settings().probe_spacing;
            volumes.extend(ProbeVolume::fit_to_lights(&self.lights, spacing));
        }
        volumes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn minimal_scene_uses_defaults() {
        let scene: SceneDescription = serde_json::from_str(
            r#"{
                "grid": { "probe_spacing": 2, "cell_size": 5 },
                "volumes": [{ "center": [0, 0, 0], "size": [8, 8, 8] }],
                "lights": [{
                    "position": [1, 2, 3],
                    "intensity": 2.0,
                    "color": [1, 1, 1],
                    "range": 10.0
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(scene.grid_settings(), GridSettings::new(2, 6));
        assert_eq!(scene.bake, BakeSettings::default());
        assert_eq!(scene.lights[0].position, vec3(1.0, 2.0, 3.0));
        assert!(scene.lights[0].is_supported());
        assert_eq!(scene.volumes().len(), 1);
    }

    #[test]
    fn fitted_volume_is_appended() {
        let scene = SceneDescription {
            fit_volume_to_lights: true,
            lights: vec![LightSource::point(
                vec3(4.0, 0.0, 0.0),
                vec3(1.0, 1.0, 1.0),
                1.0,
                2.0,
            )],
            ..SceneDescription::default()
        };
        let volumes = scene.volumes();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].center, vec3(4.0, 0.0, 0.0));
    }
}
