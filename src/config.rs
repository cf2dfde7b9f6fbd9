use crate::{
    camera::{CameraDefaults, DEFAULT_CYLINDER_IMAGES},
    interaction::InteractionSettings,
    terrain::ModelKind,
    viewer::{Fog, Lighting},
};
use anyhow::{Context, Result};
use bevy::prelude::*;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The settings a [`TerrainViewer`](crate::viewer::TerrainViewer) starts with.
///
/// Missing fields of a RON file take their default value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub camera: CameraDefaults,
    pub lighting: Lighting,
    pub fog: Fog,
    pub background: Vec3,
    pub shading: bool,
    /// Multisampling, disabled while dragging.
    pub antialiasing: bool,
    /// Perspective slices of a cylindrical panorama.
    pub cylinder_images: u32,
    /// One cylindrical slice per pixel column, overrides `cylinder_images`.
    pub high_resolution: bool,
    pub interaction: InteractionSettings,
    /// Starts the fallback chain at this strategy instead of the most capable one.
    pub preferred_model: Option<ModelKind>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            camera: default(),
            lighting: default(),
            fog: default(),
            background: Vec3::ONE,
            shading: true,
            antialiasing: true,
            cylinder_images: DEFAULT_CYLINDER_IMAGES,
            high_resolution: false,
            interaction: default(),
            preferred_model: None,
        }
    }
}

impl ViewerConfig {
    pub fn from_ron(source: &str) -> Result<Self> {
        ron::from_str(source).context("Invalid viewer configuration.")
    }

    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("Could not read the viewer configuration {}.", path.display()))?;
        Self::from_ron(&source)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
