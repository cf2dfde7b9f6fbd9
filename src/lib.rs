//! This crate renders height-field terrains as shaded relief, for cartographic viewing.
//!
//! # Overview
//! A [`HeightGrid`](grid::HeightGrid) of elevations is handed to a
//! [`TerrainViewer`](viewer::TerrainViewer), which turns it into geometry with one of three
//! strategies, depending on what the OpenGL driver supports:
//! a vertex shader that samples the elevations from a float texture, vertex buffers, or
//! display lists that run on any OpenGL 1.1 driver.
//! See the [`terrain`] module for more information.
//!
//! The camera supports perspective, parallel oblique, plan oblique, orthogonal and
//! cylindrical panorama views.
//! Plan oblique relief keeps the map view undistorted and shears each vertex proportional
//! to its elevation. The shear can be changed interactively by dragging the terrain.
//! See the [`camera`] and [`interaction`] modules.
//!
//! # Threading
//! All GPU work happens on the thread that owns the viewer and its [`Gl`](gl::Gl) context.
//! Other threads change the viewer through [`ViewerHandle`](viewer::ViewerHandle)s, whose
//! commands are applied at the start of the next frame.
//! With the `plugin` feature, [`ReliefViewerPlugin`](plugin::ReliefViewerPlugin) forwards
//! the input of a bevy app this way.
//!
//! # Devices
//! With the `glow` feature, [`GlowGl`](gl::GlowGl) drives a live OpenGL context, created by
//! the windowing library of the application. [`HeadlessGl`](gl::HeadlessGl) rasterizes
//! on the CPU and is meant for tests.

pub mod camera;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod gl;
pub mod grid;
pub mod interaction;
#[cfg(feature = "plugin")]
pub mod plugin;
pub mod program;
pub mod shaders;
pub mod terrain;
pub mod texture;
pub mod viewer;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        camera::{CameraDefaults, CameraMode, CameraState},
        capabilities::GlCapabilities,
        config::ViewerConfig,
        error::{ReliefError, ReliefResult, RenderDiagnostic},
        gl::{headless::HeadlessGl, Gl},
        grid::HeightGrid,
        interaction::{InputEvent, InteractionSettings, RotationAnimation, ShearAnimation},
        terrain::{ModelKind, TerrainModel},
        texture::HeightMapper,
        viewer::{CameraCommand, Fog, Lighting, TerrainViewer, ViewerCommand, ViewerHandle},
    };

    #[cfg(feature = "glow")]
    #[doc(hidden)]
    pub use crate::gl::GlowGl;

    #[cfg(feature = "plugin")]
    #[doc(hidden)]
    pub use crate::plugin::ReliefViewerPlugin;
}
