//! The geometry strategies that turn a [`HeightGrid`] into draw calls.
//!
//! Three interchangeable strategies share the [`TerrainModel`] interface:
//! - [`ShaderModel`] stores the elevations in a float texture and reconstructs the surface
//!   in a vertex shader, so that only grid indices are uploaded,
//! - [`VboModel`] uploads positions and normals into vertex buffers,
//! - [`DisplayListModel`] compiles immediate mode strips and runs on any OpenGL 1.1 driver.
//!
//! The viewer picks the first strategy of [`ModelKind::FALLBACK_CHAIN`] the driver can run
//! and walks down the chain when a strategy fails while rendering.
//!
//! All strategies tessellate lazily: [`TerrainModel::set_model`] only stores the grid,
//! the GPU resources are built by the next [`TerrainModel::load_model`] inside a frame.

use crate::{
    capabilities::GlCapabilities,
    error::ReliefResult,
    gl::Gl,
    grid::HeightGrid,
    texture::{HeightMapper, Texture},
};
use bevy::prelude::*;
use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

pub mod display_list;
pub mod patches;
pub mod shader_model;
pub mod vbo;

pub use display_list::DisplayListModel;
pub use patches::{Patch, PatchLayout};
pub use shader_model::ShaderModel;
pub use vbo::VboModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ModelKind {
    #[display("shader model")]
    Shader,
    #[display("vertex buffer model")]
    Vbo,
    #[display("display list model")]
    DisplayList,
}

impl ModelKind {
    /// The strategies, from the most to the least capable.
    pub const FALLBACK_CHAIN: [ModelKind; 3] =
        [ModelKind::Shader, ModelKind::Vbo, ModelKind::DisplayList];

    pub fn can_run(self, capabilities: &GlCapabilities) -> bool {
        match self {
            ModelKind::Shader => ShaderModel::supported(capabilities),
            ModelKind::Vbo => VboModel::supported(capabilities),
            ModelKind::DisplayList => DisplayListModel::supported(capabilities),
        }
    }

    pub fn create(self, capabilities: &GlCapabilities) -> Box<dyn TerrainModel> {
        let core = ModelCore::new(capabilities.clone());
        match self {
            ModelKind::Shader => Box::new(ShaderModel::new(core)),
            ModelKind::Vbo => Box::new(VboModel::new(core)),
            ModelKind::DisplayList => Box::new(DisplayListModel::new(core)),
        }
    }

    /// The strategies weaker than this one, in fallback order.
    pub fn weaker(self) -> impl Iterator<Item = ModelKind> {
        Self::FALLBACK_CHAIN
            .into_iter()
            .skip_while(move |kind| *kind != self)
            .skip(1)
    }

    /// The most capable strategy the driver runs, starting at `preferred`.
    pub fn best(capabilities: &GlCapabilities, preferred: Option<ModelKind>) -> ModelKind {
        let start = preferred.unwrap_or(ModelKind::Shader);

        std::iter::once(start)
            .chain(start.weaker())
            .find(|kind| kind.can_run(capabilities))
            .unwrap_or(ModelKind::DisplayList)
    }
}

/// The state all strategies share.
pub struct ModelCore {
    capabilities: GlCapabilities,
    grid: Option<HeightGrid>,
    mapper: HeightMapper,
    pub(crate) initialized: bool,
    /// The byte budget of a patch vertex buffer.
    pub(crate) buffer_budget: usize,
}

impl ModelCore {
    pub fn new(capabilities: GlCapabilities) -> Self {
        Self {
            capabilities,
            grid: None,
            mapper: HeightMapper::default(),
            initialized: false,
            buffer_budget: patches::VERTEX_BUFFER_BUDGET,
        }
    }

    pub fn capabilities(&self) -> &GlCapabilities {
        &self.capabilities
    }

    pub fn grid(&self) -> Option<&HeightGrid> {
        self.grid.as_ref()
    }

    pub fn mapper(&self) -> &HeightMapper {
        &self.mapper
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_model(&mut self, grid: HeightGrid, mut mapper: HeightMapper) -> ReliefResult<()> {
        grid.check_displayable()?;
        mapper.init(&grid)?;

        self.grid = Some(grid);
        self.mapper = mapper;
        self.initialized = false;
        Ok(())
    }

    /// Whether 1D texture coordinates have to be stored per vertex,
    /// because they are not proportional to the elevation.
    fn needs_texture_coordinates(&self, texture: &Texture) -> bool {
        texture.is_1d() && !self.mapper.is_linear()
    }
}

/// Turns a height grid into GPU resources and draw calls.
pub trait TerrainModel {
    fn kind(&self) -> ModelKind;

    fn core(&self) -> &ModelCore;

    fn core_mut(&mut self) -> &mut ModelCore;

    /// Whether the driver supports this strategy.
    fn can_run(&self) -> bool {
        self.kind().can_run(self.core().capabilities())
    }

    /// Whether this strategy can display the grid with the limits of the driver.
    fn can_display(&self, grid: &HeightGrid) -> ReliefResult<()> {
        grid.check_displayable()
    }

    /// Stores the grid and invalidates the geometry, nothing is uploaded until the next `load_model`.
    fn set_model(&mut self, grid: HeightGrid, mapper: HeightMapper) -> ReliefResult<()> {
        self.can_display(&grid)?;
        self.core_mut().set_model(grid, mapper)
    }

    /// Tessellates the grid and uploads it, unless the uploaded geometry is still valid.
    fn load_model(&mut self, gl: &mut dyn Gl, texture: &Texture) -> ReliefResult<()>;

    fn draw(&mut self, gl: &mut dyn Gl, texture: &Texture, shading: bool, fog: bool)
        -> ReliefResult<()>;

    /// Deletes all GPU resources, calling it again is a no-op.
    fn release_model(&mut self, gl: &mut dyn Gl);

    /// Forces a new tessellation, as vertex attributes may depend on the texture.
    fn texture_changed(&mut self) {
        self.core_mut().initialized = false;
    }

    fn grid(&self) -> Option<&HeightGrid> {
        self.core().grid()
    }

    /// Whether the plan oblique shear is applied by the strategy instead of the modelview matrix.
    fn shears_in_shader(&self) -> bool {
        false
    }

    fn set_shearing(&mut self, _shear: Vec2) {}
}

/// The normal of a vertex from the finite differences to its right and lower neighbours.
/// Elevations are in cells, void neighbours yield an upright normal.
#[inline]
pub fn surface_normal(z00: f32, z01: f32, z10: f32) -> Vec3 {
    let dx = z00 - z01;
    let dy = z00 - z10;
    if dx.is_nan() || dy.is_nan() {
        return Vec3::Z;
    }

    let inverse_length = 1.0 / (dx * dx + dy * dy + 1.0).sqrt();
    Vec3::new(dx, dy, 1.0) * inverse_length
}

/// The position of a grid vertex in the unit box, elevations start at zero.
#[inline]
pub fn grid_vertex(grid: &HeightGrid, row: usize, col: usize) -> Vec3 {
    let scale = grid.unit_scale();
    Vec3::new(
        col as f32 * scale,
        row as f32 * scale,
        grid.relative_elevation(row, col) * scale,
    )
}

/// The normal of a grid vertex, neighbours are clamped at the border.
pub fn grid_normal(grid: &HeightGrid, row: usize, col: usize) -> Vec3 {
    let right = (col + 1).min(grid.cols() - 1);
    let below = (row + 1).min(grid.rows() - 1);

    surface_normal(
        grid.relative_elevation(row, col),
        grid.relative_elevation(row, right),
        grid.relative_elevation(below, col),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::{HeadlessGl, HeadlessInfo};
    use itertools::Itertools;
    use ndarray::Array2;
    use rand::Rng;

    fn capabilities(info: HeadlessInfo) -> GlCapabilities {
        GlCapabilities::query(&HeadlessGl::new(info))
    }

    #[test]
    fn fallback_chain_follows_capability_tiers() {
        let modern = capabilities(HeadlessInfo::opengl_2_1());
        let buffers = capabilities(HeadlessInfo::opengl_1_5());
        let legacy = capabilities(HeadlessInfo::opengl_1_1());
        let core = capabilities(HeadlessInfo::opengl_2_1().with_version("3.2.0"));

        assert_eq!(ModelKind::best(&modern, None), ModelKind::Shader);
        assert_eq!(ModelKind::best(&buffers, None), ModelKind::Vbo);
        assert_eq!(ModelKind::best(&legacy, None), ModelKind::DisplayList);
        assert_eq!(ModelKind::best(&core, Some(ModelKind::Vbo)), ModelKind::DisplayList);
        assert_eq!(
            ModelKind::best(&GlCapabilities::unavailable(), None),
            ModelKind::DisplayList
        );
        assert_eq!(
            ModelKind::best(&modern, Some(ModelKind::Vbo)),
            ModelKind::Vbo
        );

        assert_eq!(
            ModelKind::Shader.weaker().collect_vec(),
            vec![ModelKind::Vbo, ModelKind::DisplayList]
        );
        assert_eq!(ModelKind::DisplayList.weaker().next(), None);
    }

    #[test]
    fn flat_surfaces_have_upright_normals() {
        assert_eq!(surface_normal(5.0, 5.0, 5.0), Vec3::Z);
        assert_eq!(surface_normal(f32::NAN, 5.0, 5.0), Vec3::Z);

        let normal = surface_normal(1.0, 0.0, 1.0);
        assert!((normal.length() - 1.0).abs() < 1e-6);
        assert!(normal.x > 0.0 && normal.y == 0.0);
    }

    fn distinct(positions: impl Iterator<Item = Vec3>) -> (usize, Vec3, Vec3) {
        let positions = positions.collect_vec();
        let count = positions
            .iter()
            .map(|p| p.to_array().map(f32::to_bits))
            .unique()
            .count();
        let min = positions.iter().fold(Vec3::INFINITY, |a, b| a.min(*b));
        let max = positions.iter().fold(Vec3::NEG_INFINITY, |a, b| a.max(*b));
        (count, min, max)
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    #[test]
    fn display_list_and_vbo_emit_the_same_surface() {
        let mut rng = rand::rng();
        let capabilities = capabilities(HeadlessInfo::opengl_1_5());

        for (rows, cols) in [(2, 2), (7, 3), (4, 11), (23, 17)] {
            let values = Array2::from_shape_fn((rows, cols), |_| rng.random_range(-50.0..900.0));
            let grid = HeightGrid::new(values, 30.0).unwrap();
            let texture = Texture::new();

            let mut gl = HeadlessGl::new(HeadlessInfo::opengl_1_5());
            let mut display_list = DisplayListModel::new(ModelCore::new(capabilities.clone()));
            display_list
                .set_model(grid.clone(), HeightMapper::linear())
                .unwrap();
            display_list.load_model(&mut gl, &texture).unwrap();
            let list = display_list.surface_list().unwrap();
            let surface = distinct(
                gl.list_contents(list)
                    .unwrap()
                    .iter()
                    .flat_map(|primitive| primitive.vertices.iter().copied()),
            );
            display_list.release_model(&mut gl);

            let mut vbo = VboModel::new(ModelCore::new(capabilities.clone()));
            vbo.core_mut().buffer_budget = 12 * cols * 3;
            vbo.set_model(grid.clone(), HeightMapper::linear()).unwrap();
            vbo.load_model(&mut gl, &texture).unwrap();
            let buffers = vbo
                .position_buffers()
                .map(|buffer| floats(gl.buffer_contents(buffer).unwrap()))
                .collect_vec();
            let buffered = distinct(
                buffers
                    .iter()
                    .flat_map(|floats| floats.chunks_exact(3).map(Vec3::from_slice)),
            );
            vbo.release_model(&mut gl);

            assert_eq!(surface.0, rows * cols, "{rows}x{cols}");
            assert_eq!(surface, buffered, "{rows}x{cols}");
            assert_eq!(gl.live_handles(), 0);
        }
    }
}
