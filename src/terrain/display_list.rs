use super::{grid_normal, grid_vertex, ModelCore, ModelKind, TerrainModel};
use crate::{
    capabilities::GlCapabilities,
    error::ReliefResult,
    gl::{Gl, ListId, Primitive},
    grid::HeightGrid,
    texture::{HeightMapper, Texture},
};
use bevy::prelude::*;

/// Renders the terrain from two compiled display lists, one for the surface and one
/// for the curtain closing the sides of the terrain block.
///
/// This only needs the fixed function pipeline of OpenGL 1.1 and terminates the fallback chain.
pub struct DisplayListModel {
    core: ModelCore,
    surface: Option<ListId>,
    curtain: Option<ListId>,
    has_void_value_on_border: bool,
}

impl DisplayListModel {
    pub fn new(core: ModelCore) -> Self {
        Self {
            core,
            surface: None,
            curtain: None,
            has_void_value_on_border: false,
        }
    }

    pub fn supported(_capabilities: &GlCapabilities) -> bool {
        true
    }

    /// Whether the last tessellation skipped a void cell at the border of the grid.
    pub fn has_void_value_on_border(&self) -> bool {
        self.has_void_value_on_border
    }

    pub fn has_curtain(&self) -> bool {
        self.curtain.is_some()
    }

    pub fn surface_list(&self) -> Option<ListId> {
        self.surface
    }

    /// One strip per pair of rows. Vertices next to a void cell are left out,
    /// which splits the strip.
    fn compile_surface(
        &mut self,
        gl: &mut dyn Gl,
        grid: &HeightGrid,
        mapper: &HeightMapper,
        texture: &Texture,
    ) -> ListId {
        let (rows, cols) = (grid.rows(), grid.cols());
        let on_border = |(row, col): (usize, usize)| {
            row == 0 || col == 0 || row == rows - 1 || col == cols - 1
        };
        let coordinates = TextureCoordinates::of(texture);

        self.has_void_value_on_border = false;

        let list = gl.create_list();
        gl.begin_list(list);

        for row_center in 1..rows {
            let row_top = row_center - 1;
            let row_bottom = (row_center + 1).min(rows - 1);
            let mut open = false;

            for col in 0..cols {
                let col_right = (col + 1).min(cols - 1);
                let neighbourhood = [
                    (row_top, col),
                    (row_center, col),
                    (row_bottom, col),
                    (row_top, col_right),
                    (row_center, col_right),
                ];
                let mut void = neighbourhood
                    .into_iter()
                    .filter(|&(row, col)| grid.get(row, col).is_nan())
                    .peekable();

                if void.peek().is_some() {
                    if void.any(on_border) {
                        self.has_void_value_on_border = true;
                    }
                    if open {
                        gl.end();
                        open = false;
                    }
                    continue;
                }

                if !open {
                    gl.begin(Primitive::TriangleStrip);
                    open = true;
                }
                coordinates.emit_vertex(gl, grid, mapper, row_top, col);
                coordinates.emit_vertex(gl, grid, mapper, row_center, col);
            }

            if open {
                gl.end();
            }
        }

        gl.end_list();
        list
    }

    /// Vertical walls from the bottom of the unit box up to the border of the surface,
    /// going around the grid counter-clockwise.
    fn compile_curtain(gl: &mut dyn Gl, grid: &HeightGrid) -> ListId {
        let (rows, cols) = (grid.rows(), grid.cols());
        let sides: [(Vec3, Vec<(usize, usize)>); 4] = [
            (Vec3::NEG_X, (0..rows).map(|row| (row, 0)).collect()),
            (Vec3::Y, (0..cols).map(|col| (rows - 1, col)).collect()),
            (
                Vec3::X,
                (0..rows).rev().map(|row| (row, cols - 1)).collect(),
            ),
            (Vec3::NEG_Y, (0..cols).rev().map(|col| (0, col)).collect()),
        ];

        let list = gl.create_list();
        gl.begin_list(list);

        for (normal, cells) in sides {
            gl.begin(Primitive::TriangleStrip);
            gl.normal(normal);
            for (row, col) in cells {
                let top = grid_vertex(grid, row, col);
                gl.vertex(top.with_z(0.0));
                gl.vertex(top);
            }
            gl.end();
        }

        gl.end_list();
        list
    }
}

#[derive(Clone, Copy)]
enum TextureCoordinates {
    None,
    Ramp,
    Drape,
}

impl TextureCoordinates {
    fn of(texture: &Texture) -> Self {
        if texture.is_1d() {
            Self::Ramp
        } else if texture.is_2d() {
            Self::Drape
        } else {
            Self::None
        }
    }

    fn emit_vertex(
        self,
        gl: &mut dyn Gl,
        grid: &HeightGrid,
        mapper: &HeightMapper,
        row: usize,
        col: usize,
    ) {
        gl.normal(grid_normal(grid, row, col));
        match self {
            Self::None => {}
            Self::Ramp => gl.tex_coord_1d(mapper.texture_coordinate(grid, row, col)),
            Self::Drape => gl.tex_coord_2d(Vec2::new(
                col as f32 / (grid.cols() - 1) as f32,
                row as f32 / (grid.rows() - 1) as f32,
            )),
        }
        gl.vertex(grid_vertex(grid, row, col));
    }
}

impl TerrainModel for DisplayListModel {
    fn kind(&self) -> ModelKind {
        ModelKind::DisplayList
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn load_model(&mut self, gl: &mut dyn Gl, texture: &Texture) -> ReliefResult<()> {
        if self.core.initialized {
            return Ok(());
        }
        self.release_model(gl);

        let Some(grid) = self.core.grid().cloned() else {
            return Ok(());
        };
        let mapper = self.core.mapper().clone();

        let surface = self.compile_surface(gl, &grid, &mapper, texture);
        self.surface = Some(surface);

        if !self.has_void_value_on_border {
            self.curtain = Some(Self::compile_curtain(gl, &grid));
        }

        debug!(
            "Compiled display lists for a {}x{} grid, curtain: {}.",
            grid.rows(),
            grid.cols(),
            self.has_curtain()
        );
        self.core.initialized = true;
        Ok(())
    }

    fn draw(
        &mut self,
        gl: &mut dyn Gl,
        texture: &Texture,
        _shading: bool,
        _fog: bool,
    ) -> ReliefResult<()> {
        let Some(surface) = self.surface.filter(|_| self.core.initialized) else {
            return Ok(());
        };

        texture.enable(gl);
        gl.call_list(surface);
        texture.disable(gl);

        if let Some(curtain) = self.curtain {
            gl.call_list(curtain);
        }
        Ok(())
    }

    fn release_model(&mut self, gl: &mut dyn Gl) {
        for list in [self.surface.take(), self.curtain.take()].into_iter().flatten() {
            gl.delete_list(list);
        }
        self.core.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{
        headless::{HeadlessGl, HeadlessInfo},
        Capability, TexGenCoord,
    };
    use image::RgbaImage;
    use ndarray::Array2;

    fn model() -> (HeadlessGl, DisplayListModel) {
        let gl = HeadlessGl::new(HeadlessInfo::opengl_1_1());
        let capabilities = GlCapabilities::query(&gl);
        (gl, DisplayListModel::new(ModelCore::new(capabilities)))
    }

    #[test]
    fn flat_grid_is_one_strip_per_row_with_upright_normals() {
        let (mut gl, mut model) = model();
        let grid = HeightGrid::flat(100, 100, 5.0, 1.0).unwrap();
        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();

        let strips = gl.list_contents(model.surface_list().unwrap()).unwrap();
        assert_eq!(strips.len(), 99);
        assert!(strips.iter().all(|strip| strip.vertices.len() == 200));
        assert!(strips
            .iter()
            .flat_map(|strip| &strip.normals)
            .all(|normal| *normal == Vec3::Z));
        assert!(model.has_curtain());
        assert!(!model.has_void_value_on_border());
    }

    #[test]
    fn void_corner_suppresses_the_curtain() {
        let (mut gl, mut model) = model();
        let mut values = Array2::from_elem((6, 6), 3.0);
        values[(0, 0)] = f32::NAN;
        let grid = HeightGrid::new(values, 1.0).unwrap();

        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();

        assert!(model.has_void_value_on_border());
        assert!(!model.has_curtain());
        assert_eq!(gl.live_lists(), 1);

        let strips = gl.list_contents(model.surface_list().unwrap()).unwrap();
        let first_row = strips.first().unwrap();
        assert_eq!(first_row.vertices.len(), 2 * 5);
    }

    #[test]
    fn interior_void_keeps_the_curtain() {
        let (mut gl, mut model) = model();
        let mut values = Array2::from_elem((8, 8), 3.0);
        values[(4, 4)] = f32::NAN;
        let grid = HeightGrid::new(values, 1.0).unwrap();

        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();

        assert!(!model.has_void_value_on_border());
        assert!(model.has_curtain());
    }

    #[test]
    fn release_frees_all_lists() {
        let (mut gl, mut model) = model();
        let grid = HeightGrid::flat(4, 5, 1.0, 1.0).unwrap();
        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();
        assert_eq!(gl.live_lists(), 2);

        model.draw(&mut gl, &Texture::new(), true, false).unwrap();
        assert_eq!(gl.draw_calls().len(), 2);

        model.release_model(&mut gl);
        model.release_model(&mut gl);
        assert_eq!(gl.live_handles(), 0);
        assert!(!model.core().is_initialized());
    }

    #[test]
    fn texture_change_forces_recompilation() {
        let (mut gl, mut model) = model();
        let grid = HeightGrid::flat(4, 5, 1.0, 1.0).unwrap();
        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &Texture::new()).unwrap();
        let first = model.surface_list();

        model.texture_changed();
        model.load_model(&mut gl, &Texture::new()).unwrap();

        assert_eq!(gl.live_lists(), 2);
        assert!(model.surface_list().is_some());
        assert!(first.is_some());
    }

    #[test]
    fn ramp_coordinates_are_emitted_per_vertex() {
        let (mut gl, mut model) = model();
        let mut texture = Texture::new();
        texture.set_image(RgbaImage::new(32, 1));
        texture.construct(&mut gl);

        let grid = HeightGrid::new(
            Array2::from_shape_fn((3, 3), |(row, col)| (row + col) as f32),
            1.0,
        )
        .unwrap();
        model.set_model(grid, HeightMapper::linear()).unwrap();
        model.load_model(&mut gl, &texture).unwrap();
        model.draw(&mut gl, &texture, true, false).unwrap();

        let strips = gl.list_contents(model.surface_list().unwrap()).unwrap();
        for strip in strips {
            assert_eq!(strip.coordinates.len(), strip.vertices.len());
            for (vertex, coordinate) in strip.vertices.iter().zip(&strip.coordinates) {
                assert!((coordinate.x - (vertex.x + vertex.y) / 2.0).abs() < 1e-6);
                assert_eq!(coordinate.y, 0.0);
            }
        }

        assert_eq!(gl.tex_gen_plane(TexGenCoord::S), None);
        assert!(!gl.is_enabled(Capability::TextureGenS));
    }
}
