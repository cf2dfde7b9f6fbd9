use super::{
    patches::{strip_indices, PatchLayout},
    ModelCore, ModelKind, TerrainModel,
};
use crate::{
    capabilities::GlCapabilities,
    error::{ReliefError, ReliefResult},
    gl::{BufferId, BufferTarget, ComponentType, Gl, Primitive, TextureTarget},
    grid::HeightGrid,
    program::ShaderProgram,
    shaders::{
        ELEVATION_TEXTURE_UNIT, GRID_POSITION_ATTRIBUTE, HYPSO_LOOKUP_TEXTURE_UNIT,
        HYPSO_TEXTURE_UNIT, IMAGE_TEXTURE_UNIT, TERRAIN_FRAGMENT_SHADER, TERRAIN_VERTEX_SHADER,
    },
    texture::{GridTexture, HeightMapper, Texture},
};
use bevy::prelude::*;

const BYTES_PER_VERTEX: usize = 2 * 2;

/// Values of the `textureType` uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ShaderTexture {
    None = 0,
    Ramp = 1,
    Drape = 2,
    LookupRamp = -1,
}

/// Stores the elevations in a float texture and displaces a flat grid of vertices in
/// the vertex shader.
///
/// One vertex buffer with the packed column and row of each vertex of a patch is shared
/// by all patches, the shader offsets the rows per patch.
/// The plan oblique shear is applied in the shader, so changing it never re-tessellates.
pub struct ShaderModel {
    core: ModelCore,
    layout: Option<PatchLayout>,
    program: Option<ShaderProgram>,
    elevations: Option<GridTexture>,
    lookup: Option<GridTexture>,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    shear: Vec2,
    shear_baseline: f32,
}

impl ShaderModel {
    pub fn new(core: ModelCore) -> Self {
        Self {
            core,
            layout: None,
            program: None,
            elevations: None,
            lookup: None,
            vertex_buffer: None,
            index_buffer: None,
            shear: Vec2::ZERO,
            shear_baseline: 0.0,
        }
    }

    /// Needs GLSL, float textures and texture fetches in the vertex shader.
    /// Four fragment texture units hold the elevations, the drape, the ramp and the ramp lookup.
    pub fn supported(capabilities: &GlCapabilities) -> bool {
        capabilities.has_version_at_least(2, 0)
            && capabilities.has_float_textures()
            && capabilities.max_vertex_texture_units() >= 1
            && capabilities.max_texture_units() >= 4
    }

    pub fn layout(&self) -> Option<&PatchLayout> {
        self.layout.as_ref()
    }

    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub fn has_lookup_texture(&self) -> bool {
        self.lookup.is_some()
    }

    /// The elevation at which the shear displaces nothing, in the unit box.
    pub fn set_shear_baseline(&mut self, baseline: f32) {
        self.shear_baseline = baseline;
    }

    pub fn texture_type(&self, texture: &Texture) -> ShaderTexture {
        match (self.lookup.is_some(), texture.is_1d(), texture.is_2d()) {
            (true, true, _) => ShaderTexture::LookupRamp,
            (false, true, _) => ShaderTexture::Ramp,
            (_, _, true) => ShaderTexture::Drape,
            _ => ShaderTexture::None,
        }
    }

    fn layout_for(&self, grid: &HeightGrid) -> ReliefResult<PatchLayout> {
        grid.check_displayable()?;

        let max = self.core.capabilities().max_texture_size();
        if grid.cols() > max as usize || grid.rows() > max as usize {
            return Err(ReliefError::GridExceedsTextureLimit {
                rows: grid.rows(),
                cols: grid.cols(),
                max,
            });
        }

        let layout = PatchLayout::new(
            grid.rows(),
            grid.cols(),
            self.core.buffer_budget,
            BYTES_PER_VERTEX,
            Some(max as usize),
        )?;

        // vertex positions are packed into unsigned shorts
        let limit = u16::MAX as usize;
        if layout.cols() > limit || layout.patch_height() > limit {
            return Err(ReliefError::GridExceedsTextureLimit {
                rows: grid.rows(),
                cols: grid.cols(),
                max: limit as u32,
            });
        }
        Ok(layout)
    }

    /// Column and row of every vertex of a full patch.
    fn grid_positions(cols: usize, patch_height: usize) -> Vec<[u16; 2]> {
        (0..patch_height)
            .flat_map(|row| (0..cols).map(move |col| [col as u16, row as u16]))
            .collect()
    }

    fn upload(gl: &mut dyn Gl, target: BufferTarget, data: &[u8]) -> BufferId {
        let buffer = gl.create_buffer();
        gl.bind_buffer(target, Some(buffer));
        gl.buffer_data(target, data);
        gl.bind_buffer(target, None);
        buffer
    }

    fn set_constant_uniforms(
        program: &ShaderProgram,
        gl: &mut dyn Gl,
        grid: &HeightGrid,
    ) -> ReliefResult<()> {
        let range = (grid.max_value() - grid.min_value()) / grid.cell_size();
        let scale_z = if range > 0.0 { range.recip() } else { 0.0 };

        program.set_uniform(
            gl,
            "textureScale",
            Vec2::new(grid.cols() as f32, grid.rows() as f32).recip(),
        )?;
        program.set_uniform(gl, "scaleGridToUnity", grid.unit_scale())?;
        program.set_uniform(gl, "scaleZToUnity", scale_z)?;
        program.set_uniform(gl, "minZ", grid.min_value() / grid.cell_size())?;
        program.set_uniform(gl, "zTexture", ELEVATION_TEXTURE_UNIT as i32)?;
        program.set_uniform(gl, "imageTexture", IMAGE_TEXTURE_UNIT as i32)?;
        program.set_uniform(gl, "hypsoTexture", HYPSO_TEXTURE_UNIT as i32)?;
        program.set_uniform(gl, "hypsoLookUpTexture", HYPSO_LOOKUP_TEXTURE_UNIT as i32)?;
        Ok(())
    }

    fn draw_patches(
        &self,
        gl: &mut dyn Gl,
        program: &ShaderProgram,
        texture: &Texture,
        shading: bool,
        fog: bool,
    ) -> ReliefResult<()> {
        let (Some(layout), Some(elevations), Some(vertex_buffer), Some(index_buffer)) = (
            self.layout,
            self.elevations.as_ref(),
            self.vertex_buffer,
            self.index_buffer,
        ) else {
            return Ok(());
        };

        elevations.bind(gl, ELEVATION_TEXTURE_UNIT);
        let texture_type = self.texture_type(texture);
        match texture_type {
            ShaderTexture::Drape => {
                texture.bind_to_unit(gl, IMAGE_TEXTURE_UNIT);
            }
            ShaderTexture::Ramp => {
                texture.bind_to_unit(gl, HYPSO_TEXTURE_UNIT);
            }
            ShaderTexture::LookupRamp => {
                texture.bind_to_unit(gl, HYPSO_TEXTURE_UNIT);
                if let Some(lookup) = &self.lookup {
                    lookup.bind(gl, HYPSO_LOOKUP_TEXTURE_UNIT);
                }
            }
            ShaderTexture::None => {}
        }

        program.set_uniform(gl, "textureType", texture_type as i32)?;
        program.set_uniform(gl, "applyShading", shading)?;
        program.set_uniform(gl, "applyFog", fog)?;
        program.set_uniform(gl, "shearXY", self.shear)?;
        program.set_uniform(gl, "shearBaseline", self.shear_baseline)?;

        let (attribute, _) = GRID_POSITION_ATTRIBUTE;
        gl.enable_vertex_attrib(attribute);
        gl.bind_buffer(BufferTarget::Array, Some(vertex_buffer));
        gl.vertex_attrib_pointer(attribute, 2, ComponentType::UnsignedShort);
        gl.bind_buffer(BufferTarget::ElementArray, Some(index_buffer));

        for patch in layout.patches() {
            program.set_uniform(gl, "rowOffset", patch.first_row as f32)?;
            gl.draw_elements(
                Primitive::TriangleStrip,
                layout.index_count_of(&patch),
                ComponentType::UnsignedInt,
            );
        }

        Ok(())
    }

    fn unbind(gl: &mut dyn Gl) {
        gl.bind_buffer(BufferTarget::Array, None);
        gl.bind_buffer(BufferTarget::ElementArray, None);
        gl.disable_vertex_attrib(GRID_POSITION_ATTRIBUTE.0);

        for unit in [
            HYPSO_LOOKUP_TEXTURE_UNIT,
            HYPSO_TEXTURE_UNIT,
            IMAGE_TEXTURE_UNIT,
            ELEVATION_TEXTURE_UNIT,
        ] {
            gl.active_texture(unit);
            gl.bind_texture(TextureTarget::Texture1d, None);
            gl.bind_texture(TextureTarget::Texture2d, None);
        }
        gl.use_program(None);
    }
}

impl TerrainModel for ShaderModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Shader
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    /// The elevations have to fit into a single texture.
    fn can_display(&self, grid: &HeightGrid) -> ReliefResult<()> {
        self.layout_for(grid).map(|_| ())
    }

    fn set_model(&mut self, grid: HeightGrid, mapper: HeightMapper) -> ReliefResult<()> {
        let layout = self.layout_for(&grid)?;
        self.core.set_model(grid, mapper)?;
        self.layout = Some(layout);
        Ok(())
    }

    fn load_model(&mut self, gl: &mut dyn Gl, texture: &Texture) -> ReliefResult<()> {
        if self.core.initialized {
            return Ok(());
        }
        self.release_model(gl);

        let (Some(grid), Some(layout)) = (self.core.grid().cloned(), self.layout) else {
            return Ok(());
        };

        let program = ShaderProgram::new(
            gl,
            TERRAIN_VERTEX_SHADER,
            TERRAIN_FRAGMENT_SHADER,
            &[GRID_POSITION_ATTRIBUTE],
        )?;

        program.bind(gl);
        let uniforms = Self::set_constant_uniforms(&program, gl, &grid);
        program.unbind(gl);
        if let Err(error) = uniforms {
            program.release(gl);
            return Err(error);
        }
        self.program = Some(program);

        self.elevations = Some(GridTexture::elevations(gl, &grid));
        if self.core.needs_texture_coordinates(texture) {
            self.lookup = Some(GridTexture::lookup(gl, &grid, self.core.mapper()));
        }

        let positions = Self::grid_positions(layout.cols(), layout.patch_height());
        self.vertex_buffer = Some(Self::upload(
            gl,
            BufferTarget::Array,
            bytemuck::cast_slice(&positions),
        ));
        let indices = strip_indices(layout.cols(), layout.patch_height());
        self.index_buffer = Some(Self::upload(
            gl,
            BufferTarget::ElementArray,
            bytemuck::cast_slice(&indices),
        ));

        debug!(
            "Uploaded a {}x{} elevation texture drawn in {} patches.",
            grid.cols(),
            grid.rows(),
            layout.patch_count()
        );
        self.core.initialized = true;
        Ok(())
    }

    fn draw(
        &mut self,
        gl: &mut dyn Gl,
        texture: &Texture,
        shading: bool,
        fog: bool,
    ) -> ReliefResult<()> {
        let Some(program) = self.program.as_ref().filter(|_| self.core.initialized) else {
            return Ok(());
        };

        program.bind(gl);
        let result = self.draw_patches(gl, program, texture, shading, fog);
        Self::unbind(gl);
        result
    }

    fn release_model(&mut self, gl: &mut dyn Gl) {
        if let Some(program) = self.program.take() {
            program.release(gl);
        }
        for texture in [self.elevations.take(), self.lookup.take()]
            .into_iter()
            .flatten()
        {
            texture.release(gl);
        }
        for buffer in [self.vertex_buffer.take(), self.index_buffer.take()]
            .into_iter()
            .flatten()
        {
            gl.delete_buffer(buffer);
        }
        self.core.initialized = false;
    }

    fn shears_in_shader(&self) -> bool {
        true
    }

    fn set_shearing(&mut self, shear: Vec2) {
        self.shear = shear;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{
        headless::{DrawCall, HeadlessGl, HeadlessInfo},
        UniformValue,
    };
    use image::RgbaImage;
    use ndarray::Array2;

    fn model(info: HeadlessInfo) -> (HeadlessGl, ShaderModel) {
        let gl = HeadlessGl::new(info);
        let core = ModelCore::new(GlCapabilities::query(&gl));
        (gl, ShaderModel::new(core))
    }

    fn sloped(rows: usize, cols: usize) -> HeightGrid {
        HeightGrid::new(
            Array2::from_shape_fn((rows, cols), |(row, col)| (row + col) as f32 * 10.0),
            10.0,
        )
        .unwrap()
    }

    #[test]
    fn requires_float_textures_and_vertex_texture_fetch() {
        let modern = HeadlessGl::new(HeadlessInfo::opengl_2_1());
        let no_float = HeadlessGl::new(
            HeadlessInfo::opengl_2_1().without_extension("GL_ARB_texture_float"),
        );
        let old = HeadlessGl::new(HeadlessInfo::opengl_1_5());

        assert!(ShaderModel::supported(&GlCapabilities::query(&modern)));
        assert!(!ShaderModel::supported(&GlCapabilities::query(&no_float)));
        assert!(!ShaderModel::supported(&GlCapabilities::query(&old)));
    }

    #[test]
    fn grids_wider_than_a_texture_cannot_be_displayed() {
        let (_, model) = model(HeadlessInfo::opengl_2_1().with_max_texture_size(64));

        assert_eq!(
            model.can_display(&HeightGrid::flat(10, 65, 0.0, 1.0).unwrap()),
            Err(ReliefError::GridExceedsTextureLimit {
                rows: 10,
                cols: 65,
                max: 64
            })
        );
        assert!(model
            .can_display(&HeightGrid::flat(64, 64, 0.0, 1.0).unwrap())
            .is_ok());
    }

    #[test]
    fn grid_positions_must_fit_unsigned_shorts() {
        let (_, mut model) = model(HeadlessInfo::opengl_2_1().with_max_texture_size(100_000));
        model.core_mut().buffer_budget = BYTES_PER_VERTEX * 65_537 * 4;

        assert_eq!(
            model.can_display(&HeightGrid::flat(2, 65_537, 0.0, 1.0).unwrap()),
            Err(ReliefError::GridExceedsTextureLimit {
                rows: 2,
                cols: 65_537,
                max: u16::MAX as u32
            })
        );
        assert!(model
            .can_display(&HeightGrid::flat(2, 65_535, 0.0, 1.0).unwrap())
            .is_ok());
    }

    #[test]
    fn patch_height_is_limited_by_the_texture_size() {
        let (_, mut model) = model(HeadlessInfo::opengl_2_1().with_max_texture_size(32));
        model.set_model(sloped(30, 30), HeightMapper::linear()).unwrap();

        assert_eq!(model.layout().unwrap().patch_height(), 30);

        let (_, mut model) = self::model(HeadlessInfo::opengl_2_1().with_max_texture_size(32));
        model.core_mut().buffer_budget = BYTES_PER_VERTEX * 30 * 8;
        model.set_model(sloped(30, 30), HeightMapper::linear()).unwrap();

        assert_eq!(model.layout().unwrap().patch_height(), 8);
    }

    #[test]
    fn draws_patches_with_row_offsets() {
        let (mut gl, mut model) = model(HeadlessInfo::opengl_2_1());
        model.core_mut().buffer_budget = BYTES_PER_VERTEX * 6 * 4;
        model.set_model(sloped(10, 6), HeightMapper::linear()).unwrap();
        model.set_shearing(Vec2::new(0.5, -0.25));

        let texture = Texture::new();
        let modelview = Mat4::from_translation(Vec3::new(-0.5, -0.5, -2.4));
        gl.load_modelview(modelview);
        model.load_model(&mut gl, &texture).unwrap();
        model.draw(&mut gl, &texture, true, false).unwrap();
        assert_eq!(gl.get_error(), None);

        let counts: Vec<usize> = gl
            .draw_calls()
            .iter()
            .filter_map(|call| match call {
                DrawCall::Elements { count, program, .. } => {
                    assert!(program.is_some());
                    Some(*count)
                }
                DrawCall::List { .. } => None,
            })
            .collect();
        assert_eq!(counts, vec![6 * 2 * 3 + 2; 3]);

        let program = model.program().unwrap().id();
        assert_eq!(
            gl.uniform_value(program, "rowOffset"),
            Some(UniformValue::Float(6.0))
        );
        assert_eq!(
            gl.uniform_value(program, "shearXY"),
            Some(UniformValue::Vec2(Vec2::new(0.5, -0.25)))
        );
        assert_eq!(
            gl.uniform_value(program, "textureType"),
            Some(UniformValue::Int(0))
        );
        assert_eq!(
            gl.uniform_value(program, "modelViewMatrix"),
            Some(UniformValue::Mat4(modelview))
        );
        assert_eq!(
            gl.uniform_value(program, "lightAmbient"),
            Some(UniformValue::Float(1.0))
        );
        assert_eq!(gl.current_program(), None);
    }

    #[test]
    fn non_linear_ramps_sample_the_lookup_texture() {
        let (mut gl, mut model) = model(HeadlessInfo::opengl_2_1());
        let grid = sloped(5, 5);
        let mut texture = Texture::new();
        texture.set_image(RgbaImage::new(32, 1));
        texture.construct(&mut gl);

        model
            .set_model(grid.clone(), HeightMapper::equalized(&grid))
            .unwrap();
        model.load_model(&mut gl, &texture).unwrap();
        assert!(model.has_lookup_texture());
        assert_eq!(model.texture_type(&texture), ShaderTexture::LookupRamp);

        model.draw(&mut gl, &texture, false, true).unwrap();
        let program = model.program().unwrap().id();
        assert_eq!(
            gl.uniform_value(program, "textureType"),
            Some(UniformValue::Int(-1))
        );
        assert_eq!(gl.get_error(), None);
    }

    #[test]
    fn link_failures_are_reported_without_leaks() {
        let (mut gl, mut model) = model(HeadlessInfo::opengl_2_1());
        gl.fail_link("vertex texture fetch unsupported");
        model.set_model(sloped(4, 4), HeightMapper::linear()).unwrap();

        let result = model.load_model(&mut gl, &Texture::new());

        assert!(matches!(result, Err(ReliefError::ShaderLink(_))));
        assert!(!model.core().is_initialized());
        assert_eq!(gl.live_handles(), 0);
    }

    #[test]
    fn load_release_round_trip_frees_everything() {
        let (mut gl, mut model) = model(HeadlessInfo::opengl_2_1());
        let grid = sloped(8, 8);
        let mut texture = Texture::new();
        texture.set_image(RgbaImage::new(16, 1));
        texture.construct(&mut gl);
        let texture_handles = gl.live_handles();

        model
            .set_model(grid.clone(), HeightMapper::equalized(&grid))
            .unwrap();
        model.load_model(&mut gl, &texture).unwrap();
        assert_eq!(gl.live_handles(), texture_handles + 5);

        model.release_model(&mut gl);
        model.release_model(&mut gl);
        assert_eq!(gl.live_handles(), texture_handles);
    }
}
