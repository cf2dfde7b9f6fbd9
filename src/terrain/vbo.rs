use super::{
    grid_normal, grid_vertex,
    patches::{strip_indices, Patch, PatchLayout},
    ModelCore, ModelKind, TerrainModel,
};
use crate::{
    capabilities::GlCapabilities,
    error::ReliefResult,
    gl::{BufferId, BufferTarget, Capability, ClientState, ComponentType, Gl, Primitive, TexGenCoord},
    grid::HeightGrid,
    texture::{HeightMapper, Texture},
};
use bevy::prelude::*;

const BYTES_PER_VERTEX: usize = 3 * 4;

/// The vertex attributes of one patch, in row major order.
#[derive(Clone, Debug, Default)]
pub struct PatchGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texture_coordinates: Option<Vec<f32>>,
}

impl PatchGeometry {
    pub fn build(grid: &HeightGrid, mapper: Option<&HeightMapper>, patch: &Patch) -> Self {
        let count = patch.row_count * grid.cols();
        let mut geometry = Self {
            positions: Vec::with_capacity(count),
            normals: Vec::with_capacity(count),
            texture_coordinates: mapper.map(|_| Vec::with_capacity(count)),
        };

        for row in patch.rows() {
            for col in 0..grid.cols() {
                geometry
                    .positions
                    .push(grid_vertex(grid, row, col).to_array());
                geometry.normals.push(grid_normal(grid, row, col).to_array());

                if let (Some(coordinates), Some(mapper)) =
                    (geometry.texture_coordinates.as_mut(), mapper)
                {
                    coordinates.push(mapper.texture_coordinate(grid, row, col));
                }
            }
        }

        geometry
    }
}

struct PatchBuffers {
    patch: Patch,
    positions: BufferId,
    normals: BufferId,
    texture_coordinates: Option<BufferId>,
}

/// Uploads the terrain into vertex buffer objects, one set of buffers per patch.
///
/// Positions and normals are stored per vertex.
/// Texture coordinates are generated from the object space position, unless a non-linear
/// height mapper requires them to be stored as well.
pub struct VboModel {
    core: ModelCore,
    layout: Option<PatchLayout>,
    index_buffer: Option<BufferId>,
    patches: Vec<PatchBuffers>,
}

impl VboModel {
    pub fn new(core: ModelCore) -> Self {
        Self {
            core,
            layout: None,
            index_buffer: None,
            patches: Vec::new(),
        }
    }

    /// Drivers of OpenGL 3.1 and later may drop the fixed function arrays.
    pub fn supported(capabilities: &GlCapabilities) -> bool {
        capabilities.has_vertex_buffer_objects() && !capabilities.has_version_at_least(3, 1)
    }

    pub fn layout(&self) -> Option<&PatchLayout> {
        self.layout.as_ref()
    }

    pub fn position_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.patches.iter().map(|buffers| buffers.positions)
    }

    pub fn stores_texture_coordinates(&self) -> bool {
        self.patches
            .first()
            .is_some_and(|buffers| buffers.texture_coordinates.is_some())
    }

    fn upload(gl: &mut dyn Gl, target: BufferTarget, data: &[u8]) -> BufferId {
        let buffer = gl.create_buffer();
        gl.bind_buffer(target, Some(buffer));
        gl.buffer_data(target, data);
        gl.bind_buffer(target, None);
        buffer
    }

    fn layout_for(&self, grid: &HeightGrid) -> ReliefResult<PatchLayout> {
        grid.check_displayable()?;
        PatchLayout::new(
            grid.rows(),
            grid.cols(),
            self.core.buffer_budget,
            BYTES_PER_VERTEX,
            None,
        )
    }

    fn enable_texture_generation(&self, gl: &mut dyn Gl, grid: &HeightGrid, texture: &Texture) {
        let scale = grid.unit_scale();

        if texture.is_1d() {
            let range = (grid.max_value() - grid.min_value()) / grid.cell_size() * scale;
            let z_scale = if range > 0.0 { range.recip() } else { 0.0 };

            gl.tex_gen_object_plane(TexGenCoord::S, Vec4::new(0.0, 0.0, z_scale, 0.0));
            gl.enable(Capability::TextureGenS);
        } else if texture.is_2d() {
            let width = (grid.cols() - 1) as f32 * scale;
            let height = (grid.rows() - 1) as f32 * scale;

            gl.tex_gen_object_plane(TexGenCoord::S, Vec4::new(width.recip(), 0.0, 0.0, 0.0));
            gl.tex_gen_object_plane(TexGenCoord::T, Vec4::new(0.0, height.recip(), 0.0, 0.0));
            gl.enable(Capability::TextureGenS);
            gl.enable(Capability::TextureGenT);
        }
    }
}

impl TerrainModel for VboModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Vbo
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    /// At least two rows of the grid have to fit into the patch budget.
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
        let mapper = self
            .core
            .needs_texture_coordinates(texture)
            .then(|| self.core.mapper().clone());

        let indices = strip_indices(layout.cols(), layout.patch_height());
        self.index_buffer = Some(Self::upload(
            gl,
            BufferTarget::ElementArray,
            bytemuck::cast_slice(&indices),
        ));

        for patch in layout.patches() {
            let geometry = PatchGeometry::build(&grid, mapper.as_ref(), &patch);

            let positions = Self::upload(
                gl,
                BufferTarget::Array,
                bytemuck::cast_slice(&geometry.positions),
            );
            let normals = Self::upload(
                gl,
                BufferTarget::Array,
                bytemuck::cast_slice(&geometry.normals),
            );
            let texture_coordinates = geometry.texture_coordinates.map(|coordinates| {
                Self::upload(gl, BufferTarget::Array, bytemuck::cast_slice(&coordinates))
            });

            self.patches.push(PatchBuffers {
                patch,
                positions,
                normals,
                texture_coordinates,
            });
        }

        debug!(
            "Uploaded {} vertex buffer patches for a {}x{} grid.",
            self.patches.len(),
            grid.rows(),
            grid.cols()
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
        let (Some(grid), Some(layout), Some(index_buffer)) =
            (self.core.grid(), self.layout, self.index_buffer)
        else {
            return Ok(());
        };
        if !self.core.initialized {
            return Ok(());
        }

        let stored_coordinates = self.stores_texture_coordinates();

        gl.enable_client_state(ClientState::VertexArray);
        gl.enable_client_state(ClientState::NormalArray);
        texture.enable(gl);
        if stored_coordinates {
            gl.enable_client_state(ClientState::TexCoordArray);
        } else {
            self.enable_texture_generation(gl, grid, texture);
        }

        gl.bind_buffer(BufferTarget::ElementArray, Some(index_buffer));

        for buffers in &self.patches {
            gl.bind_buffer(BufferTarget::Array, Some(buffers.positions));
            gl.client_pointer(ClientState::VertexArray, 3, ComponentType::Float);
            gl.bind_buffer(BufferTarget::Array, Some(buffers.normals));
            gl.client_pointer(ClientState::NormalArray, 3, ComponentType::Float);

            if let Some(coordinates) = buffers.texture_coordinates {
                gl.bind_buffer(BufferTarget::Array, Some(coordinates));
                gl.client_pointer(ClientState::TexCoordArray, 1, ComponentType::Float);
            }

            gl.draw_elements(
                Primitive::TriangleStrip,
                layout.index_count_of(&buffers.patch),
                ComponentType::UnsignedInt,
            );
        }

        gl.bind_buffer(BufferTarget::Array, None);
        gl.bind_buffer(BufferTarget::ElementArray, None);
        gl.disable_client_state(ClientState::VertexArray);
        gl.disable_client_state(ClientState::NormalArray);
        gl.disable_client_state(ClientState::TexCoordArray);
        gl.disable(Capability::TextureGenS);
        gl.disable(Capability::TextureGenT);
        texture.disable(gl);
        Ok(())
    }

    fn release_model(&mut self, gl: &mut dyn Gl) {
        for buffers in self.patches.drain(..) {
            gl.delete_buffer(buffers.positions);
            gl.delete_buffer(buffers.normals);
            if let Some(coordinates) = buffers.texture_coordinates {
                gl.delete_buffer(coordinates);
            }
        }
        if let Some(index_buffer) = self.index_buffer.take() {
            gl.delete_buffer(index_buffer);
        }
        self.core.initialized = false;
    }
}
