//! A recording OpenGL device with a small CPU rasterizer.

use self::raster::{triangles, Framebuffer};
use super::*;
use bevy::utils::{HashMap, HashSet};
use itertools::Itertools;
use slab::Slab;
use std::collections::VecDeque;

mod raster;

/// The strings and limits a [`HeadlessGl`] reports to capability queries.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub shading_language_version: Option<String>,
    pub extensions: Vec<String>,
    pub max_texture_size: i32,
    pub max_draw_buffers: i32,
    pub max_vertex_texture_image_units: i32,
    pub max_texture_image_units: i32,
}

impl HeadlessInfo {
    /// A bare fixed function context.
    pub fn opengl_1_1() -> Self {
        Self {
            vendor: "bevy_relief".into(),
            renderer: "headless".into(),
            version: "1.1.0".into(),
            shading_language_version: None,
            extensions: Vec::new(),
            max_texture_size: 1024,
            max_draw_buffers: 1,
            max_vertex_texture_image_units: 0,
            max_texture_image_units: 2,
        }
    }

    /// A context with buffer objects, float textures and vertex texture fetch.
    pub fn opengl_2_1() -> Self {
        Self {
            version: "2.1.0".into(),
            shading_language_version: Some("1.20".into()),
            extensions: vec![
                "GL_ARB_texture_non_power_of_two".into(),
                "GL_ARB_vertex_buffer_object".into(),
                "GL_ARB_texture_float".into(),
            ],
            max_texture_size: 4096,
            max_draw_buffers: 8,
            max_vertex_texture_image_units: 4,
            max_texture_image_units: 16,
            ..Self::opengl_1_1()
        }
    }

    /// Buffer objects without float textures, so shaders cannot fetch elevations.
    pub fn opengl_1_5() -> Self {
        Self {
            version: "1.5.0".into(),
            extensions: vec!["GL_ARB_vertex_buffer_object".into()],
            max_texture_size: 2048,
            ..Self::opengl_1_1()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_max_texture_size(mut self, size: i32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn without_extension(mut self, name: &str) -> Self {
        self.extensions.retain(|extension| extension != name);
        self
    }
}

impl Default for HeadlessInfo {
    fn default() -> Self {
        Self::opengl_2_1()
    }
}

/// The primitives emitted between one `begin` and `end` pair.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedPrimitive {
    pub primitive: Primitive,
    pub vertices: Vec<Vec3>,
    /// The current normal at the time each vertex was emitted.
    pub normals: Vec<Vec3>,
    /// The current texture coordinate of each vertex, `t` is zero for 1D coordinates.
    pub coordinates: Vec<Vec2>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCall {
    Elements {
        primitive: Primitive,
        count: usize,
        program: Option<ProgramId>,
        viewport: Viewport,
    },
    List {
        list: ListId,
        viewport: Viewport,
    },
}

#[derive(Default)]
struct TextureRecord {
    target: Option<TextureTarget>,
    format: Option<TextureFormat>,
    width: u32,
    height: u32,
}

struct ShaderRecord {
    source: String,
}

#[derive(Default)]
struct ProgramRecord {
    shaders: Vec<ShaderId>,
    uniforms: Vec<String>,
    linked: bool,
}

#[derive(Clone, Copy)]
struct ArrayPointer {
    buffer: BufferId,
    components: u32,
    kind: ComponentType,
}

/// An OpenGL device which validates and records every call.
///
/// Handles are allocated from slabs, so that leaks show up in [`HeadlessGl::live_handles`].
/// Draw calls are checked against the bound buffers.
///
/// Fixed function geometry, from display lists, immediate mode and client arrays, is
/// rasterized into a color and depth buffer that [`Gl::read_pixels`] reads back.
/// Surfaces are drawn in the gray level of their lighting, textures and fog are ignored.
/// Draws through a program are not rasterized, since shaders are never run. They receive
/// the [`PipelineState::uniforms`] their program declares.
pub struct HeadlessGl {
    info: HeadlessInfo,
    errors: VecDeque<GlError>,

    viewport: Viewport,
    clear_color: Vec4,
    enabled: HashSet<Capability>,
    state: PipelineState,
    tex_gen_planes: HashMap<TexGenCoord, Vec4>,

    lists: Slab<Vec<RecordedPrimitive>>,
    compiling: Option<ListId>,
    primitive: Option<RecordedPrimitive>,
    current_normal: Vec3,
    current_coordinate: Vec2,

    buffers: Slab<Vec<u8>>,
    bound_buffers: HashMap<BufferTarget, BufferId>,
    client_states: HashSet<ClientState>,
    client_pointers: HashMap<ClientState, ArrayPointer>,
    attribs: HashSet<u32>,
    attrib_pointers: HashMap<u32, ArrayPointer>,

    textures: Slab<TextureRecord>,
    active_unit: u32,
    bound_textures: HashMap<(u32, TextureTarget), TextureId>,

    shaders: Slab<ShaderRecord>,
    programs: Slab<ProgramRecord>,
    program: Option<ProgramId>,
    uniforms: HashMap<(ProgramId, i32), UniformValue>,

    draws: Vec<DrawCall>,
    submissions: usize,
    immediate_vertices: usize,
    texture_uploads: usize,
    buffer_uploads: usize,

    framebuffer: Framebuffer,

    draw_fault: Option<(usize, GlError)>,
    link_fault: Option<String>,
}

impl HeadlessGl {
    pub fn new(info: HeadlessInfo) -> Self {
        Self {
            info,
            errors: VecDeque::new(),
            viewport: Viewport::new(0, 0, 640, 480),
            clear_color: Vec4::ZERO,
            enabled: HashSet::default(),
            state: PipelineState::default(),
            tex_gen_planes: HashMap::default(),
            lists: Slab::new(),
            compiling: None,
            primitive: None,
            current_normal: Vec3::Z,
            current_coordinate: Vec2::ZERO,
            buffers: Slab::new(),
            bound_buffers: HashMap::default(),
            client_states: HashSet::default(),
            client_pointers: HashMap::default(),
            attribs: HashSet::default(),
            attrib_pointers: HashMap::default(),
            textures: Slab::new(),
            active_unit: 0,
            bound_textures: HashMap::default(),
            shaders: Slab::new(),
            programs: Slab::new(),
            program: None,
            uniforms: HashMap::default(),
            draws: Vec::new(),
            submissions: 0,
            immediate_vertices: 0,
            texture_uploads: 0,
            buffer_uploads: 0,
            framebuffer: Framebuffer::default(),
            draw_fault: None,
            link_fault: None,
        }
    }

    pub fn info(&self) -> &HeadlessInfo {
        &self.info
    }

    /// Flags `error` when the draw submission with the given zero based index is issued.
    /// Submissions are `draw_elements` and `call_list` calls.
    pub fn fail_on_draw(&mut self, submission: usize, error: GlError) {
        self.draw_fault = Some((submission, error));
    }

    /// Makes every following program link fail with the given log.
    pub fn fail_link(&mut self, log: &str) {
        self.link_fault = Some(log.into());
    }

    pub fn clear_faults(&mut self) {
        self.draw_fault = None;
        self.link_fault = None;
    }

    /// The number of buffers, textures, display lists, shaders and programs not yet deleted.
    pub fn live_handles(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.lists.len()
            + self.shaders.len()
            + self.programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_lists(&self) -> usize {
        self.lists.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn list_ids(&self) -> Vec<ListId> {
        self.lists.iter().map(|(key, _)| ListId(key as u32 + 1)).collect()
    }

    pub fn list_contents(&self, list: ListId) -> Option<&[RecordedPrimitive]> {
        self.lists.get(Self::key(list.0)).map(Vec::as_slice)
    }

    pub fn buffer_ids(&self) -> Vec<BufferId> {
        self.buffers.iter().map(|(key, _)| BufferId(key as u32 + 1)).collect()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(Self::key(buffer.0)).map(Vec::as_slice)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures
            .get(Self::key(texture.0))
            .filter(|record| record.target.is_some())
            .map(|record| (record.width, record.height))
    }

    pub fn texture_format(&self, texture: TextureId) -> Option<TextureFormat> {
        self.textures
            .get(Self::key(texture.0))
            .and_then(|record| record.format)
    }

    pub fn bound_texture(&self, unit: u32, target: TextureTarget) -> Option<TextureId> {
        self.bound_textures.get(&(unit, target)).copied()
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn clear_draw_calls(&mut self) {
        self.draws.clear();
    }

    pub fn immediate_vertices(&self) -> usize {
        self.immediate_vertices
    }

    pub fn texture_uploads(&self) -> usize {
        self.texture_uploads
    }

    pub fn buffer_uploads(&self) -> usize {
        self.buffer_uploads
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    pub fn projection(&self) -> Mat4 {
        self.state.projection
    }

    pub fn modelview(&self) -> Mat4 {
        self.state.modelview
    }

    pub fn light(&self) -> Option<LightParams> {
        self.state.light
    }

    pub fn fog(&self) -> Option<FogParams> {
        self.state.fog
    }

    /// The color of a pixel in window coordinates, if it has been covered by a viewport.
    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        self.framebuffer.pixel(x, y)
    }

    pub fn tex_gen_plane(&self, coord: TexGenCoord) -> Option<Vec4> {
        self.tex_gen_planes.get(&coord).copied()
    }

    pub fn current_clear_color(&self) -> Vec4 {
        self.clear_color
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let location = self.uniform_location(program, name)?;
        self.uniforms.get(&(program, location.0)).copied()
    }

    fn key(name: u32) -> usize {
        (name as usize).wrapping_sub(1)
    }

    fn flag(&mut self, error: GlError) {
        self.errors.push_back(error);
    }

    fn submit(&mut self) {
        if let Some((submission, error)) = self.draw_fault {
            if submission == self.submissions {
                self.flag(error);
            }
        }
        self.submissions += 1;
    }

    fn pointer_capacity(&self, pointer: &ArrayPointer) -> Option<usize> {
        let buffer = self.buffers.get(Self::key(pointer.buffer.0))?;
        Some(buffer.len() / (pointer.components as usize * pointer.kind.size()))
    }

    fn indices(&self, count: usize, kind: ComponentType) -> Option<Vec<usize>> {
        let buffer = self.bound_buffers.get(&BufferTarget::ElementArray)?;
        let data = self.buffers.get(Self::key(buffer.0))?;
        let size = kind.size();

        if count * size > data.len() {
            return None;
        }

        let indices = data[..count * size]
            .chunks_exact(size)
            .map(|chunk| match kind {
                ComponentType::UnsignedShort => u16::from_ne_bytes([chunk[0], chunk[1]]) as usize,
                _ => u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize,
            })
            .collect();
        Some(indices)
    }

    /// Reads element `index` of an enabled float client array.
    fn client_vector(&self, state: ClientState, index: usize) -> Option<Vec3> {
        if !self.client_states.contains(&state) {
            return None;
        }
        let pointer = self.client_pointers.get(&state)?;
        if pointer.kind != ComponentType::Float {
            return None;
        }

        let components = pointer.components as usize;
        let data = self.buffers.get(Self::key(pointer.buffer.0))?;
        let start = index * components * 4;
        let bytes = data.get(start..start + components * 4)?;
        let mut vector = [0.0; 3];
        for (component, chunk) in vector.iter_mut().zip(bytes.chunks_exact(4)) {
            *component = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(Vec3::from_array(vector))
    }

    /// Fills the triangles of a primitive, shaded by the current light.
    fn rasterize(&mut self, primitive: Primitive, vertices: &[Vec3], normals: &[Vec3]) {
        let transform = self.state.projection * self.state.modelview;
        let depth_test = self.is_enabled(Capability::DepthTest);
        self.framebuffer.cover(self.viewport);

        for corners in triangles(primitive, vertices.len()) {
            let normal = corners
                .iter()
                .map(|&corner| normals.get(corner).copied().unwrap_or(self.current_normal))
                .sum::<Vec3>();
            let level = (self.state.shade(normal) * 255.0).round() as u8;
            let clip = corners.map(|corner| transform * vertices[corner].extend(1.0));

            self.framebuffer
                .fill_triangle(clip, self.viewport, [level, level, level, 255], depth_test);
        }
    }

    /// Sets the uniforms of the pipeline state that the program declares.
    fn apply_pipeline_state(&mut self, program: ProgramId) {
        for (name, value) in self.state.uniforms() {
            if let Some(location) = self.uniform_location(program, name) {
                self.uniforms.insert((program, location.0), value);
            }
        }
    }

    fn uniform_names(source: &str) -> impl Iterator<Item = String> + '_ {
        source.lines().filter_map(|line| {
            let mut tokens = line.trim().split_whitespace();
            (tokens.next() == Some("uniform"))
                .then(|| tokens.nth(1))
                .flatten()
                .map(|name| {
                    name.trim_end_matches(';')
                        .split('[')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                })
        })
    }
}

impl Default for HeadlessGl {
    fn default() -> Self {
        Self::new(HeadlessInfo::default())
    }
}

impl Gl for HeadlessGl {
    fn get_string(&self, name: StringName) -> Option<String> {
        match name {
            StringName::Vendor => Some(self.info.vendor.clone()),
            StringName::Renderer => Some(self.info.renderer.clone()),
            StringName::Version => Some(self.info.version.clone()),
            StringName::ShadingLanguageVersion => self.info.shading_language_version.clone(),
            StringName::Extensions => Some(self.info.extensions.iter().join(" ")),
        }
    }

    fn get_integer(&self, name: IntegerName) -> i32 {
        match name {
            IntegerName::MaxTextureSize => self.info.max_texture_size,
            IntegerName::MaxDrawBuffers => self.info.max_draw_buffers,
            IntegerName::MaxVertexTextureImageUnits => self.info.max_vertex_texture_image_units,
            IntegerName::MaxTextureImageUnits => self.info.max_texture_image_units,
        }
    }

    fn get_error(&mut self) -> Option<GlError> {
        self.errors.pop_front()
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if viewport.width < 0 || viewport.height < 0 {
            self.flag(GlError::INVALID_VALUE);
            return;
        }
        self.viewport = viewport;
    }

    fn clear_color(&mut self, color: Vec4) {
        self.clear_color = color.clamp(Vec4::ZERO, Vec4::ONE);
    }

    fn clear(&mut self) {
        let color = (self.clear_color * 255.0).round().to_array().map(|c| c as u8);
        self.framebuffer.cover(self.viewport);
        self.framebuffer.clear(color);
    }

    fn enable(&mut self, capability: Capability) {
        self.enabled.insert(capability);
    }

    fn disable(&mut self, capability: Capability) {
        self.enabled.remove(&capability);
    }

    fn flush(&mut self) {}

    fn read_pixels(&mut self, viewport: Viewport) -> Vec<u8> {
        self.framebuffer.read(viewport)
    }

    fn load_projection(&mut self, matrix: Mat4) {
        self.state.projection = matrix;
    }

    fn load_modelview(&mut self, matrix: Mat4) {
        self.state.modelview = matrix;
    }

    fn set_light(&mut self, light: Option<LightParams>) {
        self.state.light = light;
        match light {
            Some(_) => self.enabled.insert(Capability::Lighting),
            None => self.enabled.remove(&Capability::Lighting),
        };
    }

    fn set_fog(&mut self, fog: Option<FogParams>) {
        self.state.fog = fog;
        match fog {
            Some(_) => self.enabled.insert(Capability::Fog),
            None => self.enabled.remove(&Capability::Fog),
        };
    }

    fn tex_gen_object_plane(&mut self, coord: TexGenCoord, plane: Vec4) {
        self.tex_gen_planes.insert(coord, plane);
    }

    fn create_list(&mut self) -> ListId {
        ListId(self.lists.insert(Vec::new()) as u32 + 1)
    }

    fn begin_list(&mut self, list: ListId) {
        if self.compiling.is_some() || !self.lists.contains(Self::key(list.0)) {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }
        if let Some(contents) = self.lists.get_mut(Self::key(list.0)) {
            contents.clear();
        }
        self.compiling = Some(list);
    }

    fn end_list(&mut self) {
        if self.compiling.take().is_none() {
            self.flag(GlError::INVALID_OPERATION);
        }
    }

    fn call_list(&mut self, list: ListId) {
        let Some(contents) = self.lists.get(Self::key(list.0)).cloned() else {
            return;
        };
        let vertices: usize = contents.iter().map(|p| p.vertices.len()).sum();

        self.immediate_vertices += vertices;
        self.draws.push(DrawCall::List {
            list,
            viewport: self.viewport,
        });
        self.submit();

        for recorded in &contents {
            self.rasterize(recorded.primitive, &recorded.vertices, &recorded.normals);
        }
    }

    fn delete_list(&mut self, list: ListId) {
        if self.lists.contains(Self::key(list.0)) {
            self.lists.remove(Self::key(list.0));
        }
    }

    fn begin(&mut self, primitive: Primitive) {
        if self.primitive.is_some() {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }
        self.primitive = Some(RecordedPrimitive {
            primitive,
            vertices: Vec::new(),
            normals: Vec::new(),
            coordinates: Vec::new(),
        });
    }

    fn end(&mut self) {
        let Some(primitive) = self.primitive.take() else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };

        match self.compiling {
            Some(list) => {
                if let Some(contents) = self.lists.get_mut(Self::key(list.0)) {
                    contents.push(primitive);
                }
            }
            None => {
                self.immediate_vertices += primitive.vertices.len();
                self.rasterize(primitive.primitive, &primitive.vertices, &primitive.normals);
            }
        }
    }

    fn normal(&mut self, normal: Vec3) {
        self.current_normal = normal;
    }

    fn tex_coord_1d(&mut self, s: f32) {
        self.current_coordinate = Vec2::new(s, 0.0);
    }

    fn tex_coord_2d(&mut self, st: Vec2) {
        self.current_coordinate = st;
    }

    fn vertex(&mut self, position: Vec3) {
        let (normal, coordinate) = (self.current_normal, self.current_coordinate);
        match self.primitive.as_mut() {
            Some(primitive) => {
                primitive.vertices.push(position);
                primitive.normals.push(normal);
                primitive.coordinates.push(coordinate);
            }
            None => self.flag(GlError::INVALID_OPERATION),
        }
    }

    fn create_buffer(&mut self) -> BufferId {
        BufferId(self.buffers.insert(Vec::new()) as u32 + 1)
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        match buffer {
            Some(buffer) if !self.buffers.contains(Self::key(buffer.0)) => {
                self.flag(GlError::INVALID_VALUE)
            }
            Some(buffer) => {
                self.bound_buffers.insert(target, buffer);
            }
            None => {
                self.bound_buffers.remove(&target);
            }
        }
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]) {
        let Some(buffer) = self.bound_buffers.get(&target).copied() else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        if let Some(contents) = self.buffers.get_mut(Self::key(buffer.0)) {
            *contents = data.to_vec();
            self.buffer_uploads += 1;
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.contains(Self::key(buffer.0)) {
            self.buffers.remove(Self::key(buffer.0));
            self.bound_buffers.retain(|_, bound| *bound != buffer);
        }
    }

    fn enable_client_state(&mut self, state: ClientState) {
        self.client_states.insert(state);
    }

    fn disable_client_state(&mut self, state: ClientState) {
        self.client_states.remove(&state);
    }

    fn client_pointer(&mut self, state: ClientState, components: u32, kind: ComponentType) {
        let Some(buffer) = self.bound_buffers.get(&BufferTarget::Array).copied() else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        self.client_pointers.insert(
            state,
            ArrayPointer {
                buffer,
                components,
                kind,
            },
        );
    }

    fn enable_vertex_attrib(&mut self, index: u32) {
        self.attribs.insert(index);
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        self.attribs.remove(&index);
    }

    fn vertex_attrib_pointer(&mut self, index: u32, components: u32, kind: ComponentType) {
        let Some(buffer) = self.bound_buffers.get(&BufferTarget::Array).copied() else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        self.attrib_pointers.insert(
            index,
            ArrayPointer {
                buffer,
                components,
                kind,
            },
        );
    }

    fn draw_elements(&mut self, primitive: Primitive, count: usize, kind: ComponentType) {
        let Some(indices) = self.indices(count, kind) else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        let max_index = indices.iter().copied().max().unwrap_or(0);

        let client_arrays = self
            .client_states
            .iter()
            .map(|state| self.client_pointers.get(state));
        let attrib_arrays = self
            .attribs
            .iter()
            .map(|index| self.attrib_pointers.get(index));
        let in_bounds = client_arrays.chain(attrib_arrays).all(|pointer| {
            pointer
                .and_then(|pointer| self.pointer_capacity(pointer))
                .is_some_and(|capacity| count == 0 || max_index < capacity)
        });

        if !in_bounds {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }

        self.draws.push(DrawCall::Elements {
            primitive,
            count,
            program: self.program,
            viewport: self.viewport,
        });
        self.submit();

        match self.program {
            Some(program) => self.apply_pipeline_state(program),
            None => {
                let vertices = indices
                    .iter()
                    .map(|&index| self.client_vector(ClientState::VertexArray, index))
                    .collect::<Option<Vec<_>>>();
                let normals = indices
                    .iter()
                    .map(|&index| {
                        self.client_vector(ClientState::NormalArray, index)
                            .unwrap_or(self.current_normal)
                    })
                    .collect_vec();
                if let Some(vertices) = vertices {
                    self.rasterize(primitive, &vertices, &normals);
                }
            }
        }
    }

    fn create_texture(&mut self) -> TextureId {
        TextureId(self.textures.insert(TextureRecord::default()) as u32 + 1)
    }

    fn active_texture(&mut self, unit: u32) {
        if unit as i32 >= self.info.max_texture_image_units.max(1) {
            self.flag(GlError::INVALID_ENUM);
            return;
        }
        self.active_unit = unit;
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        match texture {
            Some(texture) if !self.textures.contains(Self::key(texture.0)) => {
                self.flag(GlError::INVALID_VALUE)
            }
            Some(texture) => {
                self.bound_textures.insert((self.active_unit, target), texture);
            }
            None => {
                self.bound_textures.remove(&(self.active_unit, target));
            }
        }
    }

    fn tex_image(&mut self, upload: &TextureUpload) {
        self.texture_uploads += 1;

        let max = self.info.max_texture_size.max(0) as u32;
        let expected = (upload.width * upload.height) as usize * upload.format.bytes_per_texel();
        if upload.width > max || upload.height > max || upload.data.len() != expected {
            self.flag(GlError::INVALID_VALUE);
            return;
        }

        let Some(texture) = self.bound_texture(self.active_unit, upload.target) else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        if let Some(record) = self.textures.get_mut(Self::key(texture.0)) {
            *record = TextureRecord {
                target: Some(upload.target),
                format: Some(upload.format),
                width: upload.width,
                height: upload.height,
            };
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.contains(Self::key(texture.0)) {
            self.textures.remove(Self::key(texture.0));
            self.bound_textures.retain(|_, bound| *bound != texture);
        }
    }

    fn create_shader(&mut self, _stage: ShaderStage) -> ShaderId {
        ShaderId(
            self.shaders.insert(ShaderRecord {
                source: String::new(),
            }) as u32
                + 1,
        )
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> Result<(), String> {
        let Some(record) = self.shaders.get_mut(Self::key(shader.0)) else {
            return Err(format!("unknown shader {shader}"));
        };
        if !source.contains("void main") {
            return Err("missing entry point `main`".into());
        }
        record.source = source.into();
        Ok(())
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.contains(Self::key(shader.0)) {
            self.shaders.remove(Self::key(shader.0));
        }
    }

    fn create_program(&mut self) -> ProgramId {
        ProgramId(self.programs.insert(ProgramRecord::default()) as u32 + 1)
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        match self.programs.get_mut(Self::key(program.0)) {
            Some(record) => record.shaders.push(shader),
            None => self.flag(GlError::INVALID_VALUE),
        }
    }

    fn bind_attrib_location(&mut self, _program: ProgramId, _index: u32, _name: &str) {}

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        if let Some(log) = &self.link_fault {
            return Err(log.clone());
        }

        let Some(record) = self.programs.get(Self::key(program.0)) else {
            return Err(format!("unknown program {program}"));
        };
        let uniforms = record
            .shaders
            .iter()
            .filter_map(|shader| self.shaders.get(Self::key(shader.0)))
            .flat_map(|shader| Self::uniform_names(&shader.source))
            .unique()
            .collect_vec();

        if let Some(record) = self.programs.get_mut(Self::key(program.0)) {
            record.uniforms = uniforms;
            record.linked = true;
        }
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(program) = program {
            let linked = self
                .programs
                .get(Self::key(program.0))
                .is_some_and(|record| record.linked);
            if !linked {
                self.flag(GlError::INVALID_OPERATION);
                return;
            }
        }
        self.program = program;
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.contains(Self::key(program.0)) {
            self.programs.remove(Self::key(program.0));
            self.uniforms.retain(|(owner, _), _| *owner != program);
            if self.program == Some(program) {
                self.program = None;
            }
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(Self::key(program.0))?
            .uniforms
            .iter()
            .position(|uniform| uniform == name)
            .map(|index| UniformLocation(index as i32))
    }

    fn uniform(&mut self, location: UniformLocation, value: UniformValue) {
        match self.program {
            Some(program) => {
                self.uniforms.insert((program, location.0), value);
            }
            None => self.flag(GlError::INVALID_OPERATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_tracked_until_deleted() {
        let mut gl = HeadlessGl::default();

        let buffer = gl.create_buffer();
        let texture = gl.create_texture();
        let list = gl.create_list();
        assert_eq!(gl.live_handles(), 3);

        gl.delete_buffer(buffer);
        gl.delete_texture(texture);
        gl.delete_list(list);
        gl.delete_list(list);
        assert_eq!(gl.live_handles(), 0);
        assert_eq!(gl.get_error(), None);
    }

    #[test]
    fn display_lists_record_primitives() {
        let mut gl = HeadlessGl::default();
        let list = gl.create_list();

        gl.begin_list(list);
        gl.begin(Primitive::TriangleStrip);
        gl.normal(Vec3::X);
        gl.vertex(Vec3::ZERO);
        gl.vertex(Vec3::ONE);
        gl.end();
        gl.end_list();

        let contents = gl.list_contents(list).unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].vertices, vec![Vec3::ZERO, Vec3::ONE]);
        assert_eq!(contents[0].normals, vec![Vec3::X, Vec3::X]);
        assert_eq!(gl.immediate_vertices(), 0);

        gl.call_list(list);
        assert_eq!(gl.immediate_vertices(), 2);
    }

    #[test]
    fn draws_reading_past_the_vertex_buffer_are_rejected() {
        let mut gl = HeadlessGl::default();
        let vertices = gl.create_buffer();
        let indices = gl.create_buffer();

        gl.bind_buffer(BufferTarget::Array, Some(vertices));
        gl.buffer_data(BufferTarget::Array, bytemuck::cast_slice(&[0.0f32; 6]));
        gl.enable_client_state(ClientState::VertexArray);
        gl.client_pointer(ClientState::VertexArray, 3, ComponentType::Float);

        gl.bind_buffer(BufferTarget::ElementArray, Some(indices));
        gl.buffer_data(BufferTarget::ElementArray, bytemuck::cast_slice(&[0u32, 1, 2]));

        gl.draw_elements(Primitive::TriangleStrip, 2, ComponentType::UnsignedInt);
        assert_eq!(gl.get_error(), None);

        gl.draw_elements(Primitive::TriangleStrip, 3, ComponentType::UnsignedInt);
        assert_eq!(gl.get_error(), Some(GlError::INVALID_OPERATION));
        assert_eq!(gl.draw_calls().len(), 1);
    }

    #[test]
    fn injected_faults_hit_the_requested_submission() {
        let mut gl = HeadlessGl::default();
        let list = gl.create_list();
        gl.fail_on_draw(2, GlError::OUT_OF_MEMORY);

        gl.call_list(list);
        gl.call_list(list);
        assert_eq!(gl.get_error(), None);

        gl.call_list(list);
        assert_eq!(gl.get_error(), Some(GlError::OUT_OF_MEMORY));
    }

    #[test]
    fn linking_collects_declared_uniforms() {
        let mut gl = HeadlessGl::default();
        let shader = gl.create_shader(ShaderStage::Vertex);
        gl.compile_shader(
            shader,
            "uniform vec2 shearXY;\nuniform float rowOffset;\nvoid main() {}",
        )
        .unwrap();
        let program = gl.create_program();
        gl.attach_shader(program, shader);
        gl.link_program(program).unwrap();

        assert!(gl.uniform_location(program, "rowOffset").is_some());
        assert!(gl.uniform_location(program, "missing").is_none());

        gl.fail_link("out of registers");
        assert_eq!(gl.link_program(program), Err("out of registers".into()));
    }

    #[test]
    fn oversized_texture_uploads_are_rejected() {
        let mut gl = HeadlessGl::new(HeadlessInfo::default().with_max_texture_size(4));
        let texture = gl.create_texture();
        gl.bind_texture(TextureTarget::Texture2d, Some(texture));

        gl.tex_image(&TextureUpload {
            target: TextureTarget::Texture2d,
            format: TextureFormat::R8,
            filter: TextureFilter::Nearest,
            width: 8,
            height: 1,
            data: &[0; 8],
        });

        assert_eq!(gl.get_error(), Some(GlError::INVALID_VALUE));
        assert_eq!(gl.texture_size(texture), None);
    }

    fn lit_pixels(gl: &mut HeadlessGl) -> usize {
        let viewport = gl.viewport();
        gl.read_pixels(viewport)
            .chunks_exact(4)
            .filter(|pixel| pixel[..3] != [0, 0, 0])
            .count()
    }

    #[test]
    fn immediate_triangles_reach_the_color_buffer() {
        let mut gl = HeadlessGl::default();
        gl.set_viewport(Viewport::new(0, 0, 10, 10));
        gl.clear_color(Vec4::new(0.0, 0.0, 0.0, 1.0));
        gl.clear();
        assert_eq!(lit_pixels(&mut gl), 0);

        gl.begin(Primitive::Triangles);
        gl.vertex(Vec3::new(-1.0, -1.0, 0.0));
        gl.vertex(Vec3::new(1.0, -1.0, 0.0));
        gl.vertex(Vec3::new(-1.0, 1.0, 0.0));
        gl.end();

        assert_eq!(lit_pixels(&mut gl), 55);
        assert_eq!(gl.pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(gl.pixel(9, 9), Some([0, 0, 0, 255]));

        gl.clear();
        assert_eq!(lit_pixels(&mut gl), 0);
    }

    #[test]
    fn client_array_draws_are_shaded_by_the_light() {
        let mut gl = HeadlessGl::default();
        gl.set_viewport(Viewport::new(0, 0, 4, 4));
        gl.clear();
        gl.set_light(Some(LightParams {
            ambient: 0.2,
            diffuse: 0.4,
            position: Vec4::new(1.0, 0.0, 0.0, 0.0),
        }));

        let vertices = gl.create_buffer();
        gl.bind_buffer(BufferTarget::Array, Some(vertices));
        gl.buffer_data(
            BufferTarget::Array,
            bytemuck::cast_slice(&[-1.0f32, -1.0, 0.0, 1.0, -1.0, 0.0, -1.0, 1.0, 0.0, 1.0, 1.0, 0.0]),
        );
        gl.enable_client_state(ClientState::VertexArray);
        gl.client_pointer(ClientState::VertexArray, 3, ComponentType::Float);

        let indices = gl.create_buffer();
        gl.bind_buffer(BufferTarget::ElementArray, Some(indices));
        gl.buffer_data(BufferTarget::ElementArray, bytemuck::cast_slice(&[0u16, 1, 2, 3]));
        gl.normal(Vec3::X);
        gl.draw_elements(Primitive::TriangleStrip, 4, ComponentType::UnsignedShort);

        assert_eq!(gl.get_error(), None);
        let pixels = gl.read_pixels(Viewport::new(0, 0, 4, 4));
        assert!(pixels.chunks_exact(4).all(|pixel| pixel == [153, 153, 153, 255]));
    }

    #[test]
    fn program_draws_receive_the_pipeline_state() {
        let mut gl = HeadlessGl::default();
        let shader = gl.create_shader(ShaderStage::Vertex);
        gl.compile_shader(
            shader,
            "uniform mat4 modelViewMatrix;\nuniform float fogEnd;\nvoid main() {}",
        )
        .unwrap();
        let program = gl.create_program();
        gl.attach_shader(program, shader);
        gl.link_program(program).unwrap();

        let indices = gl.create_buffer();
        gl.bind_buffer(BufferTarget::ElementArray, Some(indices));
        gl.buffer_data(BufferTarget::ElementArray, bytemuck::cast_slice(&[0u16; 3]));

        let modelview = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        gl.load_modelview(modelview);
        gl.use_program(Some(program));
        gl.draw_elements(Primitive::Triangles, 3, ComponentType::UnsignedShort);

        assert_eq!(
            gl.uniform_value(program, "modelViewMatrix"),
            Some(UniformValue::Mat4(modelview))
        );
        assert_eq!(gl.uniform_value(program, "fogEnd"), Some(UniformValue::Float(1.0)));
        assert_eq!(gl.uniform_value(program, "projectionMatrix"), None);
    }
}
