//! An OpenGL device on top of a [`glow::Context`].
//!
//! glow only exposes the programmable pipeline. Display lists, client arrays, lighting,
//! fog and texture coordinate generation are therefore emulated: display lists are recorded
//! into vertex buffers, and everything drawn without a program of the caller goes through a
//! built-in program that evaluates the fixed function state.
//!
//! The context has to run GLSL 1.20 shaders, so OpenGL 2.1 or a compatibility profile.

use crate::{
    gl::{
        BufferId, BufferTarget, Capability, ClientState, ComponentType, FogParams, Gl, GlError,
        IntegerName, LightParams, ListId, PipelineState, Primitive, ProgramId, ShaderId,
        ShaderStage, StringName, TexGenCoord, TextureFilter, TextureFormat, TextureId,
        TextureTarget, TextureUpload, UniformLocation, UniformValue, Viewport,
    },
    program::ShaderProgram,
    shaders::{
        FIXED_FUNCTION_ATTRIBUTES, FIXED_FUNCTION_FRAGMENT_SHADER, FIXED_FUNCTION_VERTEX_SHADER,
    },
};
use anyhow::{bail, Context as _, Result};
use bevy::{
    log::{debug, warn},
    math::{Mat4, Vec2, Vec3, Vec4},
    utils::{HashMap, HashSet},
};
use glow::HasContext;
use itertools::Itertools;
use slab::Slab;
use std::{
    collections::{BTreeSet, VecDeque},
    ffi::c_void,
    mem,
    num::NonZeroU32,
};

const LUMINANCE: u32 = 0x1909;
const LUMINANCE8: u32 = 0x8040;
const LUMINANCE32F: u32 = 0x8818;

/// Position, normal and texture coordinate of a recorded vertex.
const FLOATS_PER_VERTEX: usize = 3 + 3 + 2;
const VERTEX_STRIDE: i32 = (FLOATS_PER_VERTEX * 4) as i32;

/// Extensions that are part of the core profile since the given version.
const CORE_EXTENSIONS: [((u32, u32), &str); 3] = [
    ((1, 5), "GL_ARB_vertex_buffer_object"),
    ((2, 0), "GL_ARB_texture_non_power_of_two"),
    ((3, 0), "GL_ARB_texture_float"),
];

/// The extensions a context of the given version supports without advertising them.
fn implied_extensions<'a>(major: u32, minor: u32) -> impl Iterator<Item = &'a str> {
    CORE_EXTENSIONS
        .into_iter()
        .filter(move |(version, _)| (major, minor) >= *version)
        .map(|(_, name)| name)
}

fn primitive_mode(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::Triangles => glow::TRIANGLES,
    }
}

fn component_type(kind: ComponentType) -> u32 {
    match kind {
        ComponentType::Float => glow::FLOAT,
        ComponentType::UnsignedShort => glow::UNSIGNED_SHORT,
        ComponentType::UnsignedInt => glow::UNSIGNED_INT,
    }
}

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture1d => glow::TEXTURE_1D,
        TextureTarget::Texture2d => glow::TEXTURE_2D,
    }
}

/// Internal format, format and type of a texture upload.
/// Contexts before OpenGL 3.0 have no single channel formats besides luminance.
fn pixel_format(format: TextureFormat, legacy: bool) -> (i32, u32, u32) {
    match (format, legacy) {
        (TextureFormat::Rgba8, _) => (glow::RGBA8 as i32, glow::RGBA, glow::UNSIGNED_BYTE),
        (TextureFormat::R8, true) => (LUMINANCE8 as i32, LUMINANCE, glow::UNSIGNED_BYTE),
        (TextureFormat::R8, false) => (glow::R8 as i32, glow::RED, glow::UNSIGNED_BYTE),
        (TextureFormat::R32Float, true) => (LUMINANCE32F as i32, LUMINANCE, glow::FLOAT),
        (TextureFormat::R32Float, false) => (glow::R32F as i32, glow::RED, glow::FLOAT),
    }
}

/// The capabilities with an OpenGL switch, the others only exist in the emulated state.
fn native_capability(capability: Capability) -> Option<u32> {
    match capability {
        Capability::DepthTest => Some(glow::DEPTH_TEST),
        Capability::CullFace => Some(glow::CULL_FACE),
        Capability::Multisample => Some(glow::MULTISAMPLE),
        _ => None,
    }
}

/// A run of vertices drawn with one primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Batch {
    primitive: Primitive,
    first: usize,
    count: usize,
}

/// Collects the vertices emitted between `begin` and `end`, interleaved with the normal and
/// texture coordinate current at the time.
struct VertexRecorder {
    vertices: Vec<f32>,
    batches: Vec<Batch>,
    open: Option<Batch>,
    normal: Vec3,
    coordinate: Vec2,
}

impl Default for VertexRecorder {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            batches: Vec::new(),
            open: None,
            normal: Vec3::Z,
            coordinate: Vec2::ZERO,
        }
    }
}

impl VertexRecorder {
    fn vertex_count(&self) -> usize {
        self.vertices.len() / FLOATS_PER_VERTEX
    }

    fn begin(&mut self, primitive: Primitive) -> bool {
        if self.open.is_some() {
            return false;
        }
        self.open = Some(Batch {
            primitive,
            first: self.vertex_count(),
            count: 0,
        });
        true
    }

    fn vertex(&mut self, position: Vec3) -> bool {
        let Some(batch) = self.open.as_mut() else {
            return false;
        };
        batch.count += 1;
        self.vertices.extend(position.to_array());
        self.vertices.extend(self.normal.to_array());
        self.vertices.extend(self.coordinate.to_array());
        true
    }

    fn end(&mut self) -> bool {
        let Some(batch) = self.open.take() else {
            return false;
        };
        if batch.count > 0 {
            self.batches.push(batch);
        }
        true
    }

    fn take(&mut self) -> (Vec<f32>, Vec<Batch>) {
        (mem::take(&mut self.vertices), mem::take(&mut self.batches))
    }
}

#[derive(Default)]
struct RecordedList {
    buffer: Option<BufferId>,
    batches: Vec<Batch>,
}

#[derive(Clone, Copy)]
struct ArrayPointer {
    buffer: BufferId,
    components: u32,
    kind: ComponentType,
}

/// Drives a live OpenGL context through [`glow`].
///
/// The context must be current on the thread using the device, and stay current until the
/// device is dropped.
pub struct GlowGl {
    gl: glow::Context,
    legacy_formats: bool,
    vertex_array: Option<glow::NativeVertexArray>,
    errors: VecDeque<GlError>,

    viewport: Viewport,
    state: PipelineState,
    enabled: HashSet<Capability>,
    tex_gen_planes: HashMap<TexGenCoord, Vec4>,

    recorder: VertexRecorder,
    lists: Slab<RecordedList>,
    compiling: Option<ListId>,
    immediate_buffer: Option<BufferId>,

    array_buffer: Option<BufferId>,
    client_states: HashSet<ClientState>,
    client_pointers: HashMap<ClientState, ArrayPointer>,

    program: Option<ProgramId>,
    fixed_function: Option<ShaderProgram>,
}

impl GlowGl {
    /// Wraps a context that is current on this thread and builds the fixed function program.
    pub fn new(gl: glow::Context) -> Result<Self> {
        let (major, minor, embedded) = {
            let version = gl.version();
            (version.major, version.minor, version.is_embedded)
        };
        if embedded || (major, minor) < (2, 1) {
            bail!(
                "OpenGL {}{major}.{minor} cannot run GLSL 1.20 shaders.",
                if embedded { "ES " } else { "" },
            );
        }
        let legacy_formats = major < 3;

        let vertex_array = if major >= 3 {
            // core profiles cannot draw without a vertex array object
            let vertex_array = unsafe { gl.create_vertex_array() }.map_err(anyhow::Error::msg)?;
            unsafe { gl.bind_vertex_array(Some(vertex_array)) };
            Some(vertex_array)
        } else {
            None
        };

        let mut viewport = [0; 4];
        unsafe { gl.get_parameter_i32_slice(glow::VIEWPORT, &mut viewport) };

        let mut device = Self {
            gl,
            legacy_formats,
            vertex_array,
            errors: VecDeque::new(),
            viewport: Viewport::new(viewport[0], viewport[1], viewport[2], viewport[3]),
            state: PipelineState::default(),
            enabled: HashSet::default(),
            tex_gen_planes: HashMap::default(),
            recorder: VertexRecorder::default(),
            lists: Slab::new(),
            compiling: None,
            immediate_buffer: None,
            array_buffer: None,
            client_states: HashSet::default(),
            client_pointers: HashMap::default(),
            program: None,
            fixed_function: None,
        };

        let program = ShaderProgram::new(
            &mut device,
            FIXED_FUNCTION_VERTEX_SHADER,
            FIXED_FUNCTION_FRAGMENT_SHADER,
            &FIXED_FUNCTION_ATTRIBUTES,
        )
        .context("Could not build the fixed function program.")?;
        device.fixed_function = Some(program);

        debug!("Created an OpenGL {major}.{minor} device, legacy texture formats: {legacy_formats}.");
        Ok(device)
    }

    /// Loads the OpenGL functions of the current context.
    ///
    /// # Safety
    /// A context has to be current on this thread and `loader` must return the addresses
    /// of its functions.
    pub unsafe fn from_loader_function<F>(loader: F) -> Result<Self>
    where
        F: FnMut(&str) -> *const c_void,
    {
        Self::new(glow::Context::from_loader_function(loader))
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn flag(&mut self, error: GlError) {
        self.errors.push_back(error);
    }

    fn native_buffer(buffer: BufferId) -> Option<glow::NativeBuffer> {
        NonZeroU32::new(buffer.0).map(glow::NativeBuffer)
    }

    fn native_texture(texture: TextureId) -> Option<glow::NativeTexture> {
        NonZeroU32::new(texture.0).map(glow::NativeTexture)
    }

    fn native_shader(shader: ShaderId) -> Option<glow::NativeShader> {
        NonZeroU32::new(shader.0).map(glow::NativeShader)
    }

    fn native_program(program: ProgramId) -> Option<glow::NativeProgram> {
        NonZeroU32::new(program.0).map(glow::NativeProgram)
    }

    fn extensions(&self) -> String {
        let version = self.gl.version();
        let mut names: BTreeSet<&str> = self
            .gl
            .supported_extensions()
            .iter()
            .map(String::as_str)
            .collect();
        names.extend(implied_extensions(version.major, version.minor));
        names.into_iter().join(" ")
    }

    fn upload(&mut self, data: &[f32], buffer: Option<BufferId>, usage: u32) -> BufferId {
        let buffer = buffer.unwrap_or_else(|| self.create_buffer());
        unsafe {
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, Self::native_buffer(buffer));
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(data), usage);
            self.gl.bind_buffer(
                glow::ARRAY_BUFFER,
                self.array_buffer.and_then(Self::native_buffer),
            );
        }
        buffer
    }

    /// Sets the uniforms of [`PipelineState::uniforms`] the bound program declares.
    fn apply_pipeline_state(&mut self, program: ProgramId) {
        for (name, value) in self.state.uniforms() {
            if let Some(location) = self.uniform_location(program, name) {
                self.uniform(location, value);
            }
        }
    }

    fn set_optional_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        if let Some(location) = self.uniform_location(program, name) {
            self.uniform(location, value);
        }
    }

    /// Binds the fixed function program and hands it the emulated state.
    fn begin_fixed_function(&mut self) -> Option<ProgramId> {
        let program = self.fixed_function.as_ref().map(ShaderProgram::id)?;
        unsafe { self.gl.use_program(Self::native_program(program)) };
        self.apply_pipeline_state(program);

        let texture_mode: i32 = if self.enabled.contains(&Capability::Texture2d) {
            2
        } else if self.enabled.contains(&Capability::Texture1d) {
            1
        } else {
            0
        };
        // samplers of different types must not share a unit
        let (ramp_unit, drape_unit): (i32, i32) = if texture_mode == 2 { (1, 0) } else { (0, 1) };
        let generate_s = self.enabled.contains(&Capability::TextureGenS);
        let generate_t = self.enabled.contains(&Capability::TextureGenT);
        let plane = |coord: TexGenCoord| self.tex_gen_planes.get(&coord).copied().unwrap_or(Vec4::ZERO);
        let (plane_s, plane_t) = (plane(TexGenCoord::S), plane(TexGenCoord::T));

        let uniforms: [(&str, UniformValue); 9] = [
            ("textureMode", texture_mode.into()),
            ("rampTexture", ramp_unit.into()),
            ("drapeTexture", drape_unit.into()),
            ("applyShading", self.state.light.is_some().into()),
            ("applyFog", self.state.fog.is_some().into()),
            ("generateS", generate_s.into()),
            ("generateT", generate_t.into()),
            ("planeS", plane_s.into()),
            ("planeT", plane_t.into()),
        ];
        for (name, value) in uniforms {
            self.set_optional_uniform(program, name, value);
        }
        Some(program)
    }

    fn end_fixed_function(&mut self) {
        unsafe {
            for (index, _) in FIXED_FUNCTION_ATTRIBUTES {
                self.gl.disable_vertex_attrib_array(index);
            }
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, self.array_buffer.and_then(Self::native_buffer));
            self.gl
                .use_program(self.program.and_then(Self::native_program));
        }
    }

    /// Draws vertices recorded between `begin` and `end` from an interleaved buffer.
    fn draw_recorded(&mut self, buffer: BufferId, batches: &[Batch]) {
        if self.begin_fixed_function().is_none() {
            return;
        }

        let [(position, _), (normal, _), (coordinate, _)] = FIXED_FUNCTION_ATTRIBUTES;
        unsafe {
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, Self::native_buffer(buffer));
            for (index, components, offset) in [(position, 3, 0), (normal, 3, 12), (coordinate, 2, 24)] {
                self.gl.enable_vertex_attrib_array(index);
                self.gl.vertex_attrib_pointer_f32(
                    index,
                    components,
                    glow::FLOAT,
                    false,
                    VERTEX_STRIDE,
                    offset,
                );
            }
            for batch in batches {
                self.gl.draw_arrays(
                    primitive_mode(batch.primitive),
                    batch.first as i32,
                    batch.count as i32,
                );
            }
        }
        self.end_fixed_function();
    }

    /// Draws the bound element buffer with the enabled client arrays.
    fn draw_client_arrays(&mut self, primitive: Primitive, count: usize, kind: ComponentType) {
        if self.begin_fixed_function().is_none() {
            return;
        }

        let [(position, _), (normal, _), (coordinate, _)] = FIXED_FUNCTION_ATTRIBUTES;
        let arrays = [
            (ClientState::VertexArray, position),
            (ClientState::NormalArray, normal),
            (ClientState::TexCoordArray, coordinate),
        ];
        let current_normal = self.recorder.normal;
        let current_coordinate = self.recorder.coordinate;

        unsafe {
            for (state, index) in arrays {
                let pointer = self
                    .client_pointers
                    .get(&state)
                    .filter(|_| self.client_states.contains(&state));

                match pointer {
                    Some(pointer) => {
                        self.gl
                            .bind_buffer(glow::ARRAY_BUFFER, Self::native_buffer(pointer.buffer));
                        self.gl.enable_vertex_attrib_array(index);
                        self.gl.vertex_attrib_pointer_f32(
                            index,
                            pointer.components as i32,
                            component_type(pointer.kind),
                            false,
                            0,
                            0,
                        );
                    }
                    None => {
                        self.gl.disable_vertex_attrib_array(index);
                        match state {
                            ClientState::NormalArray => self.gl.vertex_attrib_3_f32(
                                index,
                                current_normal.x,
                                current_normal.y,
                                current_normal.z,
                            ),
                            ClientState::TexCoordArray => self.gl.vertex_attrib_2_f32(
                                index,
                                current_coordinate.x,
                                current_coordinate.y,
                            ),
                            ClientState::VertexArray => {}
                        }
                    }
                }
            }

            self.gl.draw_elements(
                primitive_mode(primitive),
                count as i32,
                component_type(kind),
                0,
            );
        }
        self.end_fixed_function();
    }
}

impl Drop for GlowGl {
    fn drop(&mut self) {
        if let Some(program) = self.fixed_function.take() {
            program.release(self);
        }
        let buffers = self
            .lists
            .drain()
            .filter_map(|list| list.buffer)
            .chain(self.immediate_buffer.take())
            .collect_vec();
        for buffer in buffers {
            self.delete_buffer(buffer);
        }
        if let Some(vertex_array) = self.vertex_array.take() {
            unsafe { self.gl.delete_vertex_array(vertex_array) };
        }
    }
}

impl Gl for GlowGl {
    fn get_string(&self, name: StringName) -> Option<String> {
        let parameter = match name {
            StringName::Vendor => glow::VENDOR,
            StringName::Renderer => glow::RENDERER,
            StringName::Version => glow::VERSION,
            StringName::ShadingLanguageVersion => glow::SHADING_LANGUAGE_VERSION,
            StringName::Extensions => return Some(self.extensions()),
        };
        let value = unsafe { self.gl.get_parameter_string(parameter) };
        (!value.is_empty()).then_some(value)
    }

    fn get_integer(&self, name: IntegerName) -> i32 {
        let parameter = match name {
            IntegerName::MaxTextureSize => glow::MAX_TEXTURE_SIZE,
            IntegerName::MaxDrawBuffers => glow::MAX_DRAW_BUFFERS,
            IntegerName::MaxVertexTextureImageUnits => glow::MAX_VERTEX_TEXTURE_IMAGE_UNITS,
            IntegerName::MaxTextureImageUnits => glow::MAX_TEXTURE_IMAGE_UNITS,
        };
        unsafe { self.gl.get_parameter_i32(parameter) }
    }

    fn get_error(&mut self) -> Option<GlError> {
        if let Some(error) = self.errors.pop_front() {
            return Some(error);
        }
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => None,
            code => Some(GlError { code }),
        }
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
        unsafe {
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width, viewport.height)
        };
    }

    fn clear_color(&mut self, color: Vec4) {
        unsafe { self.gl.clear_color(color.x, color.y, color.z, color.w) };
    }

    fn clear(&mut self) {
        unsafe {
            self.gl
                .clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT)
        };
    }

    fn enable(&mut self, capability: Capability) {
        self.enabled.insert(capability);
        if let Some(capability) = native_capability(capability) {
            unsafe { self.gl.enable(capability) };
        }
    }

    fn disable(&mut self, capability: Capability) {
        self.enabled.remove(&capability);
        if let Some(capability) = native_capability(capability) {
            unsafe { self.gl.disable(capability) };
        }
    }

    fn flush(&mut self) {
        unsafe { self.gl.flush() };
    }

    fn read_pixels(&mut self, viewport: Viewport) -> Vec<u8> {
        let (width, height) = (viewport.width.max(0), viewport.height.max(0));
        let mut pixels = vec![0; (width * height) as usize * 4];
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                viewport.x,
                viewport.y,
                width,
                height,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut pixels)),
            );
        }
        pixels
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
        ListId(self.lists.insert(RecordedList::default()) as u32 + 1)
    }

    fn begin_list(&mut self, list: ListId) {
        let key = (list.0 as usize).wrapping_sub(1);
        if self.compiling.is_some() || self.recorder.open.is_some() || !self.lists.contains(key) {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }
        self.compiling = Some(list);
    }

    fn end_list(&mut self) {
        let Some(list) = self.compiling.take() else {
            self.flag(GlError::INVALID_OPERATION);
            return;
        };
        let key = (list.0 as usize).wrapping_sub(1);
        let (vertices, batches) = self.recorder.take();
        let previous = self.lists.get(key).and_then(|recorded| recorded.buffer);
        let buffer = self.upload(&vertices, previous, glow::STATIC_DRAW);

        if let Some(recorded) = self.lists.get_mut(key) {
            *recorded = RecordedList {
                buffer: Some(buffer),
                batches,
            };
        }
    }

    fn call_list(&mut self, list: ListId) {
        let key = (list.0 as usize).wrapping_sub(1);
        let Some((Some(buffer), batches)) = self
            .lists
            .get(key)
            .map(|recorded| (recorded.buffer, recorded.batches.clone()))
        else {
            return;
        };
        self.draw_recorded(buffer, &batches);
    }

    fn delete_list(&mut self, list: ListId) {
        let key = (list.0 as usize).wrapping_sub(1);
        if let Some(recorded) = self.lists.try_remove(key) {
            if let Some(buffer) = recorded.buffer {
                self.delete_buffer(buffer);
            }
        }
    }

    fn begin(&mut self, primitive: Primitive) {
        if !self.recorder.begin(primitive) {
            self.flag(GlError::INVALID_OPERATION);
        }
    }

    fn end(&mut self) {
        if !self.recorder.end() {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }
        if self.compiling.is_none() {
            let (vertices, batches) = self.recorder.take();
            let buffer = self.upload(&vertices, self.immediate_buffer, glow::STREAM_DRAW);
            self.immediate_buffer = Some(buffer);
            self.draw_recorded(buffer, &batches);
        }
    }

    fn normal(&mut self, normal: Vec3) {
        self.recorder.normal = normal;
    }

    fn tex_coord_1d(&mut self, s: f32) {
        self.recorder.coordinate = Vec2::new(s, 0.0);
    }

    fn tex_coord_2d(&mut self, st: Vec2) {
        self.recorder.coordinate = st;
    }

    fn vertex(&mut self, position: Vec3) {
        if !self.recorder.vertex(position) {
            self.flag(GlError::INVALID_OPERATION);
        }
    }

    fn create_buffer(&mut self) -> BufferId {
        match unsafe { self.gl.create_buffer() } {
            Ok(buffer) => BufferId(buffer.0.get()),
            Err(error) => {
                warn!("Could not create a buffer: {error}");
                self.flag(GlError::OUT_OF_MEMORY);
                BufferId(0)
            }
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        if target == BufferTarget::Array {
            self.array_buffer = buffer;
        }
        unsafe {
            self.gl.bind_buffer(
                buffer_target(target),
                buffer.and_then(Self::native_buffer),
            )
        };
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(buffer_target(target), data, glow::STATIC_DRAW)
        };
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.array_buffer == Some(buffer) {
            self.array_buffer = None;
        }
        self.client_pointers
            .retain(|_, pointer| pointer.buffer != buffer);
        if let Some(native) = Self::native_buffer(buffer) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn enable_client_state(&mut self, state: ClientState) {
        self.client_states.insert(state);
    }

    fn disable_client_state(&mut self, state: ClientState) {
        self.client_states.remove(&state);
    }

    fn client_pointer(&mut self, state: ClientState, components: u32, kind: ComponentType) {
        let Some(buffer) = self.array_buffer else {
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
        unsafe { self.gl.enable_vertex_attrib_array(index) };
    }

    fn disable_vertex_attrib(&mut self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn vertex_attrib_pointer(&mut self, index: u32, components: u32, kind: ComponentType) {
        if self.array_buffer.is_none() {
            self.flag(GlError::INVALID_OPERATION);
            return;
        }
        unsafe {
            self.gl.vertex_attrib_pointer_f32(
                index,
                components as i32,
                component_type(kind),
                false,
                0,
                0,
            )
        };
    }

    fn draw_elements(&mut self, primitive: Primitive, count: usize, kind: ComponentType) {
        match self.program {
            Some(program) => {
                self.apply_pipeline_state(program);
                unsafe {
                    self.gl.draw_elements(
                        primitive_mode(primitive),
                        count as i32,
                        component_type(kind),
                        0,
                    )
                };
            }
            None => self.draw_client_arrays(primitive, count, kind),
        }
    }

    fn create_texture(&mut self) -> TextureId {
        match unsafe { self.gl.create_texture() } {
            Ok(texture) => TextureId(texture.0.get()),
            Err(error) => {
                warn!("Could not create a texture: {error}");
                self.flag(GlError::OUT_OF_MEMORY);
                TextureId(0)
            }
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        unsafe {
            self.gl.bind_texture(
                texture_target(target),
                texture.and_then(Self::native_texture),
            )
        };
    }

    fn tex_image(&mut self, upload: &TextureUpload) {
        let target = texture_target(upload.target);
        let (internal, format, kind) = pixel_format(upload.format, self.legacy_formats);
        let filter = match upload.filter {
            TextureFilter::Nearest => glow::NEAREST,
            TextureFilter::Linear => glow::LINEAR,
        } as i32;
        let pixels = glow::PixelUnpackData::Slice(Some(upload.data));

        unsafe {
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

            match upload.target {
                TextureTarget::Texture1d => self.gl.tex_image_1d(
                    target,
                    0,
                    internal,
                    upload.width as i32,
                    0,
                    format,
                    kind,
                    pixels,
                ),
                TextureTarget::Texture2d => self.gl.tex_image_2d(
                    target,
                    0,
                    internal,
                    upload.width as i32,
                    upload.height as i32,
                    0,
                    format,
                    kind,
                    pixels,
                ),
            }
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(native) = Self::native_texture(texture) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderId {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        match unsafe { self.gl.create_shader(kind) } {
            Ok(shader) => ShaderId(shader.0.get()),
            Err(error) => {
                warn!("Could not create a {stage:?} shader: {error}");
                self.flag(GlError::OUT_OF_MEMORY);
                ShaderId(0)
            }
        }
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> Result<(), String> {
        let Some(native) = Self::native_shader(shader) else {
            return Err(format!("invalid shader {shader}"));
        };
        unsafe {
            self.gl.shader_source(native, source);
            self.gl.compile_shader(native);
            if self.gl.get_shader_compile_status(native) {
                Ok(())
            } else {
                Err(self.gl.get_shader_info_log(native))
            }
        }
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(native) = Self::native_shader(shader) {
            unsafe { self.gl.delete_shader(native) };
        }
    }

    fn create_program(&mut self) -> ProgramId {
        match unsafe { self.gl.create_program() } {
            Ok(program) => ProgramId(program.0.get()),
            Err(error) => {
                warn!("Could not create a program: {error}");
                self.flag(GlError::OUT_OF_MEMORY);
                ProgramId(0)
            }
        }
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let (Some(program), Some(shader)) =
            (Self::native_program(program), Self::native_shader(shader))
        {
            unsafe { self.gl.attach_shader(program, shader) };
        }
    }

    fn bind_attrib_location(&mut self, program: ProgramId, index: u32, name: &str) {
        if let Some(program) = Self::native_program(program) {
            unsafe { self.gl.bind_attrib_location(program, index, name) };
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), String> {
        let Some(native) = Self::native_program(program) else {
            return Err(format!("invalid program {program}"));
        };
        unsafe {
            self.gl.link_program(native);
            if self.gl.get_program_link_status(native) {
                Ok(())
            } else {
                Err(self.gl.get_program_info_log(native))
            }
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
        unsafe {
            self.gl
                .use_program(program.and_then(Self::native_program))
        };
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.program == Some(program) {
            self.use_program(None);
        }
        if let Some(native) = Self::native_program(program) {
            unsafe { self.gl.delete_program(native) };
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = Self::native_program(program)?;
        unsafe { self.gl.get_uniform_location(program, name) }
            .map(|location| UniformLocation(location.0 as i32))
    }

    fn uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let location = glow::NativeUniformLocation(location.0 as u32);
        let location = Some(&location);

        unsafe {
            match value {
                UniformValue::Int(value) => self.gl.uniform_1_i32(location, value),
                UniformValue::Bool(value) => self.gl.uniform_1_i32(location, value as i32),
                UniformValue::Float(value) => self.gl.uniform_1_f32(location, value),
                UniformValue::Vec2(value) => self.gl.uniform_2_f32(location, value.x, value.y),
                UniformValue::Vec3(value) => {
                    self.gl.uniform_3_f32(location, value.x, value.y, value.z)
                }
                UniformValue::Vec4(value) => {
                    self.gl
                        .uniform_4_f32(location, value.x, value.y, value.z, value.w)
                }
                UniformValue::Mat3(value) => {
                    self.gl
                        .uniform_matrix_3_f32_slice(location, false, &value.to_cols_array())
                }
                UniformValue::Mat4(value) => {
                    self.gl
                        .uniform_matrix_4_f32_slice(location, false, &value.to_cols_array())
                }
            }
        }
    }
}
