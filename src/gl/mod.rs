//! The device seam between the renderer and an OpenGL context.
//!
//! Every GPU call of the crate goes through the [`Gl`] trait.
//! The trait mirrors the small subset of the OpenGL 1.1 fixed function pipeline,
//! the buffer object extension and the GLSL 1.20 program interface that the terrain
//! strategies need.
//! [`GlowGl`] implements it for a live context through [`glow`], while the [`HeadlessGl`]
//! device records and rasterizes all calls on the CPU, which is what the tests run against.
//!
//! Shader programs see the transform, light and fog state of the device through the
//! uniforms listed by [`PipelineState::uniforms`].

use bevy::math::{Mat3, Mat4, Vec2, Vec3, Vec4};
use derive_more::derive::{Display, From};
use thiserror::Error;

#[cfg(feature = "glow")]
pub mod glow;
pub mod headless;

#[cfg(feature = "glow")]
pub use self::glow::GlowGl;
pub use headless::HeadlessGl;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
            pub struct $name(pub u32);
        )*
    };
}

handle!(
    /// Name of a vertex or index buffer object.
    BufferId,
    /// Name of a 1D or 2D texture object.
    TextureId,
    /// Name of a compiled display list.
    ListId,
    ShaderId,
    ProgramId,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringName {
    Vendor,
    Renderer,
    Version,
    ShadingLanguageVersion,
    Extensions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntegerName {
    MaxTextureSize,
    MaxDrawBuffers,
    MaxVertexTextureImageUnits,
    MaxTextureImageUnits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    DepthTest,
    CullFace,
    Lighting,
    ColorMaterial,
    Normalize,
    Fog,
    Multisample,
    Texture1d,
    Texture2d,
    TextureGenS,
    TextureGenT,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientState {
    VertexArray,
    NormalArray,
    TexCoordArray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    TriangleStrip,
    Triangles,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Float,
    UnsignedShort,
    UnsignedInt,
}

impl ComponentType {
    pub fn size(self) -> usize {
        match self {
            Self::Float | Self::UnsignedInt => 4,
            Self::UnsignedShort => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture1d,
    Texture2d,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    R8,
    R32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::Rgba8 | Self::R32Float => 4,
            Self::R8 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug)]
pub struct TextureUpload<'a> {
    pub target: TextureTarget,
    pub format: TextureFormat,
    pub filter: TextureFilter,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexGenCoord {
    S,
    T,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightParams {
    pub ambient: f32,
    pub diffuse: f32,
    /// Directional light, `w` is always zero.
    pub position: Vec4,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogParams {
    pub color: Vec3,
    pub start: f32,
    pub end: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, From)]
pub enum UniformValue {
    Int(i32),
    Bool(bool),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

/// The fixed function state of a device at the time of a draw call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineState {
    pub projection: Mat4,
    pub modelview: Mat4,
    pub light: Option<LightParams>,
    pub fog: Option<FogParams>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            modelview: Mat4::IDENTITY,
            light: None,
            fog: None,
        }
    }
}

impl PipelineState {
    /// Transforms normals into eye space.
    pub fn normal_matrix(&self) -> Mat3 {
        let linear = Mat3::from_mat4(self.modelview);
        if linear.determinant().abs() <= f32::EPSILON {
            return Mat3::IDENTITY;
        }
        linear.inverse().transpose()
    }

    /// The uniforms a device sets on every program declaring them, before drawing with it.
    /// The light direction is given in eye space.
    pub fn uniforms(&self) -> [(&'static str, UniformValue); 9] {
        let light = self.light.unwrap_or(LightParams {
            ambient: 1.0,
            diffuse: 0.0,
            position: Vec4::Z,
        });
        let fog = self.fog.unwrap_or(FogParams {
            color: Vec3::ONE,
            start: 0.0,
            end: 1.0,
        });

        [
            ("projectionMatrix", self.projection.into()),
            ("modelViewMatrix", self.modelview.into()),
            ("normalMatrix", self.normal_matrix().into()),
            (
                "lightDirection",
                light.position.truncate().normalize_or(Vec3::Z).into(),
            ),
            ("lightAmbient", light.ambient.into()),
            ("lightDiffuse", light.diffuse.into()),
            ("fogColor", fog.color.into()),
            ("fogStart", fog.start.into()),
            ("fogEnd", fog.end.into()),
        ]
    }

    /// The brightness of a surface with the given object space normal under the light.
    pub fn shade(&self, normal: Vec3) -> f32 {
        let Some(light) = self.light else {
            return 1.0;
        };
        let normal = (self.normal_matrix() * normal).normalize_or_zero();
        let direction = light.position.truncate().normalize_or(Vec3::Z);

        (light.ambient + light.diffuse * normal.dot(direction).max(0.0)).clamp(0.0, 1.0)
    }
}

/// An error flagged by the driver, as returned by `glGetError`.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[error("OpenGL error {code:#06x}: {}", self.description())]
pub struct GlError {
    pub code: u32,
}

impl GlError {
    pub const INVALID_ENUM: Self = Self { code: 0x0500 };
    pub const INVALID_VALUE: Self = Self { code: 0x0501 };
    pub const INVALID_OPERATION: Self = Self { code: 0x0502 };
    pub const STACK_OVERFLOW: Self = Self { code: 0x0503 };
    pub const STACK_UNDERFLOW: Self = Self { code: 0x0504 };
    pub const OUT_OF_MEMORY: Self = Self { code: 0x0505 };
    pub const INVALID_FRAMEBUFFER_OPERATION: Self = Self { code: 0x0506 };

    pub fn description(&self) -> &'static str {
        match self.code {
            0x0500 => "invalid enumerant",
            0x0501 => "invalid value",
            0x0502 => "invalid operation",
            0x0503 => "stack overflow",
            0x0504 => "stack underflow",
            0x0505 => "out of memory",
            0x0506 => "invalid framebuffer operation",
            _ => "unknown error",
        }
    }
}

/// The OpenGL operations used by the renderer.
///
/// Calls do not fail individually, like their OpenGL counterparts.
/// Errors accumulate in the context and are collected with [`Gl::get_error`].
pub trait Gl {
    fn get_string(&self, name: StringName) -> Option<String>;
    fn get_integer(&self, name: IntegerName) -> i32;
    fn get_error(&mut self) -> Option<GlError>;

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);
    fn clear_color(&mut self, color: Vec4);
    fn clear(&mut self);
    fn enable(&mut self, capability: Capability);
    fn disable(&mut self, capability: Capability);
    fn flush(&mut self);
    /// Reads back the color buffer of the given region as RGBA rows, bottom row first.
    fn read_pixels(&mut self, viewport: Viewport) -> Vec<u8>;

    fn load_projection(&mut self, matrix: Mat4);
    fn load_modelview(&mut self, matrix: Mat4);
    /// Sets light zero, `None` disables lighting.
    fn set_light(&mut self, light: Option<LightParams>);
    fn set_fog(&mut self, fog: Option<FogParams>);
    fn tex_gen_object_plane(&mut self, coord: TexGenCoord, plane: Vec4);

    fn create_list(&mut self) -> ListId;
    fn begin_list(&mut self, list: ListId);
    fn end_list(&mut self);
    fn call_list(&mut self, list: ListId);
    fn delete_list(&mut self, list: ListId);
    fn begin(&mut self, primitive: Primitive);
    fn end(&mut self);
    fn normal(&mut self, normal: Vec3);
    fn tex_coord_1d(&mut self, s: f32);
    fn tex_coord_2d(&mut self, st: Vec2);
    fn vertex(&mut self, position: Vec3);

    fn create_buffer(&mut self) -> BufferId;
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>);
    /// Uploads `data` into the buffer currently bound to `target`.
    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferId);
    fn enable_client_state(&mut self, state: ClientState);
    fn disable_client_state(&mut self, state: ClientState);
    /// Points a fixed function array at the buffer currently bound to the array target.
    fn client_pointer(&mut self, state: ClientState, components: u32, kind: ComponentType);
    fn enable_vertex_attrib(&mut self, index: u32);
    fn disable_vertex_attrib(&mut self, index: u32);
    fn vertex_attrib_pointer(&mut self, index: u32, components: u32, kind: ComponentType);
    /// Draws `count` indices of the bound element buffer.
    fn draw_elements(&mut self, primitive: Primitive, count: usize, kind: ComponentType);

    fn create_texture(&mut self) -> TextureId;
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>);
    /// Uploads the image into the texture currently bound to the upload's target.
    fn tex_image(&mut self, upload: &TextureUpload);
    fn delete_texture(&mut self, texture: TextureId);

    fn create_shader(&mut self, stage: ShaderStage) -> ShaderId;
    /// Compiles the shader and returns the info log on failure.
    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> Result<(), String>;
    fn delete_shader(&mut self, shader: ShaderId);
    fn create_program(&mut self) -> ProgramId;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn bind_attrib_location(&mut self, program: ProgramId, index: u32, name: &str);
    /// Links the program and returns the info log on failure.
    fn link_program(&mut self, program: ProgramId) -> Result<(), String>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn delete_program(&mut self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn uniform(&mut self, location: UniformLocation, value: UniformValue);
}

/// Returns the first error flagged by the context, after draining all pending errors.
pub fn check_error(gl: &mut dyn Gl) -> Result<(), GlError> {
    let first = gl.get_error();
    while gl.get_error().is_some() {}
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_error_describes_known_codes() {
        assert_eq!(GlError::OUT_OF_MEMORY.description(), "out of memory");
        assert_eq!(GlError { code: 0x1234 }.description(), "unknown error");
        assert_eq!(
            GlError::INVALID_OPERATION.to_string(),
            "OpenGL error 0x0502: invalid operation"
        );
    }

    #[test]
    fn pipeline_state_uniforms_follow_the_light() {
        let mut state = PipelineState {
            modelview: Mat4::from_scale(Vec3::splat(2.0)),
            ..PipelineState::default()
        };
        assert_eq!(state.shade(Vec3::Z), 1.0);

        state.light = Some(LightParams {
            ambient: 0.4,
            diffuse: 0.6,
            position: Vec4::new(0.0, 0.0, 3.0, 0.0),
        });
        assert!((state.shade(Vec3::Z) - 1.0).abs() < 1e-6);
        assert!((state.shade(Vec3::X) - 0.4).abs() < 1e-6);

        let uniforms = state.uniforms();
        assert!(uniforms.contains(&("lightDirection", UniformValue::Vec3(Vec3::Z))));
        assert!(uniforms.contains(&("lightAmbient", UniformValue::Float(0.4))));
        assert!(uniforms.contains(&(
            "normalMatrix",
            UniformValue::Mat3(Mat3::from_diagonal(Vec3::splat(0.5)))
        )));
    }

    #[test]
    fn degenerate_modelviews_keep_normals() {
        let state = PipelineState {
            modelview: Mat4::from_scale(Vec3::new(1.0, 1.0, 0.0)),
            ..PipelineState::default()
        };
        assert_eq!(state.normal_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn aspect_ratio_tolerates_empty_viewports() {
        assert_eq!(Viewport::new(0, 0, 800, 400).aspect_ratio(), 2.0);
        assert_eq!(Viewport::new(0, 0, 800, 0).aspect_ratio(), 800.0);
    }
}
