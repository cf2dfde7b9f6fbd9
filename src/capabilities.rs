use crate::gl::{Gl, IntegerName, StringName};
use anyhow::Result;
use bevy::prelude::*;
use bitflags::bitflags;
use std::fmt::Write;

#[cfg(feature = "glow")]
use crate::gl::GlowGl;

bitflags! {
    /// The optional OpenGL features the terrain strategies depend on.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GlFeatures: u32 {
        const NON_POWER_OF_TWO_TEXTURES = 1 << 0;
        const VERTEX_BUFFER_OBJECTS = 1 << 1;
        const FLOAT_TEXTURES = 1 << 2;
    }
}

impl GlFeatures {
    const EXTENSIONS: [(&'static str, GlFeatures); 3] = [
        (
            "GL_ARB_texture_non_power_of_two",
            GlFeatures::NON_POWER_OF_TWO_TEXTURES,
        ),
        (
            "GL_ARB_vertex_buffer_object",
            GlFeatures::VERTEX_BUFFER_OBJECTS,
        ),
        ("GL_ARB_texture_float", GlFeatures::FLOAT_TEXTURES),
    ];
}

/// An immutable snapshot of what the graphics driver supports.
///
/// Created once by [`GlCapabilities::probe`] and shared by every strategy.
/// All queries are pure, a snapshot of a system without OpenGL answers all of them negatively.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlCapabilities {
    available: bool,
    features: GlFeatures,
    extensions: Vec<String>,
    vendor: String,
    renderer: String,
    version: String,
    shading_language_version: Option<String>,
    max_texture_size: u32,
    max_draw_buffers: u32,
    max_vertex_texture_units: u32,
    max_texture_units: u32,
}

impl GlCapabilities {
    /// Creates a throwaway context, queries it and destroys it again.
    ///
    /// If the context cannot be created, the returned snapshot reports no OpenGL at all.
    pub fn probe<G, F>(create_context: F) -> Self
    where
        G: Gl,
        F: FnOnce() -> Result<G>,
    {
        match create_context() {
            Ok(context) => {
                let capabilities = Self::query(&context);
                drop(context);
                info!("OpenGL capabilities: {}", capabilities.summary());
                capabilities
            }
            Err(error) => {
                warn!("Could not create an OpenGL context, rendering is disabled: {error:#}");
                Self::unavailable()
            }
        }
    }

    /// Like [`GlCapabilities::probe`], for a throwaway context created through [`glow`].
    ///
    /// The context has to be current on this thread when `create_context` returns it.
    #[cfg(feature = "glow")]
    pub fn of_glow_context<F>(create_context: F) -> Self
    where
        F: FnOnce() -> Result<glow::Context>,
    {
        Self::probe(|| create_context().and_then(GlowGl::new))
    }

    /// Reads the capabilities of an existing context.
    pub fn query(gl: &dyn Gl) -> Self {
        let extensions: Vec<String> = gl
            .get_string(StringName::Extensions)
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let features = GlFeatures::EXTENSIONS
            .iter()
            .filter(|(name, _)| extensions.iter().any(|extension| extension == name))
            .fold(GlFeatures::empty(), |features, (_, feature)| {
                features | *feature
            });

        let integer = |name| gl.get_integer(name).max(0) as u32;

        Self {
            available: true,
            features,
            vendor: gl.get_string(StringName::Vendor).unwrap_or_default(),
            renderer: gl.get_string(StringName::Renderer).unwrap_or_default(),
            version: gl.get_string(StringName::Version).unwrap_or_default(),
            shading_language_version: gl.get_string(StringName::ShadingLanguageVersion),
            max_texture_size: integer(IntegerName::MaxTextureSize),
            max_draw_buffers: integer(IntegerName::MaxDrawBuffers),
            max_vertex_texture_units: integer(IntegerName::MaxVertexTextureImageUnits),
            max_texture_units: integer(IntegerName::MaxTextureImageUnits),
            extensions,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn has_opengl(&self) -> bool {
        self.available
    }

    pub fn features(&self) -> GlFeatures {
        self.features
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|extension| extension == name)
    }

    pub fn has_non_power_of_two_textures(&self) -> bool {
        self.features.contains(GlFeatures::NON_POWER_OF_TWO_TEXTURES)
    }

    pub fn has_vertex_buffer_objects(&self) -> bool {
        self.features.contains(GlFeatures::VERTEX_BUFFER_OBJECTS)
    }

    pub fn has_float_textures(&self) -> bool {
        self.features.contains(GlFeatures::FLOAT_TEXTURES)
    }

    /// Parses `major.minor` from the start of the version string.
    pub fn version(&self) -> Option<(u32, u32)> {
        parse_version(&self.version)
    }

    pub fn has_version_at_least(&self, major: u32, minor: u32) -> bool {
        self.version()
            .is_some_and(|version| version >= (major, minor))
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn renderer(&self) -> &str {
        &self.renderer
    }

    pub fn version_string(&self) -> &str {
        &self.version
    }

    pub fn shading_language_version(&self) -> Option<&str> {
        self.shading_language_version.as_deref()
    }

    pub fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    pub fn max_draw_buffers(&self) -> u32 {
        self.max_draw_buffers
    }

    pub fn max_vertex_texture_units(&self) -> u32 {
        self.max_vertex_texture_units
    }

    pub fn max_texture_units(&self) -> u32 {
        self.max_texture_units
    }

    /// Whether an image of this size can be uploaded as a texture.
    /// Without support for non power of two textures both sides must be powers of two.
    pub fn supports_texture_dimensions(&self, width: u32, height: u32) -> bool {
        let fits = width <= self.max_texture_size && height <= self.max_texture_size;
        let pot = self.has_non_power_of_two_textures()
            || (width.is_power_of_two() && height.is_power_of_two());

        self.available && fits && pot
    }

    pub fn summary(&self) -> String {
        if !self.available {
            return "OpenGL not available".into();
        }

        let mut summary = format!("{} {} (OpenGL {}", self.vendor, self.renderer, self.version);
        if let Some(glsl) = &self.shading_language_version {
            let _ = write!(summary, ", GLSL {glsl}");
        }
        let _ = write!(
            summary,
            "), max texture size {}, draw buffers {}, vertex texture units {}, texture units {}, features {:?}",
            self.max_texture_size,
            self.max_draw_buffers,
            self.max_vertex_texture_units,
            self.max_texture_units,
            self.features
        );
        summary
    }
}

/// Extracts `(major, minor)` from an OpenGL version string like `"2.1.0 NVIDIA 470.1"`.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let number = version.split_whitespace().next()?;
    let mut parts = number.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;

    Some((major, minor))
}
