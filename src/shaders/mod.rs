//! GLSL sources of the shader strategy and of the fixed function stand-in, embedded into the binary.

pub const TERRAIN_VERTEX_SHADER: &str = include_str!("terrain.vert");
pub const TERRAIN_FRAGMENT_SHADER: &str = include_str!("terrain.frag");

/// The attribute location of the packed grid position.
pub const GRID_POSITION_ATTRIBUTE: (u32, &str) = (0, "gridPosition");

pub const ELEVATION_TEXTURE_UNIT: u32 = 0;
pub const IMAGE_TEXTURE_UNIT: u32 = 1;
pub const HYPSO_TEXTURE_UNIT: u32 = 2;
pub const HYPSO_LOOKUP_TEXTURE_UNIT: u32 = 3;

pub const FIXED_FUNCTION_VERTEX_SHADER: &str = include_str!("fixed_function.vert");
pub const FIXED_FUNCTION_FRAGMENT_SHADER: &str = include_str!("fixed_function.frag");

/// Attribute locations of the program that stands in for the fixed function pipeline.
pub const FIXED_FUNCTION_ATTRIBUTES: [(u32, &str); 3] = [
    (0, "vertexPosition"),
    (1, "vertexNormal"),
    (2, "vertexCoordinate"),
];
