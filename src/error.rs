use crate::{gl::GlError, terrain::ModelKind};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReliefError {
    #[error("grid of {rows}x{cols} cells is too small to display, at least 2x2 cells are required")]
    GridTooSmall { rows: usize, cols: usize },
    #[error("the rows of the grid are not of equal length")]
    RaggedGrid,
    #[error("the cell size must be positive and finite, got {0}")]
    InvalidCellSize(f32),
    #[error("grid has too many columns ({cols}) for a vertex buffer of {budget} bytes")]
    GridTooWide { cols: usize, budget: usize },
    #[error("grid of {rows}x{cols} cells exceeds the maximum texture size of {max}")]
    GridExceedsTextureLimit { rows: usize, cols: usize, max: u32 },
    #[error("texture image of {width}x{height} pixels exceeds the maximum texture size of {max}")]
    ImageTooLarge { width: u32, height: u32, max: u32 },
    #[error("height mapper grid is {mapper_rows}x{mapper_cols}, but the terrain is {rows}x{cols}")]
    MapperSizeMismatch {
        rows: usize,
        cols: usize,
        mapper_rows: usize,
        mapper_cols: usize,
    },
    #[error("no OpenGL context is available on this system")]
    NoOpenGl,
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),
    #[error("shader program linking failed: {0}")]
    ShaderLink(String),
    #[error("no uniform named `{0}` in the shader program, it may be declared but unused")]
    InvalidUniform(String),
    #[error(transparent)]
    Gl(#[from] GlError),
}

impl ReliefError {
    /// The OpenGL error code, if this error was raised by the driver.
    pub fn gl_code(&self) -> Option<u32> {
        match self {
            Self::Gl(error) => Some(error.code),
            _ => None,
        }
    }
}

pub type ReliefResult<T> = Result<T, ReliefError>;

/// Describes a mid-render failure, for the host to display.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderDiagnostic {
    pub strategy: ModelKind,
    pub code: Option<u32>,
    pub message: String,
}

impl RenderDiagnostic {
    pub fn new(strategy: ModelKind, error: &ReliefError) -> Self {
        Self {
            strategy,
            code: error.gl_code(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for RenderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(
                f,
                "{} failed with OpenGL error {code:#06x}: {}",
                self.strategy, self.message
            ),
            None => write!(f, "{} failed: {}", self.strategy, self.message),
        }
    }
}
