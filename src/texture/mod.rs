//! Textures draped over the terrain and the textures the shader strategy stores the grid in.

use crate::{
    capabilities::GlCapabilities,
    error::{ReliefError, ReliefResult},
    gl::{Capability, Gl, TextureFilter, TextureFormat, TextureId, TextureTarget, TextureUpload},
    grid::HeightGrid,
};
use bevy::prelude::*;
use image::RgbaImage;

pub mod mapper;

pub use mapper::{HeightMapper, HeightSpan};

/// Checks an image against the texture size limit of the driver,
/// before anything is handed to the GPU.
pub fn check_image_size(width: u32, height: u32, capabilities: &GlCapabilities) -> ReliefResult<()> {
    let max = capabilities.max_texture_size();
    if width > max || height > max {
        return Err(ReliefError::ImageTooLarge { width, height, max });
    }
    Ok(())
}

/// The image draped over the terrain.
///
/// Images with a single row are 1D color ramps indexed by elevation, taller images are
/// 2D drapes like orthophotos.
/// The image is uploaded lazily by [`Texture::construct`] at the start of the next frame.
/// Clearing or replacing the image only marks the GPU texture for deletion, it is deleted by
/// the next `construct` call, so that a texture is never deleted while it may be bound.
#[derive(Default)]
pub struct Texture {
    image: Option<RgbaImage>,
    texture: Option<TextureId>,
    target: Option<TextureTarget>,
    delete_pending: bool,
}

impl Texture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&mut self, image: RgbaImage) {
        self.target = Some(if image.height() > 1 {
            TextureTarget::Texture2d
        } else {
            TextureTarget::Texture1d
        });
        self.image = Some(image);
        self.delete_pending |= self.texture.is_some();
    }

    pub fn clear(&mut self) {
        self.image = None;
        self.target = None;
        self.delete_pending |= self.texture.is_some();
    }

    pub fn has_texture(&self) -> bool {
        self.image.is_some() || (self.texture.is_some() && !self.delete_pending)
    }

    pub fn is_1d(&self) -> bool {
        self.has_texture() && self.target == Some(TextureTarget::Texture1d)
    }

    pub fn is_2d(&self) -> bool {
        self.has_texture() && self.target == Some(TextureTarget::Texture2d)
    }

    pub fn target(&self) -> Option<TextureTarget> {
        self.target.filter(|_| self.has_texture())
    }

    pub fn id(&self) -> Option<TextureId> {
        self.texture.filter(|_| !self.delete_pending)
    }

    /// Deletes a replaced texture and uploads a pending image.
    /// Returns whether the texture changed, in which case the geometry has to be notified.
    pub fn construct(&mut self, gl: &mut dyn Gl) -> bool {
        let mut changed = false;

        if self.delete_pending {
            if let Some(texture) = self.texture.take() {
                gl.delete_texture(texture);
            }
            self.delete_pending = false;
            changed = true;
        }

        if let (Some(image), Some(target)) = (self.image.take(), self.target) {
            let texture = gl.create_texture();
            gl.bind_texture(target, Some(texture));
            gl.tex_image(&TextureUpload {
                target,
                format: TextureFormat::Rgba8,
                filter: TextureFilter::Linear,
                width: image.width(),
                height: image.height(),
                data: image.as_raw(),
            });
            gl.bind_texture(target, None);
            debug!(
                "Uploaded {}x{} {:?} texture {texture}.",
                image.width(),
                image.height(),
                target
            );

            self.texture = Some(texture);
            changed = true;
        }

        changed
    }

    /// Binds the texture for the fixed function pipeline and enables texturing for its dimension.
    pub fn enable(&self, gl: &mut dyn Gl) {
        gl.disable(Capability::Texture1d);
        gl.disable(Capability::Texture2d);

        if let (Some(texture), Some(target)) = (self.id(), self.target()) {
            gl.active_texture(0);
            gl.bind_texture(target, Some(texture));
            gl.enable(match target {
                TextureTarget::Texture1d => Capability::Texture1d,
                TextureTarget::Texture2d => Capability::Texture2d,
            });
        }
    }

    /// Binds the texture to a unit for sampling in a shader.
    pub fn bind_to_unit(&self, gl: &mut dyn Gl, unit: u32) -> bool {
        let (Some(texture), Some(target)) = (self.id(), self.target()) else {
            return false;
        };
        gl.active_texture(unit);
        gl.bind_texture(target, Some(texture));
        true
    }

    pub fn disable(&self, gl: &mut dyn Gl) {
        if let Some(target) = self.target() {
            gl.bind_texture(target, None);
        }
        gl.disable(Capability::Texture1d);
        gl.disable(Capability::Texture2d);
    }

    /// Deletes the GPU texture immediately, for tearing down the context.
    pub fn release(&mut self, gl: &mut dyn Gl) {
        if let Some(texture) = self.texture.take() {
            gl.delete_texture(texture);
        }
        self.delete_pending = false;
    }
}

/// A texture holding one texel per grid cell, owned by a geometry strategy.
#[derive(Debug)]
pub struct GridTexture {
    id: TextureId,
    width: u32,
    height: u32,
}

impl GridTexture {
    /// Stores the elevations of the grid in cells as a float texture.
    pub fn elevations(gl: &mut dyn Gl, grid: &HeightGrid) -> Self {
        let texels: Vec<f32> = grid
            .values()
            .iter()
            .map(|value| value / grid.cell_size())
            .collect();

        Self::upload(
            gl,
            grid,
            TextureFormat::R32Float,
            bytemuck::cast_slice(&texels),
        )
    }

    /// Stores the 1D texture coordinates of a non-linear height mapper as bytes.
    pub fn lookup(gl: &mut dyn Gl, grid: &HeightGrid, mapper: &HeightMapper) -> Self {
        let texels: Vec<u8> = grid
            .values()
            .indexed_iter()
            .map(|((row, col), _)| {
                (mapper.texture_coordinate(grid, row, col) * 255.0).round() as u8
            })
            .collect();

        Self::upload(gl, grid, TextureFormat::R8, &texels)
    }

    fn upload(gl: &mut dyn Gl, grid: &HeightGrid, format: TextureFormat, data: &[u8]) -> Self {
        let (width, height) = (grid.cols() as u32, grid.rows() as u32);
        let id = gl.create_texture();

        gl.bind_texture(TextureTarget::Texture2d, Some(id));
        gl.tex_image(&TextureUpload {
            target: TextureTarget::Texture2d,
            format,
            filter: TextureFilter::Nearest,
            width,
            height,
            data,
        });
        gl.bind_texture(TextureTarget::Texture2d, None);

        Self { id, width, height }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn bind(&self, gl: &mut dyn Gl, unit: u32) {
        gl.active_texture(unit);
        gl.bind_texture(TextureTarget::Texture2d, Some(self.id));
    }

    pub fn release(self, gl: &mut dyn Gl) {
        gl.delete_texture(self.id);
    }
}
