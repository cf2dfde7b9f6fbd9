//! Scanline free triangle rasterization into a CPU color and depth buffer.

use crate::gl::{Primitive, Viewport};
use bevy::math::{Vec2, Vec3, Vec4};

/// Larger viewports are cut off at this many pixels per side.
pub const MAX_FRAMEBUFFER_SIZE: usize = 8192;

/// Splits the vertices of a primitive into triangles.
pub fn triangles(primitive: Primitive, count: usize) -> impl Iterator<Item = [usize; 3]> {
    let (step, triangles) = match primitive {
        Primitive::TriangleStrip => (1, count.saturating_sub(2)),
        Primitive::Triangles => (3, count / 3),
    };
    (0..triangles).map(move |triangle| {
        let first = triangle * step;
        [first, first + 1, first + 2]
    })
}

/// A color and depth buffer in window coordinates, rows bottom first.
#[derive(Default)]
pub struct Framebuffer {
    width: usize,
    height: usize,
    color: Vec<[u8; 4]>,
    depth: Vec<f32>,
}

impl Framebuffer {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Grows the buffer until it contains the viewport, keeping the existing pixels.
    pub fn cover(&mut self, viewport: Viewport) {
        let extent = |origin: i32, size: i32| {
            ((origin.max(0) + size.max(0)) as usize).min(MAX_FRAMEBUFFER_SIZE)
        };
        let width = extent(viewport.x, viewport.width).max(self.width);
        let height = extent(viewport.y, viewport.height).max(self.height);
        if width == self.width && height == self.height {
            return;
        }

        let mut color = vec![[0; 4]; width * height];
        let mut depth = vec![1.0; width * height];
        for row in 0..self.height {
            let old = row * self.width..(row + 1) * self.width;
            let new = row * width..row * width + self.width;
            color[new.clone()].copy_from_slice(&self.color[old.clone()]);
            depth[new].copy_from_slice(&self.depth[old]);
        }

        *self = Self {
            width,
            height,
            color,
            depth,
        };
    }

    /// Fills the color buffer and resets the depth buffer to the far plane.
    pub fn clear(&mut self, color: [u8; 4]) {
        self.color.fill(color);
        self.depth.fill(1.0);
    }

    /// Reads the viewport as RGBA rows, bottom row first.
    /// Pixels outside of the buffer are black.
    pub fn read(&self, viewport: Viewport) -> Vec<u8> {
        let (width, height) = (viewport.width.max(0), viewport.height.max(0));
        let mut pixels = Vec::with_capacity((width * height) as usize * 4);

        for y in viewport.y..viewport.y + height {
            for x in viewport.x..viewport.x + width {
                pixels.extend(self.pixel(x, y).unwrap_or([0; 4]));
            }
        }
        pixels
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        self.index(x, y).map(|index| self.color[index])
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let (x, y) = (usize::try_from(x).ok()?, usize::try_from(y).ok()?);
        (x < self.width && y < self.height).then_some(y * self.width + x)
    }

    /// Fills the pixels whose centers lie inside the triangle.
    ///
    /// Triangles with a vertex behind the eye are skipped instead of clipped,
    /// and fragments outside of the depth range are discarded.
    pub fn fill_triangle(
        &mut self,
        clip: [Vec4; 3],
        viewport: Viewport,
        color: [u8; 4],
        depth_test: bool,
    ) {
        if clip.iter().any(|vertex| vertex.w <= 0.0) {
            return;
        }

        let window = clip.map(|vertex| {
            let ndc = vertex.truncate() / vertex.w;
            Vec3::new(
                viewport.x as f32 + (ndc.x + 1.0) * 0.5 * viewport.width as f32,
                viewport.y as f32 + (ndc.y + 1.0) * 0.5 * viewport.height as f32,
                (ndc.z + 1.0) * 0.5,
            )
        });
        let [a, b, c] = window.map(|vertex| vertex.truncate());
        let area = edge(a, b, c);
        if area.abs() <= f32::EPSILON {
            return;
        }

        let min = a.min(b).min(c).floor();
        let max = a.max(b).max(c).ceil();
        let x_range = min.x.max(viewport.x.max(0) as f32) as i32
            ..(max.x as i32).min(viewport.x + viewport.width).min(self.width as i32);
        let y_range = min.y.max(viewport.y.max(0) as f32) as i32
            ..(max.y as i32).min(viewport.y + viewport.height).min(self.height as i32);

        for y in y_range {
            for x in x_range.clone() {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let weights = Vec3::new(edge(b, c, center), edge(c, a, center), edge(a, b, center))
                    / area;
                if weights.min_element() < 0.0 {
                    continue;
                }

                let depth = weights.dot(Vec3::new(window[0].z, window[1].z, window[2].z));
                if !(0.0..=1.0).contains(&depth) {
                    continue;
                }
                let Some(index) = self.index(x, y) else {
                    continue;
                };
                if depth_test {
                    if depth >= self.depth[index] {
                        continue;
                    }
                    self.depth[index] = depth;
                }
                self.color[index] = color;
            }
        }
    }
}

/// Twice the signed area of the triangle `a`, `b`, `p`.
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}
