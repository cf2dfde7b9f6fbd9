//! Splits a grid into row ranges that fit into one vertex buffer each.
//!
//! All patches share the same index buffer, a single triangle strip that zig-zags
//! through the rows of the patch.
//! Even rows are traversed from left to right and odd rows from right to left,
//! with one degenerate index at each turn to keep the winding consistent.
//! Neighbouring patches overlap by one row, so that no seam is visible.

use crate::error::{ReliefError, ReliefResult};
use bevy::prelude::*;

/// The approximate size of the vertex buffer of one patch in bytes.
pub const VERTEX_BUFFER_BUDGET: usize = 5 * 1024 * 1024;

/// A contiguous range of grid rows stored in one set of buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Patch {
    pub index: usize,
    pub first_row: usize,
    pub row_count: usize,
}

impl Patch {
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.first_row..self.first_row + self.row_count
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchLayout {
    rows: usize,
    cols: usize,
    patch_height: usize,
}

impl PatchLayout {
    /// Sizes the patches so that the vertices of one patch fill about `budget` bytes.
    /// The patch height is limited by `max_patch_height` and by the grid itself.
    pub fn new(
        rows: usize,
        cols: usize,
        budget: usize,
        bytes_per_vertex: usize,
        max_patch_height: Option<usize>,
    ) -> ReliefResult<Self> {
        let mut patch_height = budget / bytes_per_vertex / cols.max(1);
        if let Some(max) = max_patch_height {
            patch_height = patch_height.min(max);
        }

        if patch_height < 2 {
            return Err(ReliefError::GridTooWide { cols, budget });
        }

        let layout = Self::with_patch_height(rows, cols, patch_height)?;
        debug!(
            "Tiled a {rows}x{cols} grid into {} patches of {} rows.",
            layout.patch_count(),
            layout.patch_height
        );
        Ok(layout)
    }

    pub fn with_patch_height(rows: usize, cols: usize, patch_height: usize) -> ReliefResult<Self> {
        if rows < 2 || cols < 2 {
            return Err(ReliefError::GridTooSmall { rows, cols });
        }
        if patch_height < 2 {
            return Err(ReliefError::GridTooWide {
                cols,
                budget: patch_height * cols,
            });
        }

        Ok(Self {
            rows,
            cols,
            patch_height: patch_height.min(rows),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The number of rows of all but the last patch.
    pub fn patch_height(&self) -> usize {
        self.patch_height
    }

    pub fn patch_count(&self) -> usize {
        (self.rows - 1).div_ceil(self.patch_height - 1)
    }

    /// The number of patches with the full patch height.
    pub fn unbroken_patch_count(&self) -> usize {
        (self.rows - 1) / (self.patch_height - 1)
    }

    pub fn has_broken_patch(&self) -> bool {
        self.unbroken_patch_count() != self.patch_count()
    }

    pub fn last_patch_height(&self) -> usize {
        if self.has_broken_patch() {
            self.rows - self.unbroken_patch_count() * (self.patch_height - 1)
        } else {
            self.patch_height
        }
    }

    /// The length of the shared index buffer.
    pub fn index_count(&self) -> usize {
        index_count(self.cols, self.patch_height)
    }

    /// The number of indices to draw for the last patch.
    pub fn last_index_count(&self) -> usize {
        index_count(self.cols, self.last_patch_height())
    }

    pub fn patch(&self, index: usize) -> Patch {
        let first_row = index * (self.patch_height - 1);
        let row_count = if index + 1 == self.patch_count() {
            self.rows - first_row
        } else {
            self.patch_height
        };

        Patch {
            index,
            first_row,
            row_count,
        }
    }

    pub fn patches(&self) -> impl Iterator<Item = Patch> + '_ {
        (0..self.patch_count()).map(|index| self.patch(index))
    }

    pub fn index_count_of(&self, patch: &Patch) -> usize {
        index_count(self.cols, patch.row_count)
    }
}

/// The number of indices of a strip through `rows` rows of `cols` vertices.
pub fn index_count(cols: usize, rows: usize) -> usize {
    cols * 2 * (rows - 1) + rows - 2
}

/// Builds the zig-zag triangle strip through a patch of `patch_height` rows.
///
/// Drawing only a prefix of [`index_count`]`(cols, h)` indices yields the strip of the first `h` rows.
pub fn strip_indices(cols: usize, patch_height: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity(index_count(cols, patch_height));
    let index = |row: usize, col: usize| (row * cols + col) as u32;

    for y in (0..patch_height - 1).step_by(2) {
        for x in 0..cols {
            indices.push(index(y, x));
            indices.push(index(y + 1, x));
        }

        if y + 1 >= patch_height - 1 {
            break;
        }

        indices.push(index(y + 1, cols - 1));

        for x in (0..cols).rev() {
            indices.push(index(y + 1, x));
            indices.push(index(y + 2, x));
        }

        if y + 2 < patch_height - 1 {
            indices.push(index(y + 2, 0));
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_count_and_overlap_cover_the_grid() {
        for rows in 2..60 {
            for patch_height in 2..20 {
                let layout = PatchLayout::with_patch_height(rows, 3, patch_height).unwrap();
                let patch_height = layout.patch_height();

                assert_eq!(
                    layout.patch_count(),
                    (rows - 1).div_ceil(patch_height - 1),
                    "rows {rows}, patch height {patch_height}"
                );

                let spans: usize = layout.patches().map(|patch| patch.row_count).sum();
                assert_eq!(spans - (layout.patch_count() - 1), rows);

                let last = layout.patches().last().unwrap();
                assert_eq!(last.rows().end, rows);
                assert_eq!(last.row_count, layout.last_patch_height());
                assert!(layout.patches().all(|patch| patch.row_count >= 2));
            }
        }
    }

    #[test]
    fn broken_patch_uses_a_shorter_draw() {
        let layout = PatchLayout::with_patch_height(12, 7, 5).unwrap();

        assert_eq!(layout.patch_count(), 3);
        assert_eq!(layout.unbroken_patch_count(), 2);
        assert!(layout.has_broken_patch());
        assert_eq!(layout.last_patch_height(), 4);
        assert_eq!(layout.last_index_count(), 7 * 2 * 3 + 2);
        assert_eq!(layout.index_count(), 7 * 2 * 4 + 3);
    }

    #[test]
    fn budget_limits_the_patch_height() {
        let layout = PatchLayout::new(10_000, 1000, VERTEX_BUFFER_BUDGET, 12, None).unwrap();
        assert_eq!(layout.patch_height(), VERTEX_BUFFER_BUDGET / 12 / 1000);

        let layout = PatchLayout::new(100, 100, VERTEX_BUFFER_BUDGET, 12, None).unwrap();
        assert_eq!(layout.patch_height(), 100);
        assert_eq!(layout.patch_count(), 1);

        let layout = PatchLayout::new(100, 100, VERTEX_BUFFER_BUDGET, 4, Some(16)).unwrap();
        assert_eq!(layout.patch_height(), 16);

        assert_eq!(
            PatchLayout::new(10, 1_000_000, VERTEX_BUFFER_BUDGET, 12, None),
            Err(ReliefError::GridTooWide {
                cols: 1_000_000,
                budget: VERTEX_BUFFER_BUDGET
            })
        );
    }

    #[test]
    fn strip_has_the_predicted_length() {
        for cols in 2..6 {
            for patch_height in 2..9 {
                let indices = strip_indices(cols, patch_height);
                assert_eq!(indices.len(), index_count(cols, patch_height));
                assert!(indices
                    .iter()
                    .all(|&index| (index as usize) < cols * patch_height));
            }
        }
    }

    #[test]
    fn strip_zig_zags_with_degenerate_turns() {
        let indices = strip_indices(3, 4);

        #[rustfmt::skip]
        assert_eq!(
            indices,
            vec![
                0, 3, 1, 4, 2, 5,
                5,
                5, 8, 4, 7, 3, 6,
                6,
                6, 9, 7, 10, 8, 11,
            ]
        );
    }

    #[test]
    fn strip_prefix_covers_shorter_patches() {
        let full = strip_indices(4, 9);

        for rows in 2..9 {
            let prefix = &full[..index_count(4, rows)];
            assert_eq!(prefix, strip_indices(4, rows).as_slice());
            assert!(prefix.iter().all(|&index| (index as usize) < 4 * rows));
        }
    }
}
