use crate::error::{ReliefError, ReliefResult};
use itertools::{Itertools, MinMaxResult};
use ndarray::Array2;
use std::sync::Arc;

/// A regular grid of elevations, with `NaN` marking void cells.
///
/// The grid is shared, so that it can be handed to the render thread and to the
/// strategies without copying. It is never mutated once created, a new grid replaces it.
///
/// Rows run from north to south and columns from west to east.
/// The model is normalized into a unit box, where the longer side of the grid has length 1.
#[derive(Clone, Debug)]
pub struct HeightGrid {
    values: Arc<Array2<f32>>,
    cell_size: f32,
    min_value: f32,
    max_value: f32,
}

impl HeightGrid {
    pub fn new(values: Array2<f32>, cell_size: f32) -> ReliefResult<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ReliefError::InvalidCellSize(cell_size));
        }

        let (min_value, max_value) = match values.iter().filter(|v| !v.is_nan()).minmax() {
            MinMaxResult::NoElements => (0.0, 0.0),
            MinMaxResult::OneElement(v) => (*v, *v),
            MinMaxResult::MinMax(min, max) => (*min, *max),
        };

        Ok(Self {
            values: Arc::new(values),
            cell_size,
            min_value,
            max_value,
        })
    }

    pub fn from_rows(rows: &[Vec<f32>], cell_size: f32) -> ReliefResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(ReliefError::RaggedGrid);
        }

        let values = Array2::from_shape_vec((rows.len(), cols), rows.concat())
            .map_err(|_| ReliefError::RaggedGrid)?;

        Self::new(values, cell_size)
    }

    /// A grid filled with a single elevation.
    pub fn flat(rows: usize, cols: usize, elevation: f32, cell_size: f32) -> ReliefResult<Self> {
        Self::new(Array2::from_elem((rows, cols), elevation), cell_size)
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// The lowest elevation, ignoring void cells. Zero for a grid without any valid cell.
    pub fn min_value(&self) -> f32 {
        self.min_value
    }

    pub fn max_value(&self) -> f32 {
        self.max_value
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[(row, col)]
    }

    pub fn has_void(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Grids need at least two rows and two columns to form a surface.
    pub fn check_displayable(&self) -> ReliefResult<()> {
        if self.rows() < 2 || self.cols() < 2 {
            return Err(ReliefError::GridTooSmall {
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(())
    }

    /// The distance between two neighbouring vertices in the unit box.
    pub fn unit_scale(&self) -> f32 {
        1.0 / (self.rows().max(self.cols()).max(2) - 1) as f32
    }

    /// The elevation of a cell above the minimum, in cells.
    #[inline]
    pub fn relative_elevation(&self, row: usize, col: usize) -> f32 {
        (self.get(row, col) - self.min_value) / self.cell_size
    }

    /// Width of the model in the unit box.
    pub fn normalized_width(&self) -> f32 {
        (self.cols() as f32 / self.rows() as f32).min(1.0)
    }

    /// Height of the model in the unit box.
    pub fn normalized_height(&self) -> f32 {
        (self.rows() as f32 / self.cols() as f32).min(1.0)
    }

    pub fn normalized_minimum_value(&self) -> f32 {
        self.min_value / self.cell_size * self.unit_scale()
    }

    /// The elevation the perspective cameras orbit around.
    pub fn center_elevation(&self) -> f32 {
        0.3 * self.max_value / ((self.cols() - 1).max(1) as f32 * self.cell_size)
    }

    /// The elevation of a cell in the unit box, zero outside of the grid.
    pub fn z(&self, row: isize, col: isize) -> f32 {
        if row < 0 || col < 0 || row as usize >= self.rows() || col as usize >= self.cols() {
            return 0.0;
        }
        self.get(row as usize, col as usize) * self.unit_scale() / self.cell_size
    }

    /// The elevation of the cell nearest to a position in the unit box.
    pub fn z_at(&self, x: f32, y: f32) -> f32 {
        let longest = (self.rows().max(self.cols()) - 1) as f32;
        self.z((y * longest).round() as isize, (x * longest).round() as isize)
    }

    /// The elevation of the cell nearest to a position in the unit box, in grid units.
    pub fn nearest_neighbor_elevation(&self, x: f32, y: f32) -> Option<f32> {
        let longest = (self.rows().max(self.cols()) - 1) as f32;
        let row = (y * longest).round();
        let col = (x * longest).round();
        if row < 0.0 || col < 0.0 {
            return None;
        }
        self.values.get((row as usize, col as usize)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn min_and_max_ignore_void_cells() {
        let grid = HeightGrid::new(array![[f32::NAN, 2.0], [-1.0, 7.5]], 1.0).unwrap();

        assert_eq!(grid.min_value(), -1.0);
        assert_eq!(grid.max_value(), 7.5);
        assert!(grid.has_void());
    }

    #[test]
    fn flat_grid_has_equal_extremes() {
        let grid = HeightGrid::flat(100, 100, 5.0, 1.0).unwrap();

        assert_eq!(grid.min_value(), 5.0);
        assert_eq!(grid.max_value(), 5.0);
        assert_eq!(grid.relative_elevation(40, 60), 0.0);
    }

    #[test]
    fn all_void_grid_has_zero_extremes() {
        let grid = HeightGrid::flat(3, 3, f32::NAN, 1.0).unwrap();

        assert_eq!(grid.min_value(), 0.0);
        assert_eq!(grid.max_value(), 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            HeightGrid::flat(2, 2, 0.0, 0.0).unwrap_err(),
            ReliefError::InvalidCellSize(0.0)
        );
        assert_eq!(
            HeightGrid::from_rows(&[vec![1.0, 2.0], vec![1.0]], 1.0).unwrap_err(),
            ReliefError::RaggedGrid
        );
        assert_eq!(
            HeightGrid::flat(1, 10, 0.0, 1.0)
                .unwrap()
                .check_displayable()
                .unwrap_err(),
            ReliefError::GridTooSmall { rows: 1, cols: 10 }
        );
    }

    #[test]
    fn longer_side_spans_the_unit_box() {
        let grid = HeightGrid::flat(11, 21, 0.0, 1.0).unwrap();

        assert_eq!(grid.unit_scale(), 0.05);
        assert_eq!(grid.normalized_width(), 1.0);
        assert!((grid.normalized_height() - 11.0 / 21.0).abs() < 1e-6);
    }

    #[test]
    fn unit_elevation_lookup() {
        let grid = HeightGrid::from_rows(&[vec![0.0, 10.0], vec![20.0, 30.0]], 10.0).unwrap();

        assert_eq!(grid.z(1, 1), 3.0);
        assert_eq!(grid.z(-1, 0), 0.0);
        assert_eq!(grid.z(0, 2), 0.0);
        assert_eq!(grid.z_at(0.9, 0.1), 1.0);
        assert_eq!(grid.nearest_neighbor_elevation(1.0, 1.0), Some(30.0));
        assert_eq!(grid.nearest_neighbor_elevation(1.6, 0.0), None);
    }
}
