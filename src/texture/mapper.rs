use crate::{
    error::{ReliefError, ReliefResult},
    grid::HeightGrid,
};
use itertools::Itertools;
use ndarray::Array2;
use std::sync::Arc;

/// Normalizes values of `[min, max]` to `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeightSpan {
    pub min: f32,
    pub max: f32,
}

impl HeightSpan {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    fn of(values: &Array2<f32>) -> Self {
        values
            .iter()
            .filter(|v| !v.is_nan())
            .minmax()
            .into_option()
            .map_or(Self::default(), |(min, max)| Self::new(*min, *max))
    }

    /// Clamped to `[0, 1]`, void values map to 0.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        let range = self.max - self.min;
        if value.is_nan() || range <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / range).clamp(0.0, 1.0)
    }
}

/// Maps the elevation of a grid vertex to the coordinate of a 1D texture (color ramp).
///
/// The linear mapper is a plain normalization of the terrain elevation and can be
/// generated on the GPU.
/// The non-linear mapper reads its values from a separate grid of the same size,
/// e.g. percentile ranks or a smoothed surface, which have to be stored per vertex.
#[derive(Clone, Debug)]
pub enum HeightMapper {
    Linear(HeightSpan),
    NonLinear {
        values: Arc<Array2<f32>>,
        span: HeightSpan,
    },
}

impl Default for HeightMapper {
    fn default() -> Self {
        Self::Linear(HeightSpan::default())
    }
}

impl HeightMapper {
    pub fn linear() -> Self {
        Self::default()
    }

    pub fn non_linear(values: Array2<f32>) -> Self {
        let span = HeightSpan::of(&values);
        Self::NonLinear {
            values: Arc::new(values),
            span,
        }
    }

    /// Maps each cell to the percentile rank of its elevation among all valid cells,
    /// which spreads the colors of a ramp evenly over the terrain.
    pub fn equalized(grid: &HeightGrid) -> Self {
        let sorted = grid
            .values()
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .sorted_by(f32::total_cmp)
            .collect_vec();
        let last = sorted.len().saturating_sub(1).max(1) as f32;

        let ranks = grid.values().mapv(|value| {
            if value.is_nan() {
                return f32::NAN;
            }
            let below = sorted.partition_point(|v| *v < value);
            below as f32 / last
        });

        Self::NonLinear {
            values: Arc::new(ranks),
            span: HeightSpan::new(0.0, 1.0),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear(_))
    }

    /// Adapts the mapper to a new terrain.
    pub fn init(&mut self, grid: &HeightGrid) -> ReliefResult<()> {
        match self {
            Self::Linear(span) => *span = HeightSpan::new(grid.min_value(), grid.max_value()),
            Self::NonLinear { values, .. } => {
                if values.dim() != grid.values().dim() {
                    return Err(ReliefError::MapperSizeMismatch {
                        rows: grid.rows(),
                        cols: grid.cols(),
                        mapper_rows: values.nrows(),
                        mapper_cols: values.ncols(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The 1D texture coordinate in `[0, 1]` of a grid vertex.
    #[inline]
    pub fn texture_coordinate(&self, grid: &HeightGrid, row: usize, col: usize) -> f32 {
        match self {
            Self::Linear(span) => span.normalize(grid.get(row, col)),
            Self::NonLinear { values, span } => values
                .get((row, col))
                .map_or(0.0, |value| span.normalize(*value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn linear_mapping_clamps_and_zeroes_void() {
        let grid = HeightGrid::new(array![[10.0, 20.0], [30.0, f32::NAN]], 1.0).unwrap();
        let mut mapper = HeightMapper::linear();
        mapper.init(&grid).unwrap();

        assert_eq!(mapper.texture_coordinate(&grid, 0, 0), 0.0);
        assert_eq!(mapper.texture_coordinate(&grid, 0, 1), 0.5);
        assert_eq!(mapper.texture_coordinate(&grid, 1, 0), 1.0);
        assert_eq!(mapper.texture_coordinate(&grid, 1, 1), 0.0);
        assert!(mapper.is_linear());
    }

    #[test]
    fn flat_grids_map_to_zero() {
        let grid = HeightGrid::flat(3, 3, 4.0, 1.0).unwrap();
        let mut mapper = HeightMapper::linear();
        mapper.init(&grid).unwrap();

        assert_eq!(mapper.texture_coordinate(&grid, 1, 1), 0.0);
    }

    #[test]
    fn non_linear_mapping_uses_its_own_grid() {
        let grid = HeightGrid::new(array![[0.0, 1.0], [2.0, 3.0]], 1.0).unwrap();
        let mut mapper = HeightMapper::non_linear(array![[100.0, 0.0], [50.0, 100.0]]);
        mapper.init(&grid).unwrap();

        assert!(!mapper.is_linear());
        assert_eq!(mapper.texture_coordinate(&grid, 0, 0), 1.0);
        assert_eq!(mapper.texture_coordinate(&grid, 0, 1), 0.0);
        assert_eq!(mapper.texture_coordinate(&grid, 1, 0), 0.5);
    }

    #[test]
    fn non_linear_grid_must_match_the_terrain() {
        let grid = HeightGrid::flat(3, 4, 0.0, 1.0).unwrap();
        let mut mapper = HeightMapper::non_linear(Array2::zeros((4, 3)));

        assert_eq!(
            mapper.init(&grid),
            Err(ReliefError::MapperSizeMismatch {
                rows: 3,
                cols: 4,
                mapper_rows: 4,
                mapper_cols: 3,
            })
        );
    }

    #[test]
    fn equalized_mapping_is_monotone_in_elevation() {
        let grid = HeightGrid::new(
            array![[0.0, 1.0, 1000.0], [2.0, f32::NAN, 3.0], [1.0, 500.0, 4.0]],
            1.0,
        )
        .unwrap();
        let mapper = HeightMapper::equalized(&grid);

        let coordinate = |row, col| mapper.texture_coordinate(&grid, row, col);
        assert_eq!(coordinate(0, 0), 0.0);
        assert_eq!(coordinate(0, 2), 1.0);
        assert_eq!(coordinate(1, 1), 0.0);
        assert_eq!(coordinate(0, 1), coordinate(2, 0));
        assert!(coordinate(1, 0) < coordinate(1, 2));
        assert!(coordinate(2, 2) < coordinate(2, 1));
    }
}
