//! Voxel hashed nearest neighbour search

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use nalgebra::Point3;

use crate::map::{voxel_index, VoxelIndex};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Spatial hash over a borrowed set of points for bounded radius nearest neighbour queries.
///
/// Queries scan the cells overlapping the search radius in a fixed order and keep the first
/// closest point, so results are deterministic for a given point order.
pub struct NeighbourGrid<'a> {
    points: &'a [Point3<f64>],
    cell_size: f64,
    cells: HashMap<VoxelIndex, Vec<usize>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> NeighbourGrid<'a> {
    /// Build the grid. `cell_size` should be close to the radius queries will use.
    pub fn new(points: &'a [Point3<f64>], cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let mut cells: HashMap<VoxelIndex, Vec<usize>> = HashMap::new();

        for (i, p) in points.iter().enumerate() {
            cells.entry(voxel_index(p, cell_size)).or_default().push(i);
        }

        Self {
            points,
            cell_size,
            cells,
        }
    }

    /// Find the closest point to `query` no further than `radius` away.
    ///
    /// Returns the index of the point and the squared distance to it.
    pub fn nearest_within(&self, query: &Point3<f64>, radius: f64) -> Option<(usize, f64)> {
        if radius < 0.0 || self.points.is_empty() {
            return None;
        }

        let reach = (radius / self.cell_size).ceil() as i64;
        let (cx, cy, cz) = voxel_index(query, self.cell_size);
        let radius_sq = radius * radius;

        let mut best: Option<(usize, f64)> = None;

        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let cell = match self.cells.get(&(cx + dx, cy + dy, cz + dz)) {
                        Some(c) => c,
                        None => continue,
                    };

                    for &i in cell {
                        let d_sq = (self.points[i] - query).norm_squared();
                        if d_sq > radius_sq {
                            continue;
                        }
                        match best {
                            Some((bi, bd)) if d_sq > bd || (d_sq == bd && i > bi) => (),
                            _ => best = Some((i, d_sq)),
                        }
                    }
                }
            }
        }

        best
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn scattered() -> Vec<Point3<f64>> {
        // Deterministic pseudo random points
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 10_000) as f64 / 1000.0 - 5.0
        };

        (0..500).map(|_| Point3::new(next(), next(), next())).collect()
    }

    fn brute_force(points: &[Point3<f64>], q: &Point3<f64>, r: f64) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in points.iter().enumerate() {
            let d = (p - q).norm_squared();
            if d <= r * r && best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((i, d));
            }
        }
        best
    }

    #[test]
    fn test_matches_brute_force() {
        let points = scattered();
        let grid = NeighbourGrid::new(&points, 0.7);

        for q in scattered().iter().map(|p| Point3::new(p.y, p.z, p.x)) {
            for &r in &[0.3, 0.7, 1.9] {
                let fast = grid.nearest_within(&q, r);
                let slow = brute_force(&points, &q, r);
                assert_eq!(fast.map(|f| f.0), slow.map(|s| s.0));
            }
        }
    }

    #[test]
    fn test_radius_bound() {
        let points = vec![Point3::new(1.0, 0.0, 0.0)];
        let grid = NeighbourGrid::new(&points, 0.5);

        assert_eq!(grid.nearest_within(&Point3::origin(), 1.0), Some((0, 1.0)));
        assert_eq!(grid.nearest_within(&Point3::origin(), 0.99), None);
    }
}
