use std::ops::{Index, IndexMut};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::rng::cell_unit;

/// Byte value of a live cell. Matches the white pixel of a PGM image.
pub const ALIVE: u8 = 255;
/// Byte value of a dead cell.
pub const DEAD: u8 = 0;

/// A cell coordinate. `x` is the column, `y` the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Row-major flat grid, indexed by [`Cell`].
/// Topology is toroidal on both axes (see [`wrap`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid<T> {
    pub data: Vec<T>,
    pub w: usize,
    pub h: usize,
}

impl<T: Clone> Grid<T> {
    pub fn filled(w: usize, h: usize, fill: T) -> Self {
        Self {
            data: vec![fill; w * h],
            w,
            h,
        }
    }
}

impl<T> Grid<T> {
    #[inline]
    fn offset(&self, c: Cell) -> usize {
        debug_assert!(c.x < self.w && c.y < self.h, "{c:?} outside {}x{}", self.w, self.h);
        c.y * self.w + c.x
    }

    /// Row `y` as a slice of `w` cells.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.w..(y + 1) * self.w]
    }
}

impl<T> Index<Cell> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, c: Cell) -> &T {
        &self.data[self.offset(c)]
    }
}

impl<T> IndexMut<Cell> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, c: Cell) -> &mut T {
        let i = self.offset(c);
        &mut self.data[i]
    }
}

/// Toroidal wrap of `v + delta` into `0..n`.
#[inline]
pub fn wrap(v: usize, delta: isize, n: usize) -> usize {
    ((v as isize + delta).rem_euclid(n as isize)) as usize
}

/// The simulation world: one byte per cell, `ALIVE` or `DEAD`.
pub type World = Grid<u8>;

impl Grid<u8> {
    /// An all-dead world.
    pub fn new(w: usize, h: usize) -> Self {
        Self::filled(w, h, DEAD)
    }

    /// A dead world with the given cells set alive. Cells outside the grid wrap.
    pub fn from_cells(w: usize, h: usize, cells: &[Cell]) -> Self {
        let mut world = Self::new(w, h);
        for c in cells {
            world[Cell::new(c.x % w, c.y % h)] = ALIVE;
        }
        world
    }

    /// Random soup with roughly `density` of the cells alive. Each cell is
    /// drawn independently from `seed`, so rows are filled in parallel.
    pub fn random(w: usize, h: usize, density: f32, seed: u64) -> Self {
        let data = (0..w * h)
            .into_par_iter()
            .map(|i| if cell_unit(seed, i as u64) < density { ALIVE } else { DEAD })
            .collect();
        Self { data, w, h }
    }

    #[inline]
    pub fn is_alive(&self, c: Cell) -> bool {
        self[c] == ALIVE
    }

    /// Live cells in row-major order.
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.data
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v == ALIVE)
            .map(|(i, _)| Cell::new(i % self.w, i / self.w))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == ALIVE).count()
    }
}
