use std::ops::Range;

use crate::grid::{ALIVE, Cell, DEAD, World, wrap};

/// Compute one turn for the sub-region `rows × cols` of `world`.
///
/// `world` is the full current grid: neighbor lookups cross region
/// boundaries and wrap around both edges. Returns the next state of the
/// region as a standalone fragment plus the cells (in absolute
/// coordinates) whose state changed. The input is never modified.
pub fn step_region(world: &World, rows: Range<usize>, cols: Range<usize>) -> (World, Vec<Cell>) {
    let w = world.w;
    let h = world.h;
    let mut data = Vec::with_capacity(rows.len() * cols.len());
    let mut flipped = Vec::new();

    for y in rows.clone() {
        let above = world.row(wrap(y, -1, h));
        let here = world.row(y);
        let below = world.row(wrap(y, 1, h));
        for x in cols.clone() {
            let (l, r) = (wrap(x, -1, w), wrap(x, 1, w));
            let n = [
                above[l], above[x], above[r],
                here[l],            here[r],
                below[l], below[x], below[r],
            ]
            .iter()
            .filter(|&&v| v == ALIVE)
            .count();

            let alive = here[x] == ALIVE;
            let next_alive = rule(alive, n);
            data.push(if next_alive { ALIVE } else { DEAD });
            if next_alive != alive {
                flipped.push(Cell::new(x, y));
            }
        }
    }

    let next = World {
        data,
        w: cols.len(),
        h: rows.len(),
    };
    (next, flipped)
}

/// B3/S23.
#[inline]
fn rule(alive: bool, neighbors: usize) -> bool {
    matches!((alive, neighbors), (true, 2) | (true, 3) | (false, 3))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn full(world: &World) -> (World, Vec<Cell>) {
        step_region(world, 0..world.h, 0..world.w)
    }

    #[test]
    fn rule_table() {
        for n in 0..=8 {
            assert_eq!(rule(true, n), n == 2 || n == 3, "alive with {n}");
            assert_eq!(rule(false, n), n == 3, "dead with {n}");
        }
    }

    #[test]
    fn block_is_still() {
        let world = World::from_cells(
            8,
            8,
            &[Cell::new(3, 3), Cell::new(4, 3), Cell::new(3, 4), Cell::new(4, 4)],
        );
        let (next, flipped) = full(&world);
        assert_eq!(next, world);
        assert!(flipped.is_empty());
    }

    #[test]
    fn blinker_oscillates() {
        let horizontal = World::from_cells(5, 5, &[Cell::new(1, 2), Cell::new(2, 2), Cell::new(3, 2)]);
        let vertical = World::from_cells(5, 5, &[Cell::new(2, 1), Cell::new(2, 2), Cell::new(2, 3)]);
        let (next, flipped) = full(&horizontal);
        assert_eq!(next, vertical);
        let flipped: BTreeSet<_> = flipped.into_iter().collect();
        let expected: BTreeSet<_> =
            [Cell::new(1, 2), Cell::new(3, 2), Cell::new(2, 1), Cell::new(2, 3)].into_iter().collect();
        assert_eq!(flipped, expected);
    }

    #[test]
    fn corner_sees_opposite_corner() {
        // (0,0) is dead with live neighbors only across both wrapped edges.
        let world = World::from_cells(6, 5, &[Cell::new(5, 4), Cell::new(0, 4), Cell::new(5, 0)]);
        let (next, flipped) = full(&world);
        assert!(next.is_alive(Cell::new(0, 0)));
        assert!(flipped.contains(&Cell::new(0, 0)));
    }

    #[test]
    fn lone_corner_cell_dies() {
        let world = World::from_cells(4, 4, &[Cell::new(0, 0)]);
        let (next, flipped) = full(&world);
        assert_eq!(next.alive_count(), 0);
        assert_eq!(flipped, vec![Cell::new(0, 0)]);
    }

    #[test]
    fn region_matches_full_step() {
        let world = World::random(12, 10, 0.4, 3);
        let (whole, _) = full(&world);
        let (part, flipped) = step_region(&world, 3..7, 2..9);
        assert_eq!((part.w, part.h), (7, 4));
        for y in 3..7 {
            for x in 2..9 {
                assert_eq!(part[Cell::new(x - 2, y - 3)], whole[Cell::new(x, y)]);
            }
        }
        assert!(flipped.iter().all(|c| (3..7).contains(&c.y) && (2..9).contains(&c.x)));
        assert!(flipped.iter().all(|&c| world[c] != whole[c]));
    }

    #[test]
    fn input_is_untouched() {
        let world = World::random(9, 9, 0.5, 11);
        let before = world.clone();
        let _ = full(&world);
        assert_eq!(world, before);
    }
}
