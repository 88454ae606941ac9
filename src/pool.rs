use std::any::Any;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use tracing::{error, trace};

use crate::engine::step_region;
use crate::error::GolError;
use crate::grid::{Cell, World};

/// Split `0..height` into `threads` contiguous bands.
///
/// Band `i` starts at `height * i / threads`; the last band always ends at
/// `height`, so every row is covered exactly once. Bands may be empty when
/// `threads > height`.
pub fn band_bounds(height: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.max(1);
    (0..threads)
        .map(|i| {
            let start = height * i / threads;
            let end = if i + 1 == threads { height } else { height * (i + 1) / threads };
            start..end
        })
        .collect()
}

/// Fixed-size pool computing one turn as parallel row bands.
///
/// The rayon pool is built once and reused for every turn. With a single
/// thread no pool exists and the whole grid is stepped inline.
pub struct WorkerPool {
    threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, GolError> {
        if threads == 0 {
            return Err(GolError::InvalidParams("threads must be positive".into()));
        }
        let pool = if threads == 1 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("gol-band-{i}"))
                    .build()?,
            )
        };
        Ok(Self { threads, pool })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Compute the next state of the whole of `world`.
    ///
    /// The result does not depend on the thread count. If any band fails
    /// the partial results are dropped and the fault is returned.
    pub fn compute_next_state(&self, world: &World) -> Result<(World, Vec<Cell>), GolError> {
        self.dispatch(world, step_region)
    }

    pub(crate) fn dispatch<K>(&self, world: &World, kernel: K) -> Result<(World, Vec<Cell>), GolError>
    where
        K: Fn(&World, Range<usize>, Range<usize>) -> (World, Vec<Cell>) + Sync,
    {
        let Some(pool) = &self.pool else {
            return run_band(&kernel, world, 0, 0..world.h);
        };

        let bands = band_bounds(world.h, self.threads);
        let parts: Vec<(World, Vec<Cell>)> = pool.install(|| {
            bands
                .into_par_iter()
                .enumerate()
                .with_max_len(1)
                .map(|(i, rows)| run_band(&kernel, world, i, rows))
                .collect::<Result<Vec<_>, GolError>>()
        })?;

        let mut next = World {
            data: Vec::with_capacity(world.data.len()),
            w: world.w,
            h: 0,
        };
        let mut flipped = Vec::new();
        for (part, cells) in parts {
            next.data.extend_from_slice(&part.data);
            next.h += part.h;
            flipped.extend(cells);
        }
        debug_assert_eq!(next.h, world.h);
        Ok((next, flipped))
    }
}

fn run_band<K>(kernel: &K, world: &World, band: usize, rows: Range<usize>) -> Result<(World, Vec<Cell>), GolError>
where
    K: Fn(&World, Range<usize>, Range<usize>) -> (World, Vec<Cell>) + Sync,
{
    trace!(band, start = rows.start, end = rows.end, "band.start");
    catch_unwind(AssertUnwindSafe(|| kernel(world, rows, 0..world.w))).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(band, %message, "band.failed");
        GolError::WorkerFault { band, message }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn bands_cover_every_row_once() {
        for height in [1usize, 7, 16, 100, 513] {
            for threads in 1..=12 {
                let bands = band_bounds(height, threads);
                assert_eq!(bands.len(), threads);
                assert_eq!(bands[0].start, 0);
                assert_eq!(bands.last().unwrap().end, height);
                for pair in bands.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
            }
        }
    }

    #[test]
    fn band_bounds_floor() {
        assert_eq!(band_bounds(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(band_bounds(2, 4), vec![0..0, 0..1, 1..1, 1..2]);
    }

    #[test]
    fn thread_count_does_not_change_result() {
        let world = World::random(37, 29, 0.35, 99);
        let single = WorkerPool::new(1).unwrap();
        let (expected, expected_flipped) = single.compute_next_state(&world).unwrap();
        let expected_flipped: BTreeSet<_> = expected_flipped.into_iter().collect();

        for threads in [2, 3, 4, 8, 16, 40] {
            let pool = WorkerPool::new(threads).unwrap();
            let (next, flipped) = pool.compute_next_state(&world).unwrap();
            assert_eq!(next, expected, "threads={threads}");
            let flipped: BTreeSet<_> = flipped.into_iter().collect();
            assert_eq!(flipped, expected_flipped, "threads={threads}");
        }
    }

    #[test]
    fn pool_is_reused_across_turns() {
        let pool = WorkerPool::new(4).unwrap();
        let single = WorkerPool::new(1).unwrap();
        let mut a = World::random(24, 24, 0.4, 5);
        let mut b = a.clone();
        for _ in 0..10 {
            a = pool.compute_next_state(&a).unwrap().0;
            b = single.compute_next_state(&b).unwrap().0;
        }
        assert_eq!(a, b);
    }

    #[test]
    fn band_panic_becomes_worker_fault() {
        let pool = WorkerPool::new(4).unwrap();
        let world = World::random(16, 16, 0.5, 1);
        let err = pool
            .dispatch(&world, |w, rows, cols| {
                if rows.start == 8 {
                    panic!("band blew up");
                }
                step_region(w, rows, cols)
            })
            .unwrap_err();
        assert_eq!(
            err,
            GolError::WorkerFault {
                band: 2,
                message: "band blew up".into()
            }
        );
    }

    #[test]
    fn zero_threads_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(GolError::InvalidParams(_))));
    }
}
