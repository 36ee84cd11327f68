//! Grid dispatch coverage through a live pool: every grid point exactly
//! once, regardless of the sharding regime.

use parking_lot::Mutex;
use rstest::rstest;
use std::collections::HashMap;
use std::sync::Arc;
use tgp::builder::{DispatchError, TaskBuilder};
use tgp::pool::ThreadPool;

#[rstest]
#[case::unit(1, 1, 1)]
#[case::row(8, 1, 1)]
#[case::column(1, 9, 1)]
#[case::deep(1, 1, 7)]
#[case::volume(3, 4, 5)]
#[case::plane(16, 16, 1)]
fn dispatch_invokes_once_per_grid_point(#[case] x: u32, #[case] y: u32, #[case] z: u32) {
    let hits = Arc::new(Mutex::new(HashMap::new()));

    // Four shards force both regimes across the cases: grids smaller than
    // the thread count expand point-per-task, larger ones get sharded.
    let mut builder = TaskBuilder::with_thread_count(4);
    {
        let hits = Arc::clone(&hits);
        builder
            .dispatch(x, y, z, move |ix, iy, iz| {
                *hits.lock().entry((ix, iy, iz)).or_insert(0u32) += 1;
            })
            .unwrap();
    }

    let pool = ThreadPool::with_threads(4);
    let _ = pool.push(builder.build()).unwrap().get().unwrap();

    let hits = hits.lock();
    assert_eq!(hits.len(), (x * y * z) as usize);
    for iz in 0..z {
        for iy in 0..y {
            for ix in 0..x {
                assert_eq!(hits.get(&(ix, iy, iz)), Some(&1));
            }
        }
    }
}

#[test]
fn unit_grid_receives_the_origin() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = TaskBuilder::new();
    {
        let seen = Arc::clone(&seen);
        builder
            .dispatch(1, 1, 1, move |ix, iy, iz| seen.lock().push((ix, iy, iz)))
            .unwrap();
    }

    let pool = ThreadPool::with_threads(2);
    let _ = pool.push(builder.build()).unwrap().get().unwrap();

    assert_eq!(*seen.lock(), [(0, 0, 0)]);
}

#[test]
fn zero_extent_is_rejected() {
    let mut builder = TaskBuilder::new();
    assert_eq!(
        builder.dispatch(0, 4, 4, |_, _, _| {}),
        Err(DispatchError::ZeroExtent { x: 0, y: 4, z: 4 })
    );
}
