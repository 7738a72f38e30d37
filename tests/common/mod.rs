use proptest::prelude::*;
use tempfile::tempdir;

use std::path::PathBuf;

pub fn with_tmp_dir<T, F: FnMut(PathBuf) -> T>(mut func: F) -> T {
    let dir = tempdir().unwrap();
    let path = dir.path().to_path_buf();
    func(path)
}

pub fn with_tmp_path<T, F: FnMut(PathBuf) -> T>(mut func: F) -> T {
    with_tmp_dir(|dir| func(dir.join("store.bin")))
}

/// Positive per-axis strides of a C-order view: innermost first, each outer
/// stride a multiple of (extent * inner stride), possibly with extra gaps.
pub fn strided_view_strat() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    proptest::collection::vec((1usize..5, 1usize..4), 1..4).prop_map(|axes| {
        let mut extents = Vec::with_capacity(axes.len());
        let mut strides = Vec::with_capacity(axes.len());
        let mut inner = 1usize;
        for (extent, gap) in axes {
            extents.push(extent);
            strides.push(inner * gap);
            inner = inner * gap * extent;
        }
        extents.reverse();
        strides.reverse();
        (extents, strides)
    })
}
