mod common;

use common::with_tmp_path;
use slabfile::backend::mem::MemStore;
use slabfile::{
    array_interface, dataset_info, read, read_attribute, write, write_attribute, write_slice,
    ArrayView, Backend, GroupOp, Hyperslab, Mem, ScalarType, Shape, StoreOp,
};

use ndarray::{s, Array2, Array3};
use num::complex::Complex;
use rand::Rng;

#[test]
fn scalar_round_trip() {
    let store = MemStore::buffer();
    write(&store, "x", &ArrayView::from_scalar(&3.25f64), false).unwrap();

    let info = dataset_info(&store, "x").unwrap();
    assert_eq!(info.rank(), 0);
    assert_eq!(info.dtype, ScalarType::F64);
    assert!(!info.is_complex);

    let mut out = 0.0f64;
    read(&store, "x", &ArrayView::from_scalar_mut(&mut out), None).unwrap();
    assert_eq!(out, 3.25);
}

#[test]
fn vector_round_trip_with_compression() {
    let store = MemStore::buffer();
    let mut rng = rand::thread_rng();
    let data: Vec<i64> = (0..1000).map(|_| rng.gen_range(-100_000..100_000)).collect();
    write(&store, "v", &ArrayView::from_slice(&data), true).unwrap();

    let mut out = vec![0i64; 1000];
    read(&store, "v", &ArrayView::from_slice_mut(&mut out), None).unwrap();
    assert_eq!(out, data);
}

#[test]
fn strided_matrix_view_writes_a_dense_dataset() {
    let store = MemStore::buffer();
    let arr = Array2::from_shape_fn((6, 8), |(i, j)| (i * 8 + j) as i32);
    let sliced = arr.slice(s![0..6;2, 0..8;2]);
    write(
        &store,
        "m",
        &ArrayView::from_ndarray(&sliced).unwrap(),
        false,
    )
    .unwrap();

    let info = dataset_info(&store, "m").unwrap();
    assert_eq!(info.lengths, Shape::from(vec![3, 4]));

    let mut out = Array2::<i32>::zeros((3, 4));
    read(
        &store,
        "m",
        &ArrayView::from_ndarray_mut(&mut out).unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(out, sliced.to_owned());
}

#[test]
fn sub_block_read_from_rank_3_dataset() {
    let store = MemStore::buffer();
    let arr = Array3::from_shape_fn((4, 5, 6), |(i, j, k)| (i * 30 + j * 6 + k) as f64);
    write(&store, "t", &ArrayView::from_ndarray(&arr).unwrap(), false).unwrap();

    // the 2 x 2 x 3 corner starting at (1, 2, 0)
    let mut slab = Hyperslab::new(3, false);
    slab.offset = Shape::from(vec![1, 2, 0]);
    slab.count = Shape::from(vec![2, 2, 3]);

    let mut out = Array3::<f64>::zeros((2, 2, 3));
    read(
        &store,
        "t",
        &ArrayView::from_ndarray_mut(&mut out).unwrap(),
        Some(&slab),
    )
    .unwrap();
    assert_eq!(out, arr.slice(s![1..3, 2..4, 0..3]).to_owned());
}

#[test]
fn blocked_view_writes_into_blocked_file_selection() {
    // 5 blocks of 10 consecutive elements, 20 elements apart in memory,
    // written as the rows of a 5 x 10 dataset
    let store = MemStore::buffer();
    let memory: Vec<u32> = (0..100).collect();

    store
        .new_dataset(
            "rows",
            ScalarType::U32,
            &Shape::from(vec![5, 10]),
            Default::default(),
        )
        .unwrap();

    let mut view = unsafe {
        ArrayView::from_raw(ScalarType::U32, memory.as_ptr() as *mut u8, 1, false)
    };
    view.parent_shape = Shape::from(100);
    view.slab.offset[0] = 10;
    view.slab.stride[0] = 20;
    view.slab.count[0] = 5;
    view.slab.block[0] = 10;

    let mut file_slab = Hyperslab::new(2, false);
    file_slab.count = Shape::from(vec![5, 1]);
    file_slab.block = Shape::from(vec![1, 10]);

    write_slice(&store, "rows", &view, &file_slab).unwrap();

    let mut rows = Array2::<u32>::zeros((5, 10));
    read(
        &store,
        "rows",
        &ArrayView::from_ndarray_mut(&mut rows).unwrap(),
        None,
    )
    .unwrap();

    // the same values read directly through the strided selection on the
    // original buffer, stored as its own dataset
    write(&store, "source", &ArrayView::from_slice(&memory), false).unwrap();
    let mut mem_slab = Hyperslab::new(1, false);
    mem_slab.offset[0] = 10;
    mem_slab.stride[0] = 20;
    mem_slab.count[0] = 5;
    mem_slab.block[0] = 10;
    let mut direct = vec![0u32; 50];
    read(
        &store,
        "source",
        &ArrayView::from_slice_mut(&mut direct),
        Some(&mem_slab),
    )
    .unwrap();

    assert_eq!(rows.as_slice().unwrap(), &direct[..]);
    let expected: Vec<u32> = (0..5)
        .flat_map(|b| (0..10).map(move |i| 10 + b * 20 + i))
        .collect();
    assert_eq!(direct, expected);
}

#[test]
fn empty_view_creates_an_empty_dataset() {
    let store = MemStore::buffer();
    let data: Vec<f32> = Vec::new();
    write(&store, "none", &ArrayView::from_slice(&data), false).unwrap();

    let info = dataset_info(&store, "none").unwrap();
    assert_eq!(info.lengths, Shape::from(0));

    let mut out: Vec<f32> = Vec::new();
    read(&store, "none", &ArrayView::from_slice_mut(&mut out), None).unwrap();
}

#[test]
fn complex_data_carries_the_marker() {
    let store = MemStore::buffer();
    let data: Vec<Complex<f64>> = (0..6).map(|i| Complex::new(i as f64, 0.5)).collect();
    write(&store, "z", &ArrayView::from_complex_slice(&data), false).unwrap();

    let info = dataset_info(&store, "z").unwrap();
    assert!(info.is_complex);
    assert_eq!(info.lengths, Shape::from(vec![6, 2]));

    let mut out = vec![Complex::new(0.0f64, 0.0); 6];
    read(
        &store,
        "z",
        &ArrayView::from_complex_slice_mut(&mut out),
        None,
    )
    .unwrap();
    assert_eq!(out, data);
}

#[test]
fn rewriting_a_dataset_replaces_it() {
    let store = MemStore::buffer();
    write(&store, "d", &ArrayView::from_slice(&[1i32, 2, 3]), false).unwrap();
    write(&store, "d", &ArrayView::from_slice(&[9i16, 8]), false).unwrap();

    let info = dataset_info(&store, "d").unwrap();
    assert_eq!(info.dtype, ScalarType::I16);
    assert_eq!(info.lengths, Shape::from(2));
}

#[test]
fn attributes_are_create_once() {
    let store = MemStore::buffer();
    let group = store.new_group("g").unwrap();
    write_attribute::<Mem, _>(&group, "version", &ArrayView::from_scalar(&1u32)).unwrap();

    let err =
        write_attribute::<Mem, _>(&group, "version", &ArrayView::from_scalar(&2u32)).unwrap_err();
    assert!(err.to_string().contains("already exists"));

    // the original value is untouched
    let mut out = 0u32;
    read_attribute::<Mem, _>(&group, "version", &ArrayView::from_scalar_mut(&mut out)).unwrap();
    assert_eq!(out, 1);
}

#[test]
fn attribute_reads_check_rank_and_type() {
    let store = MemStore::buffer();
    let group = store.new_group("g").unwrap();
    write_attribute::<Mem, _>(&group, "flag", &ArrayView::from_scalar(&true)).unwrap();

    let mut wrong = 0i32;
    assert!(
        read_attribute::<Mem, _>(&group, "flag", &ArrayView::from_scalar_mut(&mut wrong)).is_err()
    );

    write_attribute::<Mem, _>(&group, "dims", &ArrayView::from_slice(&[2u64, 3])).unwrap();
    let mut scalar = 0u64;
    assert!(
        read_attribute::<Mem, _>(&group, "dims", &ArrayView::from_scalar_mut(&mut scalar))
            .is_err()
    );
}

#[test]
fn same_class_reads_convert_implicitly() {
    let store = MemStore::buffer();
    write(&store, "x", &ArrayView::from_slice(&[1.5f32, -2.0]), false).unwrap();

    let mut out = vec![0f64; 2];
    read(&store, "x", &ArrayView::from_slice_mut(&mut out), None).unwrap();
    assert_eq!(out, vec![1.5, -2.0]);
}

#[test]
fn cross_class_reads_fail() {
    let store = MemStore::buffer();
    write(&store, "x", &ArrayView::from_slice(&[1i32, 2]), false).unwrap();

    let mut out = vec![0f64; 2];
    assert!(read(&store, "x", &ArrayView::from_slice_mut(&mut out), None).is_err());
}

#[test]
fn rank_mismatch_reads_fail() {
    let store = MemStore::buffer();
    let arr = Array2::from_shape_fn((2, 3), |(i, j)| (i + j) as i64);
    write(&store, "m", &ArrayView::from_ndarray(&arr).unwrap(), false).unwrap();

    let mut out = vec![0i64; 6];
    assert!(read(&store, "m", &ArrayView::from_slice_mut(&mut out), None).is_err());
}

#[test]
fn write_slice_rejects_size_mismatch() {
    let store = MemStore::buffer();
    write(&store, "v", &ArrayView::from_slice(&[0u8; 10]), false).unwrap();

    let mut slab = Hyperslab::new(1, false);
    slab.count[0] = 4;
    let data = [1u8, 2, 3];
    assert!(write_slice(&store, "v", &ArrayView::from_slice(&data), &slab).is_err());
}

#[test]
fn write_slice_with_unset_selection_is_a_no_op() {
    let store = MemStore::buffer();
    let data = [1u8, 2, 3];
    write_slice(&store, "missing", &ArrayView::from_slice(&data), &Hyperslab::default()).unwrap();
    assert!(!store.exists("missing").unwrap());
}

#[test]
fn groups_nest() {
    let store = MemStore::buffer();
    let outer = store.new_group("results").unwrap();
    let inner = outer.new_group("run_1").unwrap();
    write(&inner, "x", &ArrayView::from_scalar(&42i64), false).unwrap();

    let reopened = store
        .open_group("results")
        .unwrap()
        .open_group("run_1")
        .unwrap();
    let mut out = 0i64;
    read(&reopened, "x", &ArrayView::from_scalar_mut(&mut out), None).unwrap();
    assert_eq!(out, 42);
}

#[test]
fn stores_persist_through_files() {
    with_tmp_path(|path| {
        let store = Mem::new(&path).unwrap();
        let data: Vec<f64> = (0..50).map(|i| i as f64 * 0.5).collect();
        write(&store, "samples", &ArrayView::from_slice(&data), true).unwrap();
        write_attribute::<Mem, _>(
            &store.open_dataset("samples").unwrap(),
            "scale",
            &ArrayView::from_scalar(&0.5f64),
        )
        .unwrap();
        store.close().unwrap();

        let store = Mem::open(&path).unwrap();
        let mut out = vec![0f64; 50];
        read(&store, "samples", &ArrayView::from_slice_mut(&mut out), None).unwrap();
        assert_eq!(out, data);

        let mut scale = 0f64;
        read_attribute::<Mem, _>(
            &store.open_dataset("samples").unwrap(),
            "scale",
            &ArrayView::from_scalar_mut(&mut scale),
        )
        .unwrap();
        assert_eq!(scale, 0.5);
    });
}

#[test]
fn byte_buffer_round_trip() {
    let store = MemStore::buffer();
    write(&store, "v", &ArrayView::from_slice(&[1u16, 2, 3]), false).unwrap();

    let bytes = store.to_bytes().unwrap();
    let restored = MemStore::from_bytes(&bytes).unwrap();
    let mut out = vec![0u16; 3];
    read(&restored, "v", &ArrayView::from_slice_mut(&mut out), None).unwrap();
    assert_eq!(out, vec![1, 2, 3]);
}

#[test]
fn complex_marker_is_a_string_scalar() {
    let store = MemStore::buffer();
    let z = Complex::new(1.0f64, 2.0);
    write(&store, "z", &ArrayView::from_complex_scalar(&z), false).unwrap();

    let dataset = store.open_dataset("z").unwrap();
    let mut marker = 0u8;
    let mut view = ArrayView::from_scalar_mut(&mut marker);
    view.dtype = ScalarType::String;
    read_attribute::<Mem, _>(&dataset, array_interface::COMPLEX_ATTR, &view).unwrap();
    assert_eq!(marker, b'1');
}
