//! Array views over caller-owned memory, and dataset introspection results.

use crate::backend::datatype::{BackendData, ScalarType};
use crate::slab::{parent_shape_and_strides, Hyperslab, Shape};
use anyhow::{ensure, Result};
use ndarray::{ArrayBase, Data, DataMut, Dimension};
use num::complex::Complex;
use std::marker::PhantomData;

/// Basic information about a stored dataset, fetched fresh before every read
/// to validate the pending transfer.
#[derive(Clone, Debug)]
pub struct DatasetInfo {
    /// Shape of the stored dataspace, including the imaginary dimension for
    /// complex-valued data.
    pub lengths: Shape,
    /// Element type stored in the dataset.
    pub dtype: ScalarType,
    /// Whether the dataset carries the complex-value marker attribute.
    pub is_complex: bool,
}

impl DatasetInfo {
    pub fn rank(&self) -> usize {
        self.lengths.ndim()
    }
}

/// A view on an n-dimensional array in caller-owned memory.
///
/// A view consists of the shape of a conceptual contiguous parent array and a
/// [`Hyperslab`] selecting elements from it. The parent shape does not have
/// to match the actual allocation; it only drives the selection math, and a
/// shape synthesized by [`parent_shape_and_strides`] works just as well as
/// the true one.
///
/// The view borrows the memory it points at. Views built from shared
/// references must only be used as transfer sources; reading into them is
/// undefined behavior.
pub struct ArrayView<'a> {
    /// Element type of the viewed memory.
    pub dtype: ScalarType,
    data: *mut u8,
    /// Shape of the (conceptual) contiguous parent array.
    pub parent_shape: Shape,
    /// Selection of the view within the parent array.
    pub slab: Hyperslab,
    /// Whether the data is complex valued. Complex views carry an additional
    /// innermost dimension of extent 2.
    pub is_complex: bool,
    marker: PhantomData<&'a ()>,
}

impl<'a> ArrayView<'a> {
    /// Create a view of the given rank with an all-zero parent shape and an
    /// unset selection. The caller fills in `parent_shape` and `slab`.
    ///
    /// `rank` excludes the imaginary dimension; for complex views both the
    /// parent shape and the hyperslab get an extra trailing axis of extent 2.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for the element offsets selected once the view is
    /// populated, for the lifetime `'a`.
    pub unsafe fn from_raw(dtype: ScalarType, ptr: *mut u8, rank: usize, is_complex: bool) -> Self {
        let n = rank + is_complex as usize;
        let mut parent_shape = Shape::zeros(n);
        if is_complex {
            parent_shape[rank] = 2;
        }
        Self {
            dtype,
            data: ptr,
            parent_shape,
            slab: Hyperslab::new(rank, is_complex),
            is_complex,
            marker: PhantomData,
        }
    }

    /// Build a view from per-axis element strides and extents, synthesizing a
    /// parent shape that reproduces the same memory offsets.
    ///
    /// For complex data the strides are given in units of the real scalar
    /// type and a contiguous axis of extent 2 is appended internally; the
    /// real and imaginary parts of each element must be adjacent in memory,
    /// with the innermost given stride a multiple of 2.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for every offset reachable through the strides and
    /// extents, for the lifetime `'a`.
    pub unsafe fn from_strides(
        dtype: ScalarType,
        ptr: *mut u8,
        extents: &[usize],
        strides: &[usize],
        is_complex: bool,
    ) -> Self {
        debug_assert_eq!(extents.len(), strides.len());
        let rank = extents.len();

        let mut full_strides: Vec<usize> = strides.to_vec();
        if is_complex {
            full_strides.push(1);
        }
        let view_size: usize =
            extents.iter().product::<usize>() * if is_complex { 2 } else { 1 };
        let (parent_shape, slab_strides) = parent_shape_and_strides(&full_strides, view_size);

        let mut view = Self::from_raw(dtype, ptr, rank, is_complex);
        for i in 0..rank {
            view.slab.count[i] = extents[i];
            view.slab.stride[i] = slab_strides[i];
            view.parent_shape[i] = parent_shape[i];
        }
        // the imaginary axis is always contiguous with extent 2; from_raw
        // already fixed parent_shape[rank] and the slab
        view
    }

    /// Rank-0 view of a single value, usable as a transfer source.
    pub fn from_scalar<T: BackendData>(value: &'a T) -> Self {
        unsafe { Self::from_raw(T::DTYPE, value as *const T as *mut u8, 0, false) }
    }

    /// Rank-0 view of a single value, usable as a transfer destination.
    pub fn from_scalar_mut<T: BackendData>(value: &'a mut T) -> Self {
        unsafe { Self::from_raw(T::DTYPE, value as *mut T as *mut u8, 0, false) }
    }

    /// Rank-1 contiguous view of a slice, usable as a transfer source.
    pub fn from_slice<T: BackendData>(data: &'a [T]) -> Self {
        let mut view = unsafe { Self::from_raw(T::DTYPE, data.as_ptr() as *mut u8, 1, false) };
        view.slab.count[0] = data.len();
        view.parent_shape[0] = data.len();
        view
    }

    /// Rank-1 contiguous view of a slice, usable as a transfer destination.
    pub fn from_slice_mut<T: BackendData>(data: &'a mut [T]) -> Self {
        let mut view = unsafe { Self::from_raw(T::DTYPE, data.as_mut_ptr() as *mut u8, 1, false) };
        view.slab.count[0] = data.len();
        view.parent_shape[0] = data.len();
        view
    }

    /// Rank-0 complex view: a single dimension of extent 2 for the real and
    /// imaginary parts.
    pub fn from_complex_scalar<T: BackendData>(value: &'a Complex<T>) -> Self {
        unsafe { Self::from_raw(T::DTYPE, value as *const Complex<T> as *mut u8, 0, true) }
    }

    pub fn from_complex_scalar_mut<T: BackendData>(value: &'a mut Complex<T>) -> Self {
        unsafe { Self::from_raw(T::DTYPE, value as *mut Complex<T> as *mut u8, 0, true) }
    }

    /// Rank-1 contiguous view of complex values, with the interleaved
    /// real/imaginary parts exposed as a trailing axis of extent 2.
    pub fn from_complex_slice<T: BackendData>(data: &'a [Complex<T>]) -> Self {
        let mut view =
            unsafe { Self::from_raw(T::DTYPE, data.as_ptr() as *mut u8, 1, true) };
        view.slab.count[0] = data.len();
        view.parent_shape[0] = data.len();
        view
    }

    pub fn from_complex_slice_mut<T: BackendData>(data: &'a mut [Complex<T>]) -> Self {
        let mut view =
            unsafe { Self::from_raw(T::DTYPE, data.as_mut_ptr() as *mut u8, 1, true) };
        view.slab.count[0] = data.len();
        view.parent_shape[0] = data.len();
        view
    }

    /// View of an `ndarray` array, usable as a transfer source. The array
    /// must have positive strides; callers with reversed or broadcast axes
    /// normalize through `as_standard_layout` first.
    pub fn from_ndarray<T, S, D>(arr: &'a ArrayBase<S, D>) -> Result<Self>
    where
        T: BackendData,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let strides = ndarray_strides(arr.shape(), arr.strides())?;
        Ok(unsafe {
            Self::from_strides(T::DTYPE, arr.as_ptr() as *mut u8, arr.shape(), &strides, false)
        })
    }

    /// View of a mutable `ndarray` array, usable as a transfer destination.
    pub fn from_ndarray_mut<T, S, D>(arr: &'a mut ArrayBase<S, D>) -> Result<Self>
    where
        T: BackendData,
        S: DataMut<Elem = T>,
        D: Dimension,
    {
        let strides = ndarray_strides(arr.shape(), arr.strides())?;
        let extents = arr.shape().to_vec();
        Ok(unsafe {
            Self::from_strides(T::DTYPE, arr.as_mut_ptr() as *mut u8, &extents, &strides, false)
        })
    }

    /// Rank of the view, including the possible imaginary dimension.
    pub fn rank(&self) -> usize {
        self.slab.rank()
    }

    /// Number of elements selected by the view. A rank-0 view has size 1.
    pub fn size(&self) -> usize {
        self.slab.size()
    }

    /// Pointer to the first element of the parent array.
    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Row-major linear offsets of the selected elements relative to
    /// [`ArrayView::data_ptr`], in transfer order.
    pub fn mem_offsets(&self) -> Result<Vec<usize>> {
        self.slab.offsets_relaxed(&self.parent_shape)
    }
}

/// Element strides of an `ndarray` array as non-negative values. Axes of
/// extent <= 1 can carry arbitrary strides (e.g. 0 after broadcasting); they
/// are replaced with the contiguous value so the translation stays
/// well-posed.
fn ndarray_strides(extents: &[usize], strides: &[isize]) -> Result<Vec<usize>> {
    ensure!(
        extents.iter().zip(strides).all(|(&e, &s)| s > 0 || e <= 1),
        "array views require positive strides; normalize the array first"
    );
    let mut out = vec![0usize; extents.len()];
    let mut contiguous = 1usize;
    for i in (0..extents.len()).rev() {
        out[i] = if extents[i] <= 1 {
            contiguous
        } else {
            strides[i] as usize
        };
        contiguous = out[i] * extents[i].max(1);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    #[test]
    fn slice_view_is_contiguous() {
        let data = [1i32, 2, 3, 4];
        let view = ArrayView::from_slice(&data);
        assert_eq!(view.rank(), 1);
        assert_eq!(view.size(), 4);
        assert_eq!(view.mem_offsets().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn complex_slice_view_appends_imaginary_axis() {
        let data = [Complex::new(1.0f64, 2.0), Complex::new(3.0, 4.0)];
        let view = ArrayView::from_complex_slice(&data);
        assert_eq!(view.rank(), 2);
        assert_eq!(view.slab.count.as_ref(), &[2, 2]);
        assert_eq!(view.parent_shape.as_ref(), &[2, 2]);
        assert_eq!(view.size(), 4);
    }

    #[test]
    fn strided_ndarray_view_selects_original_elements() {
        let arr = Array2::from_shape_fn((4, 6), |(i, j)| (i * 6 + j) as i64);
        let sliced = arr.slice(s![.., ..;2]);
        let view = ArrayView::from_ndarray(&sliced).unwrap();

        let expected: Vec<usize> = (0..4)
            .flat_map(|i| (0..3).map(move |j| i * 6 + j * 2))
            .collect();
        assert_eq!(view.mem_offsets().unwrap(), expected);
    }

    #[test]
    fn scalar_view_has_size_one() {
        let x = 7u8;
        let view = ArrayView::from_scalar(&x);
        assert_eq!(view.rank(), 0);
        assert_eq!(view.size(), 1);
        assert_eq!(view.mem_offsets().unwrap(), vec![0]);
    }
}
