//! Shapes, hyperslab selections and the stride translation algorithm.
//!
//! A [`Hyperslab`] describes a rectangular, possibly strided and blocked,
//! selection of elements from an n-dimensional dataspace, in the same terms
//! the storage layer uses: `offset`, `stride`, `count` and `block` per axis.
//! [`parent_shape_and_strides`] converts flat, C-order element strides of an
//! in-memory view into an equivalent `(parent shape, hyperslab stride)` pair
//! that selects exactly the same memory offsets.

use anyhow::{bail, Result};
use itertools::Itertools;
use num::integer::gcd;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::ops::{Index, IndexMut};

/// Shape of an n-dimensional dataspace. A rank-0 (empty) shape denotes a
/// scalar and has size 1.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape(SmallVec<[usize; 4]>);

impl Shape {
    pub fn zeros(ndim: usize) -> Self {
        Self(smallvec![0; ndim])
    }

    pub fn ones(ndim: usize) -> Self {
        Self(smallvec![1; ndim])
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements, i.e. the product of all extents.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.0.iter()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().map(|x| x.to_string()).join(" x "))
    }
}

impl AsRef<[usize]> for Shape {
    fn as_ref(&self) -> &[usize] {
        &self.0
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for Shape {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(shape: Vec<usize>) -> Self {
        Self(SmallVec::from_vec(shape))
    }
}

impl From<&[usize]> for Shape {
    fn from(shape: &[usize]) -> Self {
        Self(SmallVec::from_slice(shape))
    }
}

impl From<usize> for Shape {
    fn from(shape: usize) -> Self {
        Self(smallvec![shape])
    }
}

impl FromIterator<usize> for Shape {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(SmallVec::from_iter(iter))
    }
}

/// A rectangular selection of elements from an n-dimensional dataspace.
///
/// The four arrays all have the same length, the rank of the selection. For
/// complex-valued data the imaginary part is treated as just another
/// dimension of extent 2, i.e. the rank is increased by one.
///
/// The following selects every second column in a `7 x 7` dataspace:
///
/// ```
/// use slabfile::Hyperslab;
///
/// let mut slab = Hyperslab::new(2, false);
/// slab.stride[1] = 2;
/// slab.count[0] = 7;
/// slab.count[1] = 4;
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hyperslab {
    /// Index offset for each dimension.
    pub offset: Shape,
    /// Number of elements to skip between consecutive blocks in each
    /// dimension.
    pub stride: Shape,
    /// Number of blocks to select along each dimension.
    pub count: Shape,
    /// Shape of a single selected block.
    pub block: Shape,
}

impl Hyperslab {
    /// Create a hyperslab for a dataspace of the given rank, with zero
    /// offsets and counts and unit strides and blocks. A complex hyperslab
    /// gets an additional innermost dimension with `count = 2`.
    ///
    /// `rank` excludes the added imaginary dimension.
    pub fn new(rank: usize, is_complex: bool) -> Self {
        let n = rank + is_complex as usize;
        let mut slab = Self {
            offset: Shape::zeros(n),
            stride: Shape::ones(n),
            count: Shape::zeros(n),
            block: Shape::ones(n),
        };
        if is_complex {
            slab.count[rank] = 2;
        }
        slab
    }

    /// Rank of the hyperslab, including the possible imaginary dimension.
    pub fn rank(&self) -> usize {
        self.count.ndim()
    }

    /// Whether the hyperslab has been left unspecified. Distinct from a
    /// selection of zero elements, which has a non-empty `count` containing
    /// a zero.
    pub fn is_empty(&self) -> bool {
        self.count.ndim() == 0
    }

    /// Shape of the selection, `count[i] * block[i]` per axis.
    pub fn shape(&self) -> Shape {
        self.count
            .iter()
            .zip(self.block.iter())
            .map(|(c, b)| c * b)
            .collect()
    }

    /// Total number of selected elements.
    pub fn size(&self) -> usize {
        self.shape().size()
    }

    /// Row-major linear offsets of all selected elements within a contiguous
    /// array of shape `parent`. Selections reaching past the parent extents
    /// are rejected. A rank-0 hyperslab selects the single element of a
    /// scalar dataspace.
    pub fn offsets(&self, parent: &Shape) -> Result<Vec<usize>> {
        self.offsets_impl(parent, true)
    }

    /// Like [`Hyperslab::offsets`], but without the bound check on the
    /// outermost axis. A parent shape synthesized from view strides uses its
    /// outermost extent only to anchor the address space; positions along
    /// that axis may legitimately exceed it.
    pub fn offsets_relaxed(&self, parent: &Shape) -> Result<Vec<usize>> {
        self.offsets_impl(parent, false)
    }

    fn offsets_impl(&self, parent: &Shape, check_outer: bool) -> Result<Vec<usize>> {
        let rank = self.rank();
        if rank != parent.ndim() {
            bail!(
                "hyperslab rank {} does not match dataspace rank {}",
                rank,
                parent.ndim()
            );
        }
        if rank == 0 {
            return Ok(vec![0]);
        }

        // row-major weight of each axis within the parent
        let mut weights = vec![1usize; rank];
        for d in (0..rank - 1).rev() {
            weights[d] = weights[d + 1] * parent[d + 1];
        }

        let mut positions = Vec::with_capacity(rank);
        for d in 0..rank {
            let pos: Vec<usize> = (0..self.count[d])
                .flat_map(|c| (0..self.block[d]).map(move |b| c * self.stride[d] + b))
                .map(|p| self.offset[d] + p)
                .collect();
            if (d > 0 || check_outer) && pos.last().is_some_and(|&p| p >= parent[d]) {
                bail!(
                    "hyperslab selection exceeds extent {} of axis {}",
                    parent[d],
                    d
                );
            }
            positions.push(pos);
        }

        Ok(positions
            .into_iter()
            .multi_cartesian_product()
            .map(|idx| idx.iter().zip(weights.iter()).map(|(i, w)| i * w).sum())
            .collect())
    }
}

/// Given the C-order element strides of a view and the total number of
/// elements in the view, compute the shape of a possible contiguous parent
/// array together with the hyperslab strides of the view within it.
///
/// With `s` the given strides, `t` the returned hyperslab strides and `p` the
/// returned parent shape, the following holds for `rank = N`:
/// - `s[N - 1] = t[N - 1]`
/// - `s[N - 2] = t[N - 2] * p[N - 1]`
/// - `...`
/// - `s[0] = t[0] * p[N - 1] * p[N - 2] * ... * p[1]`.
///
/// The outermost parent extent is not fixed by these equations; it only
/// bounds the parent address space. It is set to `view_size`, except when the
/// reduced strides all come out as 1 and `view_size` divides evenly by the
/// inner parent extents, in which case the quotient is used so that a
/// contiguous view of shape `S` translates back to exactly `S`. Neither the
/// parent shape nor the strides are unique in general, but any returned pair
/// selects exactly the memory offsets of the original strided view.
///
/// The extent assigned to an axis is the gcd of *all* strides at or below the
/// nesting level above it. Bounding it by the single stride at that level
/// instead breaks selections whose blocks span more than one element.
///
/// All strides must be positive. A rank-0 input yields empty vectors, a view
/// of size 0 yields an all-zero parent shape and unit strides.
pub fn parent_shape_and_strides(strides: &[usize], view_size: usize) -> (Shape, Shape) {
    let rank = strides.len();
    if rank == 0 {
        return (Shape::default(), Shape::default());
    }
    if view_size == 0 {
        return (Shape::zeros(rank), Shape::ones(rank));
    }
    debug_assert!(strides.iter().all(|&s| s > 0));

    let mut parent = Shape::zeros(rank);
    let mut slab_strides: Shape = strides.into();
    parent[0] = view_size;

    for u in (0..rank - 1).rev() {
        // extent of the axis below u is the gcd of all strides at indices <= u,
        // taken over the already-reduced values
        let mut g = slab_strides[u];
        for v in (0..u).rev() {
            g = gcd(g, slab_strides[v]);
        }
        for v in 0..=u {
            slab_strides[v] /= g;
        }
        parent[u + 1] = g;
    }

    // a fully reduced selection covers its parent contiguously; sizing the
    // outermost extent to fit recovers the natural shape exactly
    let inner: usize = parent.iter().skip(1).product();
    if slab_strides.iter().all(|&s| s == 1) && view_size % inner == 0 {
        parent[0] = view_size / inner;
    }

    (parent, slab_strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_translation_is_empty() {
        let (parent, strides) = parent_shape_and_strides(&[], 1);
        assert_eq!(parent.ndim(), 0);
        assert_eq!(strides.ndim(), 0);
    }

    #[test]
    fn empty_view_translation() {
        let (parent, strides) = parent_shape_and_strides(&[0, 0, 0], 0);
        assert_eq!(parent, Shape::zeros(3));
        assert_eq!(strides, Shape::ones(3));
    }

    #[test]
    fn contiguous_views_translate_to_unit_strides() {
        for shape in [vec![10], vec![10, 10], vec![2, 3, 4]] {
            let mut strides = vec![1usize; shape.len()];
            for i in (0..shape.len() - 1).rev() {
                strides[i] = strides[i + 1] * shape[i + 1];
            }
            let size = shape.iter().product();
            let (parent, slab_strides) = parent_shape_and_strides(&strides, size);
            assert_eq!(parent, Shape::from(shape));
            assert_eq!(slab_strides, Shape::ones(slab_strides.ndim()));
        }
    }

    #[test]
    fn non_unit_strides_keep_the_free_outer_extent() {
        // a rank-1 view with stride 7 stays a strided selection; the outer
        // extent falls back to the view size
        let (parent, strides) = parent_shape_and_strides(&[7], 5);
        assert_eq!(parent, Shape::from(5));
        assert_eq!(strides, Shape::from(7));

        // blocked: 5 runs of 10, spaced 20 apart; reduced strides are unit
        // but 50 does not divide by the inner extent 20
        let (parent, strides) = parent_shape_and_strides(&[20, 1], 50);
        assert_eq!(parent, Shape::from(vec![50, 20]));
        assert_eq!(strides, Shape::ones(2));
    }

    #[test]
    fn strided_view_selects_original_offsets() {
        // every other row and column of a 10 x 10 array
        let strides = [20, 2];
        let extents = [5, 5];
        let (parent, slab_strides) = parent_shape_and_strides(&strides, 25);

        let mut slab = Hyperslab::new(2, false);
        slab.stride = slab_strides;
        slab.count = Shape::from(&extents[..]);
        let derived = slab.offsets_relaxed(&parent).unwrap();

        let expected: Vec<usize> = (0..5)
            .flat_map(|i| (0..5).map(move |j| i * strides[0] + j * strides[1]))
            .collect();
        assert_eq!(derived, expected);
    }

    #[test]
    fn offsets_with_blocks() {
        // blocks of 10 in a 100 element array, skipping every other block,
        // starting with the second block
        let mut slab = Hyperslab::new(1, false);
        slab.offset[0] = 10;
        slab.stride[0] = 20;
        slab.count[0] = 5;
        slab.block[0] = 10;
        assert_eq!(slab.size(), 50);

        let offsets = slab.offsets(&Shape::from(100)).unwrap();
        assert_eq!(offsets.len(), 50);
        assert_eq!(&offsets[..12], &[10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 30, 31]);
        assert_eq!(*offsets.last().unwrap(), 99);
    }

    #[test]
    fn offsets_reject_out_of_bounds_selection() {
        let mut slab = Hyperslab::new(1, false);
        slab.count[0] = 11;
        assert!(slab.offsets(&Shape::from(10)).is_err());
    }

    #[test]
    fn scalar_offsets() {
        let slab = Hyperslab::new(0, false);
        assert_eq!(slab.offsets(&Shape::default()).unwrap(), vec![0]);
    }
}
