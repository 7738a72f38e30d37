//! The read/write protocol: creation, validation and bulk transfer of typed
//! array data between [`ArrayView`]s and stored datasets or attributes.
//!
//! Every operation is a self-contained request against backend handles
//! opened and closed within the call; nothing is cached across calls.

use crate::backend::{AttributeOp, Backend, DatasetOp, GroupOp, ScalarType, TypeClass, WriteConfig};
use crate::slab::{Hyperslab, Shape};
use crate::view::{ArrayView, DatasetInfo};

use anyhow::{ensure, Context, Result};
use log::warn;

/// Marker attribute present on datasets holding interleaved real/imaginary
/// pairs. Presence means true; the value itself is not inspected.
pub const COMPLEX_ATTR: &str = "__complex__";

/// Ceiling imposed by the storage layer on the byte size of a single chunk.
const MAX_CHUNK_BYTES: u64 = (1 << 32) - 1;

/// Deflate level used for compressed datasets.
const COMPRESSION_LEVEL: u32 = 1;

/// Chunk shape for a dataset of the given shape: each dimension, innermost
/// first, is clamped so that no single chunk exceeds [`MAX_CHUNK_BYTES`].
fn chunk_shape(shape: &Shape, elem_size: usize) -> Shape {
    let rank = shape.ndim();
    let mut chunk = Shape::zeros(rank);
    let mut chunk_bytes = elem_size as u64;
    for i in (0..rank).rev() {
        let max_dim = (MAX_CHUNK_BYTES / chunk_bytes).max(1) as usize;
        chunk[i] = shape[i].clamp(1, max_dim);
        chunk_bytes *= chunk[i] as u64;
    }
    chunk
}

/// Retrieve shape, element type and the complex marker of a stored dataset.
pub fn dataset_info<B, G>(group: &G, name: &str) -> Result<DatasetInfo>
where
    B: Backend,
    G: GroupOp<B>,
{
    let dataset = group.open_dataset(name).with_context(|| {
        format!(
            "opening dataset '{}' in group '{}'",
            name,
            group.path().display()
        )
    })?;
    Ok(DatasetInfo {
        lengths: dataset.shape(),
        dtype: dataset.dtype()?,
        is_complex: dataset.has_attr(COMPLEX_ATTR),
    })
}

/// Write an array view to a dataset, replacing any existing link with the
/// same name.
///
/// The dataset is created with shape `count[i] * block[i]` per axis. With
/// `compress` set and rank > 0, the dataset is chunked (see [`chunk_shape`])
/// and deflated. Views selecting zero elements create a correctly shaped
/// dataset without transferring anything. Complex views get the
/// [`COMPLEX_ATTR`] marker.
pub fn write<B, G>(group: &G, name: &str, value: &ArrayView<'_>, compress: bool) -> Result<()>
where
    B: Backend,
    G: GroupOp<B>,
{
    if group.exists(name)? {
        group.delete(name)?;
    }

    let config = if compress && value.rank() > 0 {
        WriteConfig {
            compression: Some(COMPRESSION_LEVEL),
            chunk: Some(chunk_shape(&value.slab.shape(), value.dtype.size())),
        }
    } else {
        WriteConfig::default()
    };

    let dataset = group
        .new_dataset(name, value.dtype, &value.slab.shape(), config)
        .with_context(|| {
            format!(
                "write: creating dataset '{}' in group '{}'",
                name,
                group.path().display()
            )
        })?;

    if value.size() > 0 {
        dataset.write_view(None, value).with_context(|| {
            format!(
                "write: writing dataset '{}' in group '{}'",
                name,
                group.path().display()
            )
        })?;
    }

    if value.is_complex {
        write_complex_marker::<B>(&dataset)?;
    }
    Ok(())
}

/// Write an array view into a hyperslab of an existing dataset.
///
/// The view must select as many elements as the hyperslab, and the element
/// types must match (string types by class, all others exactly). An
/// unspecified or zero-size hyperslab is a no-op.
pub fn write_slice<B, G>(
    group: &G,
    name: &str,
    value: &ArrayView<'_>,
    slab: &Hyperslab,
) -> Result<()>
where
    B: Backend,
    G: GroupOp<B>,
{
    if slab.is_empty() || slab.size() == 0 {
        return Ok(());
    }
    ensure!(
        value.size() == slab.size(),
        "write_slice '{}' in group '{}': memory and file selections have different sizes ({} != {})",
        name,
        group.path().display(),
        value.size(),
        slab.size()
    );

    let info = dataset_info(group, name)?;
    let compatible = value.dtype == info.dtype
        || (value.dtype.class() == TypeClass::String && info.dtype.class() == TypeClass::String);
    ensure!(
        compatible,
        "write_slice '{}' in group '{}': incompatible element types: {} != {}",
        name,
        group.path().display(),
        value.dtype,
        info.dtype
    );

    let dataset = group.open_dataset(name)?;
    dataset.write_view(Some(slab), value).with_context(|| {
        format!(
            "write_slice: writing dataset '{}' in group '{}'",
            name,
            group.path().display()
        )
    })
}

/// Write an array view to a new attribute. Attributes are create-once:
/// writing to an existing name is an error and leaves it unchanged.
pub fn write_attribute<B, L>(object: &L, name: &str, value: &ArrayView<'_>) -> Result<()>
where
    B: Backend,
    L: AttributeOp<B>,
{
    ensure!(
        !object.has_attr(name),
        "write_attribute: attribute '{}' already exists at '{}'",
        name,
        object.path().display()
    );
    object.create_attr(name, value).with_context(|| {
        format!(
            "write_attribute: writing attribute '{}' at '{}'",
            name,
            object.path().display()
        )
    })
}

/// Read a dataset, or a hyperslab of it, into an array view.
///
/// A type mismatch across classes, a rank mismatch, or a mismatch between
/// the number of selected and viewed elements is an error. A same-class
/// mismatch in the exact element type is only warned about; elements are
/// converted during the transfer.
pub fn read<B, G>(
    group: &G,
    name: &str,
    value: &ArrayView<'_>,
    slab: Option<&Hyperslab>,
) -> Result<()>
where
    B: Backend,
    G: GroupOp<B>,
{
    let info = dataset_info(group, name)?;
    ensure!(
        value.dtype.same_class(&info.dtype),
        "read '{}' from group '{}': incompatible element types: {} != {}",
        name,
        group.path().display(),
        value.dtype,
        info.dtype
    );
    if value.dtype != info.dtype {
        warn!(
            "type mismatch while reading dataset '{}': {} != {}; converting implicitly",
            name, value.dtype, info.dtype
        );
    }
    ensure!(
        info.rank() == value.rank(),
        "read '{}' from group '{}': incompatible ranks: {} != {}",
        name,
        group.path().display(),
        value.rank(),
        info.rank()
    );
    let selected = match slab {
        Some(slab) => slab.size(),
        None => info.lengths.size(),
    };
    ensure!(
        selected == value.size(),
        "read '{}' from group '{}': selection of {} elements does not fit a view of {}",
        name,
        group.path().display(),
        selected,
        value.size()
    );
    if selected == 0 {
        return Ok(());
    }

    let dataset = group.open_dataset(name)?;
    dataset.read_view(slab, value).with_context(|| {
        format!(
            "read: reading dataset '{}' in group '{}'",
            name,
            group.path().display()
        )
    })
}

/// Read a scalar attribute into an array view. The attribute's rank must be
/// exactly 0 and its element type must equal the view's; there is no
/// conversion path for attributes.
pub fn read_attribute<B, L>(object: &L, name: &str, value: &ArrayView<'_>) -> Result<()>
where
    B: Backend,
    L: AttributeOp<B>,
{
    let rank = object.attr_rank(name).with_context(|| {
        format!(
            "read_attribute: opening attribute '{}' at '{}'",
            name,
            object.path().display()
        )
    })?;
    ensure!(
        rank == 0,
        "read_attribute: attribute '{}' at '{}' has rank {}, expected a scalar",
        name,
        object.path().display(),
        rank
    );
    let dtype = object.attr_dtype(name)?;
    ensure!(
        dtype == value.dtype,
        "read_attribute: attribute '{}' at '{}' has type {}, expected {}",
        name,
        object.path().display(),
        dtype,
        value.dtype
    );
    object.read_attr(name, value).with_context(|| {
        format!(
            "read_attribute: reading attribute '{}' at '{}'",
            name,
            object.path().display()
        )
    })
}

fn write_complex_marker<B: Backend>(dataset: &B::Dataset) -> Result<()> {
    let one = b'1';
    let mut marker = ArrayView::from_scalar(&one);
    marker.dtype = ScalarType::String;
    write_attribute::<B, _>(dataset, COMPLEX_ATTR, &marker)
}
