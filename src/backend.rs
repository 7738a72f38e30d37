//! Storage backend abstraction.
//!
//! The read/write protocol in [`crate::array_interface`] is written against
//! these traits. A backend supplies hierarchical groups, typed rectangular
//! datasets with hyperslab selection, and small attributes attached to either
//! kind of object. Handles are reference counted: cloning a handle shares
//! the underlying object, the last handle dropped releases it.

pub mod datatype;
pub mod mem;

use crate::slab::{Hyperslab, Shape};
use crate::view::ArrayView;
pub use datatype::{BackendData, ScalarType, TypeClass};
pub use mem::Mem;

use anyhow::{bail, Result};
use core::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

/// Dataset creation properties.
#[derive(Debug, Clone, Default)]
pub struct WriteConfig {
    /// Deflate level applied to stored chunks, if any.
    pub compression: Option<u32>,
    /// Chunk shape; required when compression is enabled.
    pub chunk: Option<Shape>,
}

pub trait Backend: 'static {
    /// The name of the backend.
    const NAME: &'static str;

    /// Data store. The root of a store acts as a group.
    type Store: StoreOp<Self> + GroupOp<Self> + Send + Sync;

    /// Groups work like directories and can contain groups or datasets.
    type Group: GroupOp<Self> + AttributeOp<Self> + Send + Sync;

    /// Datasets store n-dimensional arrays of a single element type.
    type Dataset: DatasetOp<Self> + AttributeOp<Self> + Send + Sync;

    /// Create a new store at the given path, replacing anything there.
    fn new<P: AsRef<Path>>(path: P) -> Result<Self::Store>;

    /// Open an existing store as read-only.
    fn open<P: AsRef<Path>>(path: P) -> Result<Self::Store>;

    /// Open an existing store for reading and writing.
    fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self::Store>;
}

pub trait StoreOp<B: Backend + ?Sized> {
    /// Returns the file path backing the store, if any.
    fn filename(&self) -> PathBuf;

    /// Close the store, flushing pending changes.
    fn close(self) -> Result<()>;
}

pub trait GroupOp<B: Backend + ?Sized> {
    /// List all groups and datasets in this group.
    fn list(&self) -> Result<Vec<String>>;

    /// Create a new group.
    fn new_group(&self, name: &str) -> Result<B::Group>;

    /// Open an existing group.
    fn open_group(&self, name: &str) -> Result<B::Group>;

    /// Create a dataset with the given element type and shape. Fails if the
    /// name is already linked.
    fn new_dataset(
        &self,
        name: &str,
        dtype: ScalarType,
        shape: &Shape,
        config: WriteConfig,
    ) -> Result<B::Dataset>;

    /// Open an existing dataset.
    fn open_dataset(&self, name: &str) -> Result<B::Dataset>;

    /// Unlink a group or dataset. Open handles keep the object alive until
    /// they are dropped.
    fn delete(&self, name: &str) -> Result<()>;

    /// Check if a group or dataset exists.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Path of this group relative to the store root.
    fn path(&self) -> PathBuf;
}

pub trait DatasetOp<B: Backend + ?Sized> {
    /// Element type of the dataset.
    fn dtype(&self) -> Result<ScalarType>;

    /// Shape of the stored dataspace.
    fn shape(&self) -> Shape;

    /// Transfer the elements selected by `value` into the dataset region
    /// selected by `selection` (the whole dataspace if `None`). Selection
    /// sizes must match. Elements are converted implicitly when the types
    /// differ within a class.
    fn write_view(&self, selection: Option<&Hyperslab>, value: &ArrayView<'_>) -> Result<()>;

    /// Transfer the dataset region selected by `selection` into the memory
    /// selected by `value`. The view must have been built over writable
    /// memory.
    fn read_view(&self, selection: Option<&Hyperslab>, value: &ArrayView<'_>) -> Result<()>;
}

pub trait AttributeOp<B: Backend + ?Sized> {
    /// Path of the object relative to the store root.
    fn path(&self) -> PathBuf;

    /// Create an attribute holding the elements selected by `value`. Fails
    /// if the attribute already exists.
    fn create_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()>;

    /// Read an attribute into the memory selected by `value`, which must
    /// match the stored element type exactly.
    fn read_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()>;

    /// Rank of an existing attribute's dataspace.
    fn attr_rank(&self, name: &str) -> Result<usize>;

    /// Element type of an existing attribute.
    fn attr_dtype(&self, name: &str) -> Result<ScalarType>;

    fn has_attr(&self, name: &str) -> bool;
}

/// Either a group or a dataset, for operations that attach to both.
pub enum DataContainer<B: Backend> {
    Group(B::Group),
    Dataset(B::Dataset),
}

impl<B: Backend> Debug for DataContainer<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            DataContainer::Group(g) => write!(f, "Group({:?})", AttributeOp::path(g)),
            DataContainer::Dataset(d) => write!(f, "Dataset({:?})", d.path()),
        }
    }
}

impl<B: Backend> DataContainer<B> {
    pub fn open<G: GroupOp<B>>(group: &G, name: &str) -> Result<Self> {
        if group.exists(name)? {
            match group.open_dataset(name) {
                Ok(dataset) => Ok(DataContainer::Dataset(dataset)),
                Err(e1) => group
                    .open_group(name)
                    .map(DataContainer::Group)
                    .map_err(|e2| {
                        e2.context(e1).context(format!(
                            "error opening group or dataset named '{}' in group",
                            name
                        ))
                    }),
            }
        } else {
            bail!("no group or dataset named '{}' in group", name);
        }
    }

    pub fn as_group(&self) -> Result<&B::Group> {
        match self {
            Self::Group(x) => Ok(x),
            _ => bail!("expecting group at '{}'", self.path().display()),
        }
    }

    pub fn as_dataset(&self) -> Result<&B::Dataset> {
        match self {
            Self::Dataset(x) => Ok(x),
            _ => bail!("expecting dataset at '{}'", self.path().display()),
        }
    }
}

impl<B: Backend> AttributeOp<B> for DataContainer<B> {
    fn path(&self) -> PathBuf {
        match self {
            DataContainer::Group(g) => AttributeOp::path(g),
            DataContainer::Dataset(d) => d.path(),
        }
    }

    fn create_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()> {
        match self {
            DataContainer::Group(g) => g.create_attr(name, value),
            DataContainer::Dataset(d) => d.create_attr(name, value),
        }
    }

    fn read_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()> {
        match self {
            DataContainer::Group(g) => g.read_attr(name, value),
            DataContainer::Dataset(d) => d.read_attr(name, value),
        }
    }

    fn attr_rank(&self, name: &str) -> Result<usize> {
        match self {
            DataContainer::Group(g) => g.attr_rank(name),
            DataContainer::Dataset(d) => d.attr_rank(name),
        }
    }

    fn attr_dtype(&self, name: &str) -> Result<ScalarType> {
        match self {
            DataContainer::Group(g) => g.attr_dtype(name),
            DataContainer::Dataset(d) => d.attr_dtype(name),
        }
    }

    fn has_attr(&self, name: &str) -> bool {
        match self {
            DataContainer::Group(g) => g.has_attr(name),
            DataContainer::Dataset(d) => d.has_attr(name),
        }
    }
}
