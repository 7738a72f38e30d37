//! Typed hyperslab views over HDF5-style hierarchical array storage.
//!
//! The crate sits between strongly typed in-memory arrays and a storage
//! backend that understands groups, datasets and rectangular selections. Its
//! pieces:
//!
//! - [`Hyperslab`] and [`Shape`] describe rectangular selections, and
//!   [`parent_shape_and_strides`] turns the flat element strides of any
//!   C-order view into an equivalent selection over a conceptual contiguous
//!   parent array.
//! - [`ArrayView`] bundles an element type, a data pointer and such a
//!   selection; constructors exist for scalars, slices, complex values and
//!   `ndarray` arrays.
//! - [`backend`] defines the storage traits and ships [`Mem`], a
//!   buffer-backed store usable without any external library.
//! - [`array_interface`] is the transfer protocol: create, validate and move
//!   data between views and datasets or attributes.
//! - [`Storable`] wraps the protocol for common Rust types.
//!
//! ```
//! use slabfile::backend::mem::MemStore;
//! use slabfile::Storable;
//!
//! let store = MemStore::buffer();
//! let data: Vec<f64> = (0..10).map(f64::from).collect();
//! data.write_to(&store, "samples", false)?;
//! assert_eq!(Vec::<f64>::read_from(&store, "samples")?, data);
//! # anyhow::Ok(())
//! ```

pub mod adapters;
pub mod array_interface;
pub mod backend;
pub mod slab;
pub mod view;

pub use adapters::Storable;
pub use array_interface::{
    dataset_info, read, read_attribute, write, write_attribute, write_slice, COMPLEX_ATTR,
};
pub use backend::{
    AttributeOp, Backend, BackendData, DataContainer, DatasetOp, GroupOp, Mem, ScalarType,
    StoreOp, TypeClass, WriteConfig,
};
pub use slab::{parent_shape_and_strides, Hyperslab, Shape};
pub use view::{ArrayView, DatasetInfo};
