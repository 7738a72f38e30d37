//! In-memory backend: a buffer-backed instantiation of the group
//! abstraction.
//!
//! The store is a tree of group and dataset nodes behind reference-counted
//! handles; cloning a handle shares the node, dropping the last handle
//! releases it. Unlinked objects stay alive while a handle still points at
//! them. A store can be snapshotted to a byte buffer (and back) or flushed
//! to a file on close, with chunked datasets deflated per chunk.

use super::datatype::{convert_element, ScalarType};
use super::{AttributeOp, Backend, DatasetOp, GroupOp, StoreOp, WriteConfig};
use crate::slab::{Hyperslab, Shape};
use crate::view::ArrayView;

use anyhow::{anyhow, bail, ensure, Context, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Mem;

type NodeRef = Arc<RwLock<Node>>;

enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
}

#[derive(Default)]
struct GroupNode {
    children: IndexMap<String, NodeRef>,
    attrs: IndexMap<String, Attr>,
}

struct DatasetNode {
    dtype: ScalarType,
    shape: Shape,
    data: Vec<u8>,
    config: WriteConfig,
    attrs: IndexMap<String, Attr>,
}

#[derive(Clone, Serialize, Deserialize)]
struct Attr {
    dtype: ScalarType,
    lengths: Shape,
    data: Vec<u8>,
}

impl Node {
    fn as_group(&self) -> Result<&GroupNode> {
        match self {
            Node::Group(g) => Ok(g),
            Node::Dataset(_) => bail!("object is a dataset, not a group"),
        }
    }

    fn as_group_mut(&mut self) -> Result<&mut GroupNode> {
        match self {
            Node::Group(g) => Ok(g),
            Node::Dataset(_) => bail!("object is a dataset, not a group"),
        }
    }

    fn as_dataset(&self) -> Result<&DatasetNode> {
        match self {
            Node::Dataset(d) => Ok(d),
            Node::Group(_) => bail!("object is a group, not a dataset"),
        }
    }

    fn as_dataset_mut(&mut self) -> Result<&mut DatasetNode> {
        match self {
            Node::Dataset(d) => Ok(d),
            Node::Group(_) => bail!("object is a group, not a dataset"),
        }
    }

    fn attrs(&self) -> &IndexMap<String, Attr> {
        match self {
            Node::Group(g) => &g.attrs,
            Node::Dataset(d) => &d.attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut IndexMap<String, Attr> {
        match self {
            Node::Group(g) => &mut g.attrs,
            Node::Dataset(d) => &mut d.attrs,
        }
    }
}

/// Handle to a memory store. Cloning shares the underlying tree.
#[derive(Clone)]
pub struct MemStore {
    root: NodeRef,
    path: Option<PathBuf>,
    writable: bool,
}

/// Handle to a group node.
#[derive(Clone)]
pub struct MemGroup {
    node: NodeRef,
    path: PathBuf,
}

/// Handle to a dataset node.
#[derive(Clone)]
pub struct MemDataset {
    node: NodeRef,
    path: PathBuf,
}

fn new_root() -> NodeRef {
    Arc::new(RwLock::new(Node::Group(GroupNode::default())))
}

impl Backend for Mem {
    const NAME: &'static str = "mem";

    type Store = MemStore;
    type Group = MemGroup;
    type Dataset = MemDataset;

    fn new<P: AsRef<Path>>(path: P) -> Result<Self::Store> {
        let store = MemStore {
            root: new_root(),
            path: Some(path.as_ref().to_path_buf()),
            writable: true,
        };
        store.flush()?;
        Ok(store)
    }

    fn open<P: AsRef<Path>>(path: P) -> Result<Self::Store> {
        MemStore::load(path.as_ref(), false)
    }

    fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self::Store> {
        MemStore::load(path.as_ref(), true)
    }
}

impl MemStore {
    /// A store without a backing file, for pure byte-buffer serialization.
    pub fn buffer() -> Self {
        Self {
            root: new_root(),
            path: None,
            writable: true,
        }
    }

    /// Serialize the whole tree into a byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&snapshot(&self.root)?)?)
    }

    /// Rebuild a store from a buffer produced by [`MemStore::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let node: SerNode = bincode::deserialize(bytes)?;
        Ok(Self {
            root: restore(node)?,
            path: None,
            writable: true,
        })
    }

    fn load(path: &Path, writable: bool) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("opening store at '{}'", path.display()))?;
        let mut store = Self::from_bytes(&bytes)
            .with_context(|| format!("decoding store at '{}'", path.display()))?;
        store.path = Some(path.to_path_buf());
        store.writable = writable;
        Ok(store)
    }

    fn flush(&self) -> Result<()> {
        if let (Some(path), true) = (&self.path, self.writable) {
            std::fs::write(path, self.to_bytes()?)
                .with_context(|| format!("writing store to '{}'", path.display()))?;
        }
        Ok(())
    }
}

impl StoreOp<Mem> for MemStore {
    fn filename(&self) -> PathBuf {
        self.path.clone().unwrap_or_default()
    }

    fn close(self) -> Result<()> {
        self.flush()
    }
}

// Group operations, shared between the store root and group handles.

fn list(node: &NodeRef, path: &Path) -> Result<Vec<String>> {
    let guard = node.read();
    let group = guard
        .as_group()
        .with_context(|| format!("listing '{}'", path.display()))?;
    Ok(group.children.keys().cloned().collect())
}

fn new_group(node: &NodeRef, path: &Path, name: &str) -> Result<MemGroup> {
    let mut guard = node.write();
    let group = guard
        .as_group_mut()
        .with_context(|| format!("creating group '{}' in '{}'", name, path.display()))?;
    ensure!(
        !group.children.contains_key(name),
        "'{}' already exists in group '{}'",
        name,
        path.display()
    );
    let child = new_root();
    group.children.insert(name.to_string(), child.clone());
    Ok(MemGroup {
        node: child,
        path: path.join(name),
    })
}

fn open_group(node: &NodeRef, path: &Path, name: &str) -> Result<MemGroup> {
    let guard = node.read();
    let group = guard.as_group()?;
    let child = group
        .children
        .get(name)
        .ok_or_else(|| anyhow!("no group named '{}' in '{}'", name, path.display()))?;
    child
        .read()
        .as_group()
        .with_context(|| format!("opening group '{}' in '{}'", name, path.display()))?;
    Ok(MemGroup {
        node: child.clone(),
        path: path.join(name),
    })
}

fn new_dataset(
    node: &NodeRef,
    path: &Path,
    name: &str,
    dtype: ScalarType,
    shape: &Shape,
    config: WriteConfig,
) -> Result<MemDataset> {
    let mut guard = node.write();
    let group = guard
        .as_group_mut()
        .with_context(|| format!("creating dataset '{}' in '{}'", name, path.display()))?;
    ensure!(
        !group.children.contains_key(name),
        "'{}' already exists in group '{}'",
        name,
        path.display()
    );
    let child = Arc::new(RwLock::new(Node::Dataset(DatasetNode {
        dtype,
        shape: shape.clone(),
        data: vec![0u8; shape.size() * dtype.size()],
        config,
        attrs: IndexMap::new(),
    })));
    group.children.insert(name.to_string(), child.clone());
    Ok(MemDataset {
        node: child,
        path: path.join(name),
    })
}

fn open_dataset(node: &NodeRef, path: &Path, name: &str) -> Result<MemDataset> {
    let guard = node.read();
    let group = guard.as_group()?;
    let child = group
        .children
        .get(name)
        .ok_or_else(|| anyhow!("no dataset named '{}' in '{}'", name, path.display()))?;
    child
        .read()
        .as_dataset()
        .with_context(|| format!("opening dataset '{}' in '{}'", name, path.display()))?;
    Ok(MemDataset {
        node: child.clone(),
        path: path.join(name),
    })
}

fn delete(node: &NodeRef, path: &Path, name: &str) -> Result<()> {
    let mut guard = node.write();
    let group = guard.as_group_mut()?;
    group
        .children
        .shift_remove(name)
        .ok_or_else(|| anyhow!("no object named '{}' in '{}'", name, path.display()))?;
    Ok(())
}

fn exists(node: &NodeRef, name: &str) -> Result<bool> {
    Ok(node.read().as_group()?.children.contains_key(name))
}

macro_rules! impl_group_op {
    ($ty:ty, $node:ident, $path:expr) => {
        impl GroupOp<Mem> for $ty {
            fn list(&self) -> Result<Vec<String>> {
                list(&self.$node, &$path(self))
            }

            fn new_group(&self, name: &str) -> Result<MemGroup> {
                new_group(&self.$node, &$path(self), name)
            }

            fn open_group(&self, name: &str) -> Result<MemGroup> {
                open_group(&self.$node, &$path(self), name)
            }

            fn new_dataset(
                &self,
                name: &str,
                dtype: ScalarType,
                shape: &Shape,
                config: WriteConfig,
            ) -> Result<MemDataset> {
                new_dataset(&self.$node, &$path(self), name, dtype, shape, config)
            }

            fn open_dataset(&self, name: &str) -> Result<MemDataset> {
                open_dataset(&self.$node, &$path(self), name)
            }

            fn delete(&self, name: &str) -> Result<()> {
                delete(&self.$node, &$path(self), name)
            }

            fn exists(&self, name: &str) -> Result<bool> {
                exists(&self.$node, name)
            }

            fn path(&self) -> PathBuf {
                $path(self)
            }
        }
    };
}

impl_group_op!(MemStore, root, |_s: &MemStore| PathBuf::from("/"));
impl_group_op!(MemGroup, node, |g: &MemGroup| g.path.clone());

// Attribute operations, shared between groups and datasets.

fn create_attr(node: &NodeRef, path: &Path, name: &str, value: &ArrayView<'_>) -> Result<()> {
    let mut guard = node.write();
    let attrs = guard.attrs_mut();
    ensure!(
        !attrs.contains_key(name),
        "attribute '{}' already exists at '{}'",
        name,
        path.display()
    );
    let esz = value.dtype.size();
    let offsets = value.mem_offsets()?;
    let mut data = vec![0u8; offsets.len() * esz];
    for (k, off) in offsets.iter().enumerate() {
        unsafe {
            std::ptr::copy_nonoverlapping(
                value.data_ptr().add(off * esz),
                data.as_mut_ptr().add(k * esz),
                esz,
            );
        }
    }
    attrs.insert(
        name.to_string(),
        Attr {
            dtype: value.dtype,
            lengths: value.slab.shape(),
            data,
        },
    );
    Ok(())
}

fn read_attr(node: &NodeRef, path: &Path, name: &str, value: &ArrayView<'_>) -> Result<()> {
    let guard = node.read();
    let attr = guard
        .attrs()
        .get(name)
        .ok_or_else(|| anyhow!("no attribute named '{}' at '{}'", name, path.display()))?;
    ensure!(
        attr.dtype == value.dtype,
        "attribute '{}' at '{}' has type {}, expected {}",
        name,
        path.display(),
        attr.dtype,
        value.dtype
    );
    let esz = attr.dtype.size();
    let offsets = value.mem_offsets()?;
    ensure!(
        offsets.len() * esz == attr.data.len(),
        "attribute '{}' at '{}' holds {} elements, the view selects {}",
        name,
        path.display(),
        attr.data.len() / esz,
        offsets.len()
    );
    for (k, off) in offsets.iter().enumerate() {
        unsafe {
            std::ptr::copy_nonoverlapping(
                attr.data.as_ptr().add(k * esz),
                value.data_ptr().add(off * esz),
                esz,
            );
        }
    }
    Ok(())
}

fn attr_meta<T>(node: &NodeRef, path: &Path, name: &str, f: impl FnOnce(&Attr) -> T) -> Result<T> {
    let guard = node.read();
    let attr = guard
        .attrs()
        .get(name)
        .ok_or_else(|| anyhow!("no attribute named '{}' at '{}'", name, path.display()))?;
    Ok(f(attr))
}

macro_rules! impl_attribute_op {
    ($ty:ty) => {
        impl AttributeOp<Mem> for $ty {
            fn path(&self) -> PathBuf {
                self.path.clone()
            }

            fn create_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()> {
                create_attr(&self.node, &self.path, name, value)
            }

            fn read_attr(&self, name: &str, value: &ArrayView<'_>) -> Result<()> {
                read_attr(&self.node, &self.path, name, value)
            }

            fn attr_rank(&self, name: &str) -> Result<usize> {
                attr_meta(&self.node, &self.path, name, |a| a.lengths.ndim())
            }

            fn attr_dtype(&self, name: &str) -> Result<ScalarType> {
                attr_meta(&self.node, &self.path, name, |a| a.dtype)
            }

            fn has_attr(&self, name: &str) -> bool {
                self.node.read().attrs().contains_key(name)
            }
        }
    };
}

impl_attribute_op!(MemGroup);
impl_attribute_op!(MemDataset);

impl MemDataset {
    fn with_dataset<T>(&self, f: impl FnOnce(&DatasetNode) -> Result<T>) -> Result<T> {
        let guard = self.node.read();
        let ds = guard
            .as_dataset()
            .with_context(|| format!("accessing dataset '{}'", self.path.display()))?;
        f(ds)
    }
}

impl DatasetOp<Mem> for MemDataset {
    fn dtype(&self) -> Result<ScalarType> {
        self.with_dataset(|ds| Ok(ds.dtype))
    }

    fn shape(&self) -> Shape {
        match &*self.node.read() {
            Node::Dataset(ds) => ds.shape.clone(),
            Node::Group(_) => unreachable!("dataset handle points at a group"),
        }
    }

    fn write_view(&self, selection: Option<&Hyperslab>, value: &ArrayView<'_>) -> Result<()> {
        let mut guard = self.node.write();
        let ds = guard
            .as_dataset_mut()
            .with_context(|| format!("writing dataset '{}'", self.path.display()))?;
        let file_offsets = match selection {
            Some(slab) => slab.offsets(&ds.shape)?,
            None => (0..ds.shape.size()).collect(),
        };
        let mem_offsets = value.mem_offsets()?;
        ensure!(
            file_offsets.len() == mem_offsets.len(),
            "writing dataset '{}': selection sizes differ ({} stored vs {} in memory)",
            self.path.display(),
            file_offsets.len(),
            mem_offsets.len()
        );
        let ssz = value.dtype.size();
        let dsz = ds.dtype.size();
        for (fo, mo) in file_offsets.into_iter().zip(mem_offsets) {
            let src = unsafe { std::slice::from_raw_parts(value.data_ptr().add(mo * ssz), ssz) };
            convert_element(
                src,
                value.dtype,
                ds.dtype,
                &mut ds.data[fo * dsz..(fo + 1) * dsz],
            )?;
        }
        Ok(())
    }

    fn read_view(&self, selection: Option<&Hyperslab>, value: &ArrayView<'_>) -> Result<()> {
        self.with_dataset(|ds| {
            let file_offsets = match selection {
                Some(slab) => slab.offsets(&ds.shape)?,
                None => (0..ds.shape.size()).collect(),
            };
            let mem_offsets = value.mem_offsets()?;
            ensure!(
                file_offsets.len() == mem_offsets.len(),
                "reading dataset '{}': selection sizes differ ({} stored vs {} in memory)",
                self.path.display(),
                file_offsets.len(),
                mem_offsets.len()
            );
            let ssz = ds.dtype.size();
            let dsz = value.dtype.size();
            for (fo, mo) in file_offsets.into_iter().zip(mem_offsets) {
                let dst = unsafe {
                    std::slice::from_raw_parts_mut(value.data_ptr().add(mo * dsz), dsz)
                };
                convert_element(&ds.data[fo * ssz..(fo + 1) * ssz], ds.dtype, value.dtype, dst)?;
            }
            Ok(())
        })
    }
}

// Serialized form. Chunked datasets keep one deflated blob per chunk.

#[derive(Serialize, Deserialize)]
enum SerNode {
    Group {
        children: IndexMap<String, SerNode>,
        attrs: IndexMap<String, Attr>,
    },
    Dataset {
        dtype: ScalarType,
        shape: Shape,
        compression: Option<u32>,
        chunk: Option<Shape>,
        attrs: IndexMap<String, Attr>,
        data: SerData,
    },
}

#[derive(Serialize, Deserialize)]
enum SerData {
    Raw(Vec<u8>),
    Chunked(Vec<Vec<u8>>),
}

fn chunk_origins(shape: &Shape, chunk: &Shape) -> Vec<Vec<usize>> {
    shape
        .iter()
        .zip(chunk.iter())
        .map(|(&s, &c)| (0..s).step_by(c.max(1)).collect::<Vec<_>>())
        .multi_cartesian_product()
        .collect()
}

fn chunk_slab(origin: &[usize], chunk: &Shape, shape: &Shape) -> Hyperslab {
    let rank = shape.ndim();
    let mut slab = Hyperslab::new(rank, false);
    for d in 0..rank {
        slab.offset[d] = origin[d];
        slab.count[d] = chunk[d].min(shape[d] - origin[d]);
    }
    slab
}

fn snapshot(node: &NodeRef) -> Result<SerNode> {
    let guard = node.read();
    match &*guard {
        Node::Group(group) => {
            let mut children = IndexMap::new();
            for (name, child) in &group.children {
                children.insert(name.clone(), snapshot(child)?);
            }
            Ok(SerNode::Group {
                children,
                attrs: group.attrs.clone(),
            })
        }
        Node::Dataset(ds) => {
            let esz = ds.dtype.size();
            let data = match (&ds.config.compression, &ds.config.chunk) {
                (Some(level), Some(chunk)) if ds.shape.ndim() > 0 && ds.shape.size() > 0 => {
                    let mut tiles = Vec::new();
                    for origin in chunk_origins(&ds.shape, chunk) {
                        let offsets =
                            chunk_slab(&origin, chunk, &ds.shape).offsets(&ds.shape)?;
                        let mut raw = Vec::with_capacity(offsets.len() * esz);
                        for off in offsets {
                            raw.extend_from_slice(&ds.data[off * esz..(off + 1) * esz]);
                        }
                        let mut enc =
                            ZlibEncoder::new(Vec::new(), flate2::Compression::new(*level));
                        enc.write_all(&raw)?;
                        tiles.push(enc.finish()?);
                    }
                    SerData::Chunked(tiles)
                }
                _ => SerData::Raw(ds.data.clone()),
            };
            Ok(SerNode::Dataset {
                dtype: ds.dtype,
                shape: ds.shape.clone(),
                compression: ds.config.compression,
                chunk: ds.config.chunk.clone(),
                attrs: ds.attrs.clone(),
                data,
            })
        }
    }
}

fn restore(node: SerNode) -> Result<NodeRef> {
    match node {
        SerNode::Group { children, attrs } => {
            let mut group = GroupNode {
                children: IndexMap::new(),
                attrs,
            };
            for (name, child) in children {
                group.children.insert(name, restore(child)?);
            }
            Ok(Arc::new(RwLock::new(Node::Group(group))))
        }
        SerNode::Dataset {
            dtype,
            shape,
            compression,
            chunk,
            attrs,
            data,
        } => {
            let esz = dtype.size();
            let bytes = match data {
                SerData::Raw(bytes) => {
                    ensure!(
                        bytes.len() == shape.size() * esz,
                        "stored dataset length does not match its shape {}",
                        shape
                    );
                    bytes
                }
                SerData::Chunked(tiles) => {
                    let chunk_shape = chunk
                        .as_ref()
                        .ok_or_else(|| anyhow!("chunked dataset without a chunk shape"))?;
                    let origins = chunk_origins(&shape, chunk_shape);
                    ensure!(
                        origins.len() == tiles.len(),
                        "chunked dataset holds {} tiles, expected {}",
                        tiles.len(),
                        origins.len()
                    );
                    let mut bytes = vec![0u8; shape.size() * esz];
                    for (origin, tile) in origins.iter().zip(tiles) {
                        let offsets =
                            chunk_slab(origin, chunk_shape, &shape).offsets(&shape)?;
                        let mut raw = Vec::with_capacity(offsets.len() * esz);
                        ZlibDecoder::new(&tile[..]).read_to_end(&mut raw)?;
                        ensure!(
                            raw.len() == offsets.len() * esz,
                            "chunk at {:?} inflated to {} bytes, expected {}",
                            origin,
                            raw.len(),
                            offsets.len() * esz
                        );
                        for (k, off) in offsets.into_iter().enumerate() {
                            bytes[off * esz..(off + 1) * esz]
                                .copy_from_slice(&raw[k * esz..(k + 1) * esz]);
                        }
                    }
                    bytes
                }
            };
            Ok(Arc::new(RwLock::new(Node::Dataset(DatasetNode {
                dtype,
                shape,
                data: bytes,
                config: WriteConfig { compression, chunk },
                attrs,
            }))))
        }
    }
}
