//! Element type tags and the compile-time mapping from Rust scalars.

use anyhow::{bail, Result};
use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Tag describing the binary representation of a stored element.
///
/// `String` elements are single bytes of fixed-size byte-string data; a
/// string value occupies one dataspace element per byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
}

/// Coarse classification of element types. Reads may convert implicitly
/// within a class; conversion across classes is always an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeClass {
    Integer,
    Float,
    Bool,
    String,
}

impl ScalarType {
    /// Size of a single element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 | ScalarType::Bool | ScalarType::String => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub fn class(&self) -> TypeClass {
        match self {
            ScalarType::I8
            | ScalarType::I16
            | ScalarType::I32
            | ScalarType::I64
            | ScalarType::U8
            | ScalarType::U16
            | ScalarType::U32
            | ScalarType::U64 => TypeClass::Integer,
            ScalarType::F32 | ScalarType::F64 => TypeClass::Float,
            ScalarType::Bool => TypeClass::Bool,
            ScalarType::String => TypeClass::String,
        }
    }

    pub fn same_class(&self, other: &ScalarType) -> bool {
        self.class() == other.class()
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::I8 => write!(f, "i8"),
            ScalarType::I16 => write!(f, "i16"),
            ScalarType::I32 => write!(f, "i32"),
            ScalarType::I64 => write!(f, "i64"),
            ScalarType::U8 => write!(f, "u8"),
            ScalarType::U16 => write!(f, "u16"),
            ScalarType::U32 => write!(f, "u32"),
            ScalarType::U64 => write!(f, "u64"),
            ScalarType::F32 => write!(f, "f32"),
            ScalarType::F64 => write!(f, "f64"),
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::String => write!(f, "string"),
        }
    }
}

/// Rust scalars with a fixed-size stored representation.
pub trait BackendData: Copy + Default + Send + Sync + 'static {
    const DTYPE: ScalarType;
}

macro_rules! impl_backend_data {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl BackendData for $ty {
                const DTYPE: ScalarType = ScalarType::$variant;
            }
        )*
    };
}

impl_backend_data!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
);

fn read_int(bytes: &[u8], ty: ScalarType) -> i128 {
    match ty {
        ScalarType::I8 => i8::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::I16 => i16::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::I32 => i32::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::I64 => i64::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::U8 => u8::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::U16 => u16::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::U32 => u32::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        ScalarType::U64 => u64::from_ne_bytes(bytes.try_into().unwrap()) as i128,
        _ => unreachable!("not an integer type"),
    }
}

fn write_int(val: i128, ty: ScalarType, out: &mut [u8]) {
    match ty {
        ScalarType::I8 => out.copy_from_slice(&(val as i8).to_ne_bytes()),
        ScalarType::I16 => out.copy_from_slice(&(val as i16).to_ne_bytes()),
        ScalarType::I32 => out.copy_from_slice(&(val as i32).to_ne_bytes()),
        ScalarType::I64 => out.copy_from_slice(&(val as i64).to_ne_bytes()),
        ScalarType::U8 => out.copy_from_slice(&(val as u8).to_ne_bytes()),
        ScalarType::U16 => out.copy_from_slice(&(val as u16).to_ne_bytes()),
        ScalarType::U32 => out.copy_from_slice(&(val as u32).to_ne_bytes()),
        ScalarType::U64 => out.copy_from_slice(&(val as u64).to_ne_bytes()),
        _ => unreachable!("not an integer type"),
    }
}

fn read_float(bytes: &[u8], ty: ScalarType) -> f64 {
    match ty {
        ScalarType::F32 => f32::from_ne_bytes(bytes.try_into().unwrap()) as f64,
        ScalarType::F64 => f64::from_ne_bytes(bytes.try_into().unwrap()),
        _ => unreachable!("not a float type"),
    }
}

fn write_float(val: f64, ty: ScalarType, out: &mut [u8]) {
    match ty {
        ScalarType::F32 => out.copy_from_slice(&(val as f32).to_ne_bytes()),
        ScalarType::F64 => out.copy_from_slice(&val.to_ne_bytes()),
        _ => unreachable!("not a float type"),
    }
}

/// Convert a single element between two representations of the same type
/// class. `src` and `dst` must hold exactly `src_ty.size()` and
/// `dst_ty.size()` bytes.
pub(crate) fn convert_element(
    src: &[u8],
    src_ty: ScalarType,
    dst_ty: ScalarType,
    dst: &mut [u8],
) -> Result<()> {
    if src_ty == dst_ty {
        dst.copy_from_slice(src);
        return Ok(());
    }
    match (src_ty.class(), dst_ty.class()) {
        (TypeClass::Integer, TypeClass::Integer) => {
            write_int(read_int(src, src_ty), dst_ty, dst);
            Ok(())
        }
        (TypeClass::Float, TypeClass::Float) => {
            write_float(read_float(src, src_ty), dst_ty, dst);
            Ok(())
        }
        _ => bail!("cannot convert element from {} to {}", src_ty, dst_ty),
    }
}
