//! Typed read/write of common Rust values on top of the array protocol.
//!
//! [`Storable`] turns a value into an [`ArrayView`] and back, so that scalars,
//! strings, vectors and `ndarray` arrays can be stored with a single call
//! instead of constructing views by hand.

use crate::array_interface::{self, dataset_info};
use crate::backend::{Backend, BackendData, GroupOp, ScalarType};
use crate::view::ArrayView;

use anyhow::{ensure, Context, Result};
use ndarray::{Array, ArrayD, Dimension, IxDyn};
use num::complex::Complex;

/// Values that can be written to and read back from a dataset.
pub trait Storable: Sized {
    /// Short name identifying the stored format of this type, for round-trip
    /// format checks by callers that persist heterogeneous values.
    fn type_tag() -> String;

    /// Store the value as a dataset named `name`, replacing any existing one.
    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>;

    /// Read a previously stored value back.
    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>;
}

macro_rules! impl_storable_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Storable for $ty {
                fn type_tag() -> String {
                    <$ty as BackendData>::DTYPE.to_string()
                }

                fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
                where
                    B: Backend,
                    G: GroupOp<B>,
                {
                    array_interface::write(group, name, &ArrayView::from_scalar(self), compress)
                }

                fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
                where
                    B: Backend,
                    G: GroupOp<B>,
                {
                    let mut value = <$ty>::default();
                    array_interface::read(
                        group,
                        name,
                        &ArrayView::from_scalar_mut(&mut value),
                        None,
                    )?;
                    Ok(value)
                }
            }
        )*
    };
}

impl_storable_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool);

/// Strings are stored as rank-1 datasets of string bytes.
impl Storable for String {
    fn type_tag() -> String {
        "string".to_string()
    }

    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let mut view = ArrayView::from_slice(self.as_bytes());
        view.dtype = ScalarType::String;
        array_interface::write(group, name, &view, compress)
    }

    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let info = dataset_info(group, name)?;
        ensure!(
            info.rank() == 1,
            "reading string '{}': expected a rank-1 dataset, found rank {}",
            name,
            info.rank()
        );
        let mut bytes = vec![0u8; info.lengths.size()];
        let mut view = ArrayView::from_slice_mut(&mut bytes);
        view.dtype = ScalarType::String;
        array_interface::read(group, name, &view, None)?;
        String::from_utf8(bytes).with_context(|| format!("dataset '{}' is not valid UTF-8", name))
    }
}

impl<T: BackendData> Storable for Vec<T> {
    fn type_tag() -> String {
        format!("vec<{}>", T::DTYPE)
    }

    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        array_interface::write(group, name, &ArrayView::from_slice(self), compress)
    }

    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let info = dataset_info(group, name)?;
        ensure!(
            info.rank() == 1,
            "reading vector '{}': expected a rank-1 dataset, found rank {}",
            name,
            info.rank()
        );
        let mut data = vec![T::default(); info.lengths.size()];
        array_interface::read(group, name, &ArrayView::from_slice_mut(&mut data), None)?;
        Ok(data)
    }
}

impl<T: BackendData> Storable for Complex<T> {
    fn type_tag() -> String {
        format!("complex<{}>", T::DTYPE)
    }

    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        array_interface::write(group, name, &ArrayView::from_complex_scalar(self), compress)
    }

    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let info = dataset_info(group, name)?;
        ensure!(
            info.is_complex,
            "reading complex scalar '{}': dataset does not carry the complex marker",
            name
        );
        let mut value = Complex::new(T::default(), T::default());
        array_interface::read(
            group,
            name,
            &ArrayView::from_complex_scalar_mut(&mut value),
            None,
        )?;
        Ok(value)
    }
}

impl<T: BackendData> Storable for Vec<Complex<T>> {
    fn type_tag() -> String {
        format!("vec<complex<{}>>", T::DTYPE)
    }

    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        array_interface::write(group, name, &ArrayView::from_complex_slice(self), compress)
    }

    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let info = dataset_info(group, name)?;
        ensure!(
            info.is_complex,
            "reading complex vector '{}': dataset does not carry the complex marker",
            name
        );
        ensure!(
            info.rank() == 2,
            "reading complex vector '{}': expected a rank-2 dataset, found rank {}",
            name,
            info.rank()
        );
        let mut data = vec![Complex::new(T::default(), T::default()); info.lengths[0]];
        array_interface::read(
            group,
            name,
            &ArrayView::from_complex_slice_mut(&mut data),
            None,
        )?;
        Ok(data)
    }
}

impl<T: BackendData, D: Dimension> Storable for Array<T, D> {
    fn type_tag() -> String {
        format!("array<{}>", T::DTYPE)
    }

    fn write_to<B, G>(&self, group: &G, name: &str, compress: bool) -> Result<()>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        // reversed or broadcast axes carry non-positive strides; copy those
        // into standard layout before building the view
        if self.strides().iter().all(|&s| s > 0) || self.len() <= 1 {
            array_interface::write(group, name, &ArrayView::from_ndarray(self)?, compress)
        } else {
            let standard = self.as_standard_layout();
            array_interface::write(group, name, &ArrayView::from_ndarray(&standard)?, compress)
        }
    }

    fn read_from<B, G>(group: &G, name: &str) -> Result<Self>
    where
        B: Backend,
        G: GroupOp<B>,
    {
        let info = dataset_info(group, name)?;
        let mut data: ArrayD<T> = ArrayD::default(IxDyn(info.lengths.as_ref()));
        array_interface::read(group, name, &ArrayView::from_ndarray_mut(&mut data)?, None)?;
        data.into_dimensionality::<D>().with_context(|| {
            format!(
                "dataset '{}' of shape {} does not fit the requested dimensionality",
                name, info.lengths
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mem::MemStore;

    #[test]
    fn type_tags() {
        assert_eq!(f32::type_tag(), "f32");
        assert_eq!(String::type_tag(), "string");
        assert_eq!(<Vec<u64>>::type_tag(), "vec<u64>");
        assert_eq!(<Vec<Complex<f64>>>::type_tag(), "vec<complex<f64>>");
    }

    #[test]
    fn scalar_round_trip() {
        let store = MemStore::buffer();
        42i32.write_to(&store, "answer", false).unwrap();
        assert_eq!(i32::read_from(&store, "answer").unwrap(), 42);
    }

    #[test]
    fn string_round_trip() {
        let store = MemStore::buffer();
        let text = String::from("hello world");
        text.write_to(&store, "greeting", false).unwrap();
        assert_eq!(String::read_from(&store, "greeting").unwrap(), text);
    }

    #[test]
    fn vector_round_trip() {
        let store = MemStore::buffer();
        let data: Vec<f64> = (0..100).map(|i| i as f64 / 3.0).collect();
        data.write_to(&store, "samples", true).unwrap();
        assert_eq!(Vec::<f64>::read_from(&store, "samples").unwrap(), data);
    }

    #[test]
    fn complex_vector_round_trip() {
        let store = MemStore::buffer();
        let data: Vec<Complex<f64>> =
            (0..10).map(|i| Complex::new(i as f64, -(i as f64))).collect();
        data.write_to(&store, "z", false).unwrap();
        assert_eq!(Vec::<Complex<f64>>::read_from(&store, "z").unwrap(), data);
    }

    #[test]
    fn ndarray_round_trip_through_reversed_axes() {
        use ndarray::{Array2, Axis};

        let store = MemStore::buffer();
        let mut arr = Array2::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as i64);
        arr.invert_axis(Axis(0));
        arr.write_to(&store, "m", false).unwrap();
        assert_eq!(Array2::<i64>::read_from(&store, "m").unwrap(), arr);
    }
}
