//! Persistence of meshes in a column store.
//!
//! A column store holds named one-dimensional datasets of fixed-size
//! records plus named integer attributes. Records are the little-endian
//! wire types of [`crate::algs::wire`], so a dataset written on one process
//! reads back on any other. [`DirStore`] keeps every dataset in a file of
//! its own; other backends only have to implement [`ColumnStore`].

pub mod dir_store;
pub mod hyperslab;
pub mod mesh_io;
pub mod throttle;

use bytemuck::Pod;

use crate::mesh_error::MeshStrataError;

pub use dir_store::DirStore;
pub use hyperslab::{Run, SelectOp, Selection};
pub use throttle::Throttle;

/// Named datasets of fixed-size records and named `i64` attributes.
///
/// Writes to disjoint selections of the same dataset may come from
/// different processes; everything else is expected on one process at a
/// time, with the caller placing barriers between creation and use.
pub trait ColumnStore {
    /// Create (or truncate) a dataset of `len` records of `elem_size` bytes.
    /// `chunk` is a storage hint in records.
    fn create_dataset(
        &self,
        name: &str,
        elem_size: usize,
        len: u64,
        chunk: u64,
    ) -> Result<(), MeshStrataError>;

    fn has_dataset(&self, name: &str) -> bool;

    /// Number of records in `name`.
    fn dataset_len(&self, name: &str) -> Result<u64, MeshStrataError>;

    /// Write the selected records, in selection order.
    fn write(&self, name: &str, sel: &Selection, data: &[u8]) -> Result<(), MeshStrataError>;

    /// Read the selected records, in selection order.
    fn read(&self, name: &str, sel: &Selection) -> Result<Vec<u8>, MeshStrataError>;

    fn write_attribute(&self, name: &str, values: &[i64]) -> Result<(), MeshStrataError>;

    fn read_attribute(&self, name: &str) -> Result<Vec<i64>, MeshStrataError>;

    fn flush(&self) -> Result<(), MeshStrataError>;
}

/// Typed write of `Pod` records.
pub fn write_records<S: ColumnStore + ?Sized, T: Pod>(
    store: &S,
    name: &str,
    sel: &Selection,
    records: &[T],
) -> Result<(), MeshStrataError> {
    store.write(name, sel, bytemuck::cast_slice(records))
}

/// Typed read of `Pod` records.
pub fn read_records<S: ColumnStore + ?Sized, T: Pod>(
    store: &S,
    name: &str,
    sel: &Selection,
) -> Result<Vec<T>, MeshStrataError> {
    let bytes = store.read(name, sel)?;
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(MeshStrataError::Persistence(format!(
            "dataset {name}: {} bytes do not hold whole {size}-byte records",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Single-valued attribute.
pub fn read_scalar<S: ColumnStore + ?Sized>(store: &S, name: &str) -> Result<i64, MeshStrataError> {
    match store.read_attribute(name)?.as_slice() {
        [v] => Ok(*v),
        other => Err(MeshStrataError::Persistence(format!(
            "attribute {name} holds {} values, expected one",
            other.len()
        ))),
    }
}
