//! Column store backed by a directory.
//!
//! Every dataset `<name>` is a raw file `<name>.bin` of little-endian
//! records next to a JSON header `<name>.json`; attributes live in
//! `attributes.json`. Several handles, one per process, may open the same
//! directory.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::ColumnStore;
use super::hyperslab::Selection;
use crate::mesh_error::MeshStrataError;

const DIR_STORE_VERSION: u32 = 1;
const ATTRIBUTES_FILE: &str = "attributes.json";

/// Header of one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHeader {
    pub version: u32,
    pub elem_size: usize,
    pub len: u64,
    pub chunk: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AttributeFile {
    version: u32,
    attributes: BTreeMap<String, Vec<i64>>,
}

#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    attributes: Mutex<BTreeMap<String, Vec<i64>>>,
}

impl DirStore {
    /// Open `path`, creating the directory if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, MeshStrataError> {
        fs::create_dir_all(path.as_ref())?;
        Self::open(path)
    }

    /// Open an existing store directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MeshStrataError> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(MeshStrataError::Persistence(format!(
                "{} is not a store directory",
                root.display()
            )));
        }
        let store = Self {
            root,
            attributes: Mutex::new(BTreeMap::new()),
        };
        *store.attributes.lock() = store.load_attributes()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.bin"))
    }

    fn header_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    pub fn header(&self, name: &str) -> Result<DatasetHeader, MeshStrataError> {
        let path = self.header_path(name);
        let bytes = fs::read(&path).map_err(|e| {
            MeshStrataError::Persistence(format!("dataset {name}: {}: {e}", path.display()))
        })?;
        let header: DatasetHeader = serde_json::from_slice(&bytes)?;
        if header.version != DIR_STORE_VERSION {
            return Err(MeshStrataError::Persistence(format!(
                "dataset {name} has version {}, expected {DIR_STORE_VERSION}",
                header.version
            )));
        }
        Ok(header)
    }

    fn load_attributes(&self) -> Result<BTreeMap<String, Vec<i64>>, MeshStrataError> {
        let path = self.root.join(ATTRIBUTES_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let file: AttributeFile = serde_json::from_slice(&fs::read(path)?)?;
        Ok(file.attributes)
    }

    /// Selection runs as byte ranges, checked against the header.
    fn byte_runs(
        &self,
        name: &str,
        sel: &Selection,
    ) -> Result<(DatasetHeader, Vec<(u64, usize)>), MeshStrataError> {
        let header = self.header(name)?;
        sel.check_bounds(header.len)?;
        let size = header.elem_size as u64;
        let runs = sel
            .runs(header.len)
            .into_iter()
            .map(|r| (r.start * size, (r.count * size) as usize))
            .collect();
        Ok((header, runs))
    }
}

impl ColumnStore for DirStore {
    fn create_dataset(
        &self,
        name: &str,
        elem_size: usize,
        len: u64,
        chunk: u64,
    ) -> Result<(), MeshStrataError> {
        if elem_size == 0 {
            return Err(MeshStrataError::InvalidArgument(format!(
                "dataset {name} needs a non-zero record size"
            )));
        }
        let header = DatasetHeader {
            version: DIR_STORE_VERSION,
            elem_size,
            len,
            chunk: chunk.max(1),
        };
        fs::write(self.header_path(name), serde_json::to_vec_pretty(&header)?)?;
        let file = File::create(self.data_path(name))?;
        file.set_len(len * elem_size as u64)?;
        log::trace!("created dataset {name}: {len} x {elem_size} bytes");
        Ok(())
    }

    fn has_dataset(&self, name: &str) -> bool {
        self.header_path(name).exists()
    }

    fn dataset_len(&self, name: &str) -> Result<u64, MeshStrataError> {
        Ok(self.header(name)?.len)
    }

    fn write(&self, name: &str, sel: &Selection, data: &[u8]) -> Result<(), MeshStrataError> {
        let (_, runs) = self.byte_runs(name, sel)?;
        let total: usize = runs.iter().map(|r| r.1).sum();
        if total != data.len() {
            return Err(MeshStrataError::Persistence(format!(
                "dataset {name}: selection covers {total} bytes, got {}",
                data.len()
            )));
        }
        let mut file = OpenOptions::new().write(true).open(self.data_path(name))?;
        let mut at = 0;
        for (offset, len) in runs {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&data[at..at + len])?;
            at += len;
        }
        Ok(())
    }

    fn read(&self, name: &str, sel: &Selection) -> Result<Vec<u8>, MeshStrataError> {
        let (_, runs) = self.byte_runs(name, sel)?;
        let total: usize = runs.iter().map(|r| r.1).sum();
        let mut out = vec![0u8; total];
        let mut file = File::open(self.data_path(name))?;
        let mut at = 0;
        for (offset, len) in runs {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut out[at..at + len])?;
            at += len;
        }
        Ok(out)
    }

    fn write_attribute(&self, name: &str, values: &[i64]) -> Result<(), MeshStrataError> {
        let mut attrs = self.attributes.lock();
        attrs.insert(name.to_string(), values.to_vec());
        let file = AttributeFile {
            version: DIR_STORE_VERSION,
            attributes: attrs.clone(),
        };
        fs::write(self.root.join(ATTRIBUTES_FILE), serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    fn read_attribute(&self, name: &str) -> Result<Vec<i64>, MeshStrataError> {
        let mut attrs = self.attributes.lock();
        if !attrs.contains_key(name) {
            // another handle may have written it since we opened
            *attrs = self.load_attributes()?;
        }
        attrs
            .get(name)
            .cloned()
            .ok_or_else(|| MeshStrataError::Persistence(format!("attribute {name} is missing")))
    }

    fn flush(&self) -> Result<(), MeshStrataError> {
        let path = self.root.join(ATTRIBUTES_FILE);
        if path.exists() {
            File::open(path)?.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mesh-strata-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    #[serial]
    fn scattered_runs_round_trip() {
        let dir = scratch("runs");
        let store = DirStore::create(&dir).unwrap();
        store.create_dataset("ids", 8, 10, 4).unwrap();
        let sel = Selection::from_sorted_indices(&[1, 2, 7]).unwrap();
        let data: Vec<u8> = [10i64, 20, 70].iter().flat_map(|v| v.to_le_bytes()).collect();
        store.write("ids", &sel, &data).unwrap();

        assert_eq!(store.read("ids", &sel).unwrap(), data);
        let all = store.read("ids", &Selection::All).unwrap();
        assert_eq!(all.len(), 80);
        assert_eq!(&all[..8], &[0u8; 8]);
        assert!(store.write("ids", &sel, &data[..16]).is_err());
        assert!(store.read("ids", &Selection::range(8, 3)).is_err());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    #[serial]
    fn attributes_are_shared_between_handles() {
        let dir = scratch("attrs");
        let a = DirStore::create(&dir).unwrap();
        let b = DirStore::open(&dir).unwrap();
        a.write_attribute("__num_elems__", &[4, 36]).unwrap();
        assert_eq!(b.read_attribute("__num_elems__").unwrap(), vec![4, 36]);
        assert!(b.read_attribute("__missing__").is_err());
        assert!(!b.has_dataset("elements"));
        fs::remove_dir_all(dir).unwrap();
    }
}
