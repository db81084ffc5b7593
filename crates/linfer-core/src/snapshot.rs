//! Parameter store: one immutable, fully-loaded snapshot file.
//!
//! A [`Snapshot`] is built entirely by parsing a file and never mutated
//! afterwards. Hot reload replaces it wholesale.

use crate::error::{Error, Result};
use crate::formats::snapshot::{FieldIndex, SectionStats, SnapshotParser};
use crate::tensor::Tensor;
use ndarray::{ArrayD, Axis};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

/// In-memory parameters of one model version
#[derive(Debug)]
pub struct Snapshot {
    path: Option<PathBuf>,
    model_name: String,
    version: u64,
    /// Named tensors (weights, embedding tables)
    tensors: HashMap<String, Tensor>,
    /// Categorical index tables (field -> feature -> id)
    index: HashMap<String, FieldIndex>,
    stats: SectionStats,
}

impl Snapshot {
    /// Load and fully parse a snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut snapshot = Self::parse(BufReader::new(file), file_size)?;
        snapshot.path = Some(path.to_path_buf());
        log::info!(
            "Load {} ({} v{}, {:?}) OK!",
            path.display(),
            snapshot.model_name,
            snapshot.version,
            snapshot.stats
        );
        Ok(snapshot)
    }

    /// Parse a snapshot held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(Cursor::new(bytes), bytes.len() as u64)
    }

    fn parse<R: std::io::Read + std::io::Seek>(reader: R, file_size: u64) -> Result<Self> {
        let parsed = SnapshotParser::new(reader, file_size).parse()?;
        Ok(Self {
            path: None,
            model_name: parsed.header.model_name,
            version: parsed.header.version,
            tensors: parsed.data,
            index: parsed.index,
            stats: parsed.stats,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// File this snapshot was loaded from (`None` for in-memory parses)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn stats(&self) -> SectionStats {
        self.stats
    }

    /// Raw tensor accessor
    pub fn get_tensor(&self, field: &str) -> Option<&Tensor> {
        self.tensors.get(field)
    }

    pub fn get_index(&self, field: &str) -> Option<&FieldIndex> {
        self.index.get(field)
    }

    /// Sorted tensor names
    pub fn tensor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted names of fields with an index table
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Gather rows `ids` of the embedding table for `field`.
    ///
    /// The result has shape `[ids.len(), dim...]`.
    pub fn embedding_lookup(&self, field: &str, ids: &[i64]) -> Result<ArrayD<f32>> {
        let table = self
            .tensors
            .get(field)
            .ok_or_else(|| Error::FieldNotFound(field.to_string()))?
            .expect_f32(field)?;
        if table.ndim() == 0 {
            return Err(Error::InvalidShape(format!("embedding table {} is a scalar", field)));
        }

        let rows = table.len_of(Axis(0));
        let mut indices = Vec::with_capacity(ids.len());
        for &id in ids {
            if id < 0 || id as usize >= rows {
                return Err(Error::IdOutOfRange { field: field.to_string(), id, bound: rows });
            }
            indices.push(id as usize);
        }
        Ok(table.select(Axis(0), &indices))
    }

    /// Resolve feature strings to ids through the index table of `field`.
    ///
    /// Features missing from the table take the id of `default_feature`,
    /// which is resolved at most once. A default that is itself missing is
    /// an error.
    pub fn index_lookup<'a, I>(
        &self,
        field: &str,
        default_feature: &str,
        features: I,
    ) -> Result<Vec<i64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let table = &self
            .index
            .get(field)
            .ok_or_else(|| Error::FieldNotFound(field.to_string()))?
            .records;

        let mut default_id = None;
        let mut ids = Vec::new();
        for feature in features {
            let id = match (table.get(feature), default_id) {
                (Some(&id), _) => id,
                (None, Some(id)) => id,
                (None, None) => {
                    let id = *table.get(default_feature).ok_or_else(|| {
                        Error::DefaultFeatureMissing {
                            field: field.to_string(),
                            feature: default_feature.to_string(),
                        }
                    })?;
                    default_id = Some(id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::SnapshotWriter;

    fn fixture() -> Snapshot {
        let f1 = Tensor::from_f32(&[3, 3], vec![1., 2., 3., 4., 5., 6., 7., 8., 9.]).unwrap();
        let f2 = Tensor::from_f32(&[2, 4], vec![3., 4., 5., 6., 0., 2., 4., 1.]).unwrap();
        let bytes = SnapshotWriter::new("wide_deep", 1)
            .add_tensor("F1", &f1)
            .add_tensor("F2", &f2)
            .add_field_index("F1", 3, [("125", 0), ("124", 1), ("123", 2)])
            .add_field_index("F2", 4, [("0", 0), ("1", 1)])
            .encode()
            .unwrap();
        Snapshot::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_introspection() {
        let s = fixture();
        assert_eq!(s.model_name(), "wide_deep");
        assert_eq!(s.version(), 1);
        assert_eq!(s.tensor_names(), vec!["F1", "F2"]);
        assert_eq!(s.field_names(), vec!["F1", "F2"]);
        assert!(s.path().is_none());
        assert_eq!(s.get_tensor("F2").unwrap().shape(), &[2, 4]);
        assert!(s.get_tensor("F3").is_none());
    }

    #[test]
    fn test_embedding_lookup_stacks_rows() {
        let s = fixture();
        let rows = s.embedding_lookup("F1", &[2, 0, 2]).unwrap();
        assert_eq!(rows.shape(), &[3, 3]);
        let values: Vec<f32> = rows.iter().copied().collect();
        assert_eq!(values, vec![7., 8., 9., 1., 2., 3., 7., 8., 9.]);
    }

    #[test]
    fn test_embedding_lookup_errors() {
        let s = fixture();
        assert!(matches!(s.embedding_lookup("F9", &[0]).unwrap_err(), Error::FieldNotFound(_)));
        assert!(matches!(
            s.embedding_lookup("F2", &[2]).unwrap_err(),
            Error::IdOutOfRange { id: 2, bound: 2, .. }
        ));
        assert!(s.embedding_lookup("F2", &[-1]).is_err());
    }

    #[test]
    fn test_index_lookup_with_default() {
        let s = fixture();
        let ids = s.index_lookup("F1", "124", ["123", "zzz", "125", "yyy"]).unwrap();
        assert_eq!(ids, vec![2, 1, 0, 1]);
    }

    #[test]
    fn test_index_lookup_missing_default_fails() {
        let s = fixture();
        // all hits never need the default
        assert_eq!(s.index_lookup("F1", "nope", ["123"]).unwrap(), vec![2]);
        let err = s.index_lookup("F1", "nope", ["123", "zzz"]).unwrap_err();
        assert!(matches!(err, Error::DefaultFeatureMissing { .. }));
        assert!(matches!(
            s.index_lookup("F7", "0", ["0"]).unwrap_err(),
            Error::FieldNotFound(_)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = Tensor::from_i64(&[2], vec![7, 8]).unwrap();
        let path = SnapshotWriter::new("m", 5)
            .add_tensor("ids", &t)
            .add_field_index("ids", 1, [("7", 0)])
            .write_to(dir.path())
            .unwrap();

        let s = Snapshot::load(&path).unwrap();
        assert_eq!(s.path(), Some(path.as_path()));
        assert_eq!(s.get_tensor("ids"), Some(&t));
        assert_eq!(s.stats().footer_size, 30);
        assert_eq!(s.stats().header_size, 11);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Snapshot::load("/definitely/not/here.pb").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
