//! Snapshot file writer
//!
//! Produces files in the layout read by [`SnapshotParser`](super::snapshot::SnapshotParser).
//! Files are named `{version}.pb` so that the lexicographically greatest file
//! in a directory is the newest when versions share a width (e.g. unix
//! timestamps).

use super::snapshot::{encode_varint, tensor_to_proto, FieldIndex, FOOTER_SIZE, MAGIC};
use crate::error::{Error, Result};
use crate::protos::snapshot as pb;
use crate::tensor::Tensor;
use protobuf::Message;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Builder for a snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    model_name: String,
    version: u64,
    data: pb::Data,
    index: pb::Index,
}

impl SnapshotWriter {
    pub fn new(model_name: impl Into<String>, version: u64) -> Self {
        Self {
            model_name: model_name.into(),
            version,
            data: pb::Data::new(),
            index: pb::Index::new(),
        }
    }

    /// Add a named tensor (weights or an embedding table)
    pub fn add_tensor(mut self, name: impl Into<String>, tensor: &Tensor) -> Self {
        self.data.data.insert(name.into(), tensor_to_proto(tensor));
        self
    }

    /// Add the categorical index table of one field
    pub fn add_field_index<K: Into<String>>(
        mut self,
        name: impl Into<String>,
        dim: u32,
        records: impl IntoIterator<Item = (K, i64)>,
    ) -> Self {
        let name = name.into();
        let records: HashMap<String, i64> =
            records.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let field = FieldIndex { name: name.clone(), dim, records };
        self.index.embeddings.insert(name, field.to_proto());
        self
    }

    /// Encode the whole file.
    ///
    /// An empty protobuf message encodes to zero bytes, which would put two
    /// section offsets on the same byte, so both sections must hold at least
    /// one entry.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.data.data.is_empty() {
            return Err(Error::Encode(format!("[{}] data section is empty", self.model_name)));
        }
        if self.index.embeddings.is_empty() {
            return Err(Error::Encode(format!("[{}] index section is empty", self.model_name)));
        }
        let data = self
            .data
            .write_to_bytes()
            .map_err(|e| Error::Encode(format!("data section: {}", e)))?;
        let index = self
            .index
            .write_to_bytes()
            .map_err(|e| Error::Encode(format!("index section: {}", e)))?;

        let mut out = Vec::with_capacity(
            self.model_name.len() + 10 + data.len() + index.len() + FOOTER_SIZE,
        );
        out.extend_from_slice(self.model_name.as_bytes());
        out.extend_from_slice(&encode_varint(self.version));
        let data_offset = out.len() as u64;
        out.extend_from_slice(&data);
        let index_offset = out.len() as u64;
        out.extend_from_slice(&index);
        out.extend_from_slice(&encode_varint(data_offset));
        out.extend_from_slice(&encode_varint(index_offset));
        out.extend_from_slice(MAGIC);
        Ok(out)
    }

    /// File name this snapshot is exported under
    pub fn file_name(&self) -> String {
        format!("{}.pb", self.version)
    }

    /// Write `{version}.pb` into `dir`.
    ///
    /// The bytes go to a hidden temporary file first and are renamed into
    /// place, so a directory watcher never sees a partial snapshot.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        let bytes = self.encode()?;
        let target = dir.join(self.file_name());
        let tmp = dir.join(format!(".{}.tmp", self.file_name()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        log::debug!(
            "[{}] saved {} ({} bytes)",
            self.model_name,
            target.display(),
            bytes.len()
        );
        Ok(target)
    }
}
