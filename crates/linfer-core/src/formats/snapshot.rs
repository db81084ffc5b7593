//! Snapshot file reader
//!
//! Layout, offsets absolute from the start of the file:
//!
//! ```text
//! [ header ][ data section ][ index section ][ footer: 30 bytes ]
//! header = model name bytes + version (10-byte varint)
//! footer = data offset (10-byte varint) + index offset (10-byte varint) + magic (10 bytes)
//! ```
//!
//! The data and index sections are the protobuf messages `Data` and `Index`
//! from `src/protos/snapshot.proto`.
//!
//! Parsing walks Footer -> Header -> Data -> Index. Every stage checks the
//! byte length it observed before interpreting it, and any failure aborts
//! the whole parse.

use crate::error::{Error, Result};
use crate::protos::snapshot as pb;
use crate::tensor::Tensor;
use protobuf::{EnumOrUnknown, Message};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

pub const FOOTER_SIZE: usize = 30;
pub const VARINT_SIZE: usize = 10;
pub const MAGIC: &[u8; 10] = b"go_serving";

/// Encode `value` as little-endian base-128, zero padded to 10 bytes
pub fn encode_varint(mut value: u64) -> [u8; VARINT_SIZE] {
    let mut buf = [0u8; VARINT_SIZE];
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    buf
}

/// Decode a little-endian base-128 varint from the front of `buf`
pub fn decode_varint(buf: &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(VARINT_SIZE).enumerate() {
        // the tenth byte may only contribute the top bit of a u64
        if i == VARINT_SIZE - 1 && byte > 1 {
            return Err(Error::Decode("varint overflows u64".into()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::Decode("unterminated varint".into()))
}

/// Parsed footer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub data_offset: u64,
    pub index_offset: u64,
}

/// Parsed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub model_name: String,
    pub version: u64,
}

/// Categorical index table for one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIndex {
    pub name: String,
    pub dim: u32,
    pub records: HashMap<String, i64>,
}

impl FieldIndex {
    fn from_proto(key: &str, field: pb::Field) -> Result<Self> {
        let dim = u32::try_from(field.dim)
            .map_err(|_| Error::Decode(format!("field {}: invalid dim {}", key, field.dim)))?;
        Ok(Self { name: field.name, dim, records: field.records })
    }

    pub(crate) fn to_proto(&self) -> pb::Field {
        let mut field = pb::Field::new();
        field.name = self.name.clone();
        field.dim = i64::from(self.dim);
        field.records = self.records.clone();
        field
    }
}

pub(crate) fn tensor_to_proto(tensor: &Tensor) -> pb::Tensor {
    let mut out = pb::Tensor::new();
    out.tensor_shape = tensor.shape().iter().map(|&d| d as i64).collect();
    let dtype = match tensor {
        Tensor::F32(a) => {
            out.float_val = a.iter().copied().collect();
            pb::DataType::DT_FLOAT
        }
        Tensor::I64(a) => {
            out.int_val = a.iter().copied().collect();
            pb::DataType::DT_INT64
        }
        Tensor::Str(a) => {
            out.string_val = a.iter().cloned().collect();
            pb::DataType::DT_STRING
        }
    };
    out.dtype = EnumOrUnknown::new(dtype);
    out
}

/// Build the tensor declared by `dtype` and `tensor_shape`
fn tensor_from_proto(name: &str, tensor: pb::Tensor) -> Result<Tensor> {
    let mut shape = Vec::with_capacity(tensor.tensor_shape.len());
    for &dim in &tensor.tensor_shape {
        let dim = usize::try_from(dim).map_err(|_| {
            let shape = &tensor.tensor_shape;
            Error::Decode(format!("tensor {}: negative dimension in {:?}", name, shape))
        })?;
        shape.push(dim);
    }
    let built = match tensor.dtype.enum_value() {
        Ok(pb::DataType::DT_FLOAT) => Tensor::from_f32(&shape, tensor.float_val),
        Ok(pb::DataType::DT_INT32 | pb::DataType::DT_INT64) => {
            Tensor::from_i64(&shape, tensor.int_val)
        }
        Ok(pb::DataType::DT_STRING) => Tensor::from_strings(&shape, tensor.string_val),
        Ok(pb::DataType::DT_INVALID) | Err(_) => {
            return Err(Error::Decode(format!(
                "tensor {}: unsupported dtype {}",
                name,
                tensor.dtype.value()
            )));
        }
    };
    built.map_err(|e| Error::Decode(format!("tensor {}: {}", name, e)))
}

/// Decode one protobuf section. Length prefixes inside `buf` are checked
/// against the bytes actually present before anything is allocated.
fn decode_section<M: Message>(buf: &[u8], section: &str) -> Result<M> {
    M::parse_from_bytes(buf).map_err(|e| Error::Decode(format!("{} section: {}", section, e)))
}

/// Byte sizes of each region, for logging and introspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionStats {
    pub header_size: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub footer_size: u64,
}

/// Everything decoded from one snapshot file
#[derive(Debug)]
pub struct ParsedSnapshot {
    pub header: Header,
    pub footer: Footer,
    /// Named tensors of the data section
    pub data: HashMap<String, Tensor>,
    /// Index tables keyed by field name
    pub index: HashMap<String, FieldIndex>,
    pub stats: SectionStats,
}

enum Stage {
    Footer,
    Header(Footer),
    Data(Footer, Header),
    Index(Footer, Header, HashMap<String, Tensor>),
}

/// Sequential snapshot parser
pub struct SnapshotParser<R: Read + Seek> {
    reader: R,
    file_size: u64,
    stats: SectionStats,
}

impl<R: Read + Seek> SnapshotParser<R> {
    pub fn new(reader: R, file_size: u64) -> Self {
        Self { reader, file_size, stats: SectionStats::default() }
    }

    pub fn parse(mut self) -> Result<ParsedSnapshot> {
        let mut stage = Stage::Footer;
        loop {
            stage = match stage {
                Stage::Footer => Stage::Header(self.parse_footer()?),
                Stage::Header(footer) => {
                    let header = self.parse_header(&footer)?;
                    Stage::Data(footer, header)
                }
                Stage::Data(footer, header) => {
                    let data = self.parse_data(&footer)?;
                    Stage::Index(footer, header, data)
                }
                Stage::Index(footer, header, data) => {
                    let index = self.parse_index(&footer)?;
                    return Ok(ParsedSnapshot { header, footer, data, index, stats: self.stats });
                }
            };
        }
    }

    fn footer_offset(&self) -> u64 {
        self.file_size.saturating_sub(FOOTER_SIZE as u64)
    }

    fn parse_footer(&mut self) -> Result<Footer> {
        if self.file_size < FOOTER_SIZE as u64 {
            return Err(Error::FooterLength {
                expected: FOOTER_SIZE,
                actual: self.file_size as usize,
            });
        }
        let buf = self.read_region(self.footer_offset(), FOOTER_SIZE)?;
        if buf.len() != FOOTER_SIZE {
            return Err(Error::FooterLength { expected: FOOTER_SIZE, actual: buf.len() });
        }

        let magic = &buf[2 * VARINT_SIZE..];
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic.to_vec()));
        }
        let footer = Footer {
            data_offset: decode_varint(&buf[..VARINT_SIZE])?,
            index_offset: decode_varint(&buf[VARINT_SIZE..2 * VARINT_SIZE])?,
        };

        let footer_offset = self.footer_offset();
        if footer.data_offset >= footer.index_offset || footer.index_offset >= footer_offset {
            return Err(Error::InvalidOffsets {
                data_offset: footer.data_offset,
                index_offset: footer.index_offset,
                footer_offset,
            });
        }
        self.stats.footer_size = FOOTER_SIZE as u64;
        Ok(footer)
    }

    fn parse_header(&mut self, footer: &Footer) -> Result<Header> {
        let expected = footer.data_offset as usize;
        if expected < VARINT_SIZE {
            return Err(Error::HeaderLength { expected: VARINT_SIZE, actual: expected });
        }
        let buf = self.read_region(0, expected)?;
        if buf.len() != expected {
            return Err(Error::HeaderLength { expected, actual: buf.len() });
        }

        let (name, version) = buf.split_at(buf.len() - VARINT_SIZE);
        let model_name = String::from_utf8(name.to_vec())
            .map_err(|e| Error::Decode(format!("model name is not UTF-8: {}", e)))?;
        let version = decode_varint(version)?;
        self.stats.header_size = expected as u64;
        Ok(Header { model_name, version })
    }

    fn parse_data(&mut self, footer: &Footer) -> Result<HashMap<String, Tensor>> {
        let expected = (footer.index_offset - footer.data_offset) as usize;
        let buf = self.read_region(footer.data_offset, expected)?;
        if buf.len() != expected {
            return Err(Error::DataLength { expected, actual: buf.len() });
        }
        let data: pb::Data = decode_section(&buf, "data")?;
        let mut tensors = HashMap::with_capacity(data.data.len());
        for (name, tensor) in data.data {
            let tensor = tensor_from_proto(&name, tensor)?;
            tensors.insert(name, tensor);
        }
        self.stats.data_size = expected as u64;
        Ok(tensors)
    }

    fn parse_index(&mut self, footer: &Footer) -> Result<HashMap<String, FieldIndex>> {
        let expected = (self.footer_offset() - footer.index_offset) as usize;
        let buf = self.read_region(footer.index_offset, expected)?;
        if buf.len() != expected {
            return Err(Error::IndexLength { expected, actual: buf.len() });
        }
        let index: pb::Index = decode_section(&buf, "index")?;
        let mut fields = HashMap::with_capacity(index.embeddings.len());
        for (key, field) in index.embeddings {
            let field = FieldIndex::from_proto(&key, field)?;
            fields.insert(key, field);
        }
        self.stats.index_size = expected as u64;
        Ok(fields)
    }

    /// Read up to `len` bytes at `offset`; a short read returns fewer bytes
    fn read_region(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
