//! Reading and writing models as ASDF files.
//!
//! A file is a short text header, a YAML tree and then binary blocks:
//!
//! ```text
//! #ASDF 1.0.0
//! #ASDF_STANDARD 1.5.0
//! %YAML 1.1
//! --- !core/asdf-1.1.0
//! asdf_library: {...}
//! roman: !asdf://stsci.edu/datamodels/roman/tags/ramp-1.0.0
//!   data: !core/ndarray-1.0.0
//!     source: 0
//!     datatype: float32
//!     byteorder: little
//!     shape: [6, 4096, 4096]
//! ...
//! <blocks>
//! ```
//!
//! Each block is the magic `\xd3BLK`, a big-endian u16 header size (48), a
//! u32 flags word, 4 bytes of compression name, u64 allocated, used and data
//! sizes, a 16 byte checksum, then the data. Compression and checksums are
//! not used.

use super::error::IOError;
use crate::datamodels::{
    array::{DType, NdArray},
    node::{Map, Node},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};
use serde_yaml::{
    value::{Tag, TaggedValue},
    Mapping, Value,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Cursor, Read, Write},
    path::Path,
};

/// First line of every ASDF file.
pub const ASDF_MAGIC: &str = "#ASDF 1.0.0";
/// Second line, the version of the standard the file follows.
pub const ASDF_STANDARD: &str = "#ASDF_STANDARD 1.5.0";
/// Tag of the top of the tree.
pub const ASDF_TAG: &str = "core/asdf-1.1.0";
/// Tag of array descriptors.
pub const NDARRAY_TAG: &str = "core/ndarray-1.0.0";
/// Start of every block.
pub const BLOCK_MAGIC: [u8; 4] = [0xd3, b'B', b'L', b'K'];
/// Size of a block header after the size field itself.
pub const BLOCK_HEADER_SIZE: u16 = 48;

const END_MARKER: &[u8] = b"\n...\n";

/// The model tree of a file and the tag it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct AsdfFile {
    /// Tag URI of the `roman` node
    pub tag: String,
    /// The `roman` node, with arrays loaded
    pub tree: Node,
}

/// The YAML part of a file, without any blocks loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AsdfHeader {
    /// Tag URI of the `roman` node
    pub tag: String,
    /// The `roman` node, array descriptors left as they are
    pub tree: Value,
}

fn tag_name(tag: &Tag) -> String {
    let tag = tag.to_string();
    tag.strip_prefix('!').unwrap_or(&tag).to_string()
}

fn tagged(tag: &str, value: Value) -> Value {
    Value::Tagged(Box::new(TaggedValue {
        tag: Tag::new(tag),
        value,
    }))
}

fn join_path(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

fn library_info() -> Value {
    let mut library = Mapping::new();
    library.insert("author".into(), "romancal developers".into());
    library.insert("name".into(), env!("CARGO_PKG_NAME").into());
    library.insert("version".into(), env!("CARGO_PKG_VERSION").into());
    Value::Mapping(library)
}

/// Replace arrays with descriptors, collecting their bytes as blocks.
fn encode(node: &Node, blocks: &mut Vec<Vec<u8>>) -> Value {
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Int(i) => Value::Number((*i).into()),
        Node::Float(f) => Value::Number((*f).into()),
        Node::Str(s) => Value::String(s.clone()),
        Node::List(items) => Value::Sequence(items.iter().map(|item| encode(item, blocks)).collect()),
        Node::Map(map) => {
            let mut mapping = Mapping::new();
            for (key, item) in map {
                mapping.insert(Value::String(key.clone()), encode(item, blocks));
            }
            Value::Mapping(mapping)
        }
        Node::Array(array) => {
            let mut descriptor = Mapping::new();
            descriptor.insert("source".into(), Value::Number((blocks.len() as u64).into()));
            descriptor.insert("datatype".into(), array.dtype().name().into());
            descriptor.insert("byteorder".into(), "little".into());
            descriptor.insert(
                "shape".into(),
                Value::Sequence(
                    array
                        .shape()
                        .iter()
                        .map(|&dim| Value::Number((dim as u64).into()))
                        .collect(),
                ),
            );
            blocks.push(array.to_le_bytes());
            tagged(NDARRAY_TAG, Value::Mapping(descriptor))
        }
    }
}

fn write_block<W: Write>(writer: &mut W, data: &[u8]) -> Result<(), IOError> {
    let size = data.len() as u64;
    writer.write_all(&BLOCK_MAGIC)?;
    writer.write_u16::<BigEndian>(BLOCK_HEADER_SIZE)?;
    // flags
    writer.write_u32::<BigEndian>(0)?;
    // compression
    writer.write_all(&[0; 4])?;
    // allocated, used, data sizes
    writer.write_u64::<BigEndian>(size)?;
    writer.write_u64::<BigEndian>(size)?;
    writer.write_u64::<BigEndian>(size)?;
    // checksum
    writer.write_all(&[0; 16])?;
    writer.write_all(data)?;
    Ok(())
}

/// Serialize a model tree stored under `tag` into the bytes of an ASDF file.
///
/// # Errors
///
/// Will return [`IOError::Yaml`] if the tree cannot be emitted.
pub fn to_bytes(tag: &str, tree: &Node) -> Result<Vec<u8>, IOError> {
    let mut blocks = Vec::new();
    let roman = encode(tree, &mut blocks);

    let mut top = Mapping::new();
    top.insert("asdf_library".into(), library_info());
    top.insert("roman".into(), tagged(tag, roman));
    let yaml = serde_yaml::to_string(&tagged(ASDF_TAG, Value::Mapping(top)))?;

    let mut out = Vec::with_capacity(yaml.len() + blocks.iter().map(Vec::len).sum::<usize>());
    writeln!(out, "{ASDF_MAGIC}")?;
    writeln!(out, "{ASDF_STANDARD}")?;
    writeln!(out, "%YAML 1.1")?;
    write!(out, "--- {yaml}")?;
    if !yaml.ends_with('\n') {
        writeln!(out)?;
    }
    writeln!(out, "...")?;
    trace!("writing {} blocks", blocks.len());
    for block in &blocks {
        write_block(&mut out, block)?;
    }
    Ok(out)
}

/// Write a model tree stored under `tag` to an ASDF file.
///
/// # Errors
///
/// - [`IOError::FileAccess`] if the file cannot be created
/// - see [`to_bytes`]
pub fn write_asdf(path: &Path, tag: &str, tree: &Node) -> Result<(), IOError> {
    let bytes = to_bytes(tag, tree)?;
    let file = File::create(path).map_err(|io_error| IOError::FileAccess {
        io_error,
        filename: path.display().to_string(),
        source_file: file!(),
        source_line: line!(),
    })?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&bytes)?;
    writer.flush()?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn read_blocks(data: &[u8], start: usize) -> Result<Vec<&[u8]>, IOError> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let file_offset = start + offset;
        let mut cursor = Cursor::new(&data[offset..]);
        let mut magic = [0_u8; 4];
        if cursor.read_exact(&mut magic).is_err() || magic != BLOCK_MAGIC {
            return Err(IOError::BadBlockMagic {
                offset: file_offset,
                found: data[offset..(offset + 4).min(data.len())].to_vec(),
            });
        }
        let truncated = |_| IOError::TruncatedBlock {
            index: blocks.len(),
            expected: BLOCK_HEADER_SIZE as usize,
            found: data.len() - offset,
        };
        let header_size = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        if header_size < BLOCK_HEADER_SIZE {
            return Err(IOError::UnsupportedBlock {
                offset: file_offset,
                message: format!("header size {header_size} is less than {BLOCK_HEADER_SIZE}"),
            });
        }
        let _flags = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let mut compression = [0_u8; 4];
        cursor.read_exact(&mut compression).map_err(truncated)?;
        if compression != [0; 4] {
            return Err(IOError::UnsupportedBlock {
                offset: file_offset,
                message: format!(
                    "compression {:?} is not supported",
                    String::from_utf8_lossy(&compression)
                ),
            });
        }
        let allocated = cursor.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let used = cursor.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let data_size = cursor.read_u64::<BigEndian>().map_err(truncated)? as usize;
        if used != data_size || used > allocated {
            return Err(IOError::UnsupportedBlock {
                offset: file_offset,
                message: format!(
                    "used size {used}, data size {data_size}, allocated size {allocated} are inconsistent"
                ),
            });
        }
        let data_start = offset + 6 + header_size as usize;
        let data_end = match data_start
            .checked_add(allocated)
            .filter(|end| *end <= data.len())
        {
            Some(end) => end,
            None => {
                return Err(IOError::TruncatedBlock {
                    index: blocks.len(),
                    expected: allocated,
                    found: data.len().saturating_sub(data_start),
                })
            }
        };
        // used <= allocated was checked above
        blocks.push(&data[data_start..data_start + used]);
        offset = data_end;
    }
    Ok(blocks)
}

fn swap_bytes(bytes: &[u8], item_size: usize) -> Vec<u8> {
    bytes
        .chunks(item_size)
        .flat_map(|item| item.iter().rev().copied())
        .collect()
}

fn decode_array(value: Value, blocks: &[&[u8]], path: &str) -> Result<Node, IOError> {
    let bad = |message: String| IOError::BadArray {
        path: path.to_string(),
        message,
    };
    let descriptor = match value {
        Value::Mapping(descriptor) => descriptor,
        other => return Err(bad(format!("expected a mapping, found {other:?}"))),
    };
    let source = descriptor
        .get("source")
        .and_then(Value::as_u64)
        .ok_or_else(|| bad("source must be a block index".into()))? as usize;
    let dtype = descriptor
        .get("datatype")
        .and_then(Value::as_str)
        .ok_or_else(|| bad("datatype must be a string".into()))?
        .parse::<DType>()
        .map_err(|e| bad(e.to_string()))?;
    let shape = descriptor
        .get("shape")
        .and_then(Value::as_sequence)
        .ok_or_else(|| bad("shape must be a list".into()))?
        .iter()
        .map(|dim| dim.as_u64().map(|dim| dim as usize))
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| bad("shape must hold non-negative integers".into()))?;
    let block = blocks.get(source).ok_or_else(|| IOError::MissingBlock {
        path: path.to_string(),
        block_source: source,
        num_blocks: blocks.len(),
    })?;
    let array = match descriptor.get("byteorder").and_then(Value::as_str) {
        Some("little") | None => NdArray::from_le_bytes(dtype, &shape, block),
        Some("big") => NdArray::from_le_bytes(dtype, &shape, &swap_bytes(block, dtype.item_size())),
        Some(other) => return Err(bad(format!("unknown byteorder {other}"))),
    }
    .map_err(|e| bad(e.to_string()))?;
    Ok(Node::Array(array))
}

/// Turn a YAML tree into a model tree, loading arrays from `blocks`.
fn decode(value: Value, blocks: &[&[u8]], path: &str) -> Result<Node, IOError> {
    Ok(match value {
        Value::Tagged(tagged) if tag_name(&tagged.tag) == NDARRAY_TAG => {
            decode_array(tagged.value, blocks, path)?
        }
        Value::Tagged(tagged) => decode(tagged.value, blocks, path)?,
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(b),
        Value::Number(n) => Node::from_number(&n, path).map_err(|e| IOError::BadArray {
            path: path.to_string(),
            message: e.to_string(),
        })?,
        Value::String(s) => Node::Str(s),
        Value::Sequence(seq) => Node::List(
            seq.into_iter()
                .enumerate()
                .map(|(idx, item)| decode(item, blocks, &join_path(path, &idx.to_string())))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, item) in mapping {
                let key = match key {
                    Value::String(key) => key,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(IOError::BadArray {
                            path: path.to_string(),
                            message: format!("unsupported mapping key {other:?}"),
                        })
                    }
                };
                let item = decode(item, blocks, &join_path(path, &key))?;
                map.insert(key, item);
            }
            Node::Map(map)
        }
    })
}

/// Find the `roman` node and its tag in a parsed tree.
fn split_roman(document: Value, filename: &str) -> Result<(String, Value), IOError> {
    let malformed = |message: &str| IOError::MalformedTree {
        filename: filename.to_string(),
        message: message.to_string(),
    };
    let top = match document {
        Value::Tagged(tagged) => tagged.value,
        other => other,
    };
    let mut top = match top {
        Value::Mapping(top) => top,
        _ => return Err(malformed("the top of the tree is not a mapping")),
    };
    match top.remove("roman") {
        Some(Value::Tagged(tagged)) => Ok((tag_name(&tagged.tag), tagged.value)),
        Some(_) => Err(malformed("the roman node has no tag")),
        None => Err(malformed("there is no roman node")),
    }
}

fn check_magic(bytes: &[u8], filename: &str) -> Result<(), IOError> {
    if bytes.starts_with(ASDF_MAGIC.as_bytes()) {
        Ok(())
    } else {
        let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
        Err(IOError::NotAsdf {
            filename: filename.to_string(),
            found: String::from_utf8_lossy(&first_line[..first_line.len().min(32)]).to_string(),
        })
    }
}

/// Parse the bytes of an ASDF file. `filename` is only used in errors.
///
/// # Errors
///
/// - [`IOError::NotAsdf`] if the magic is missing
/// - [`IOError::MalformedTree`] / [`IOError::Yaml`] if the tree cannot be parsed
/// - block errors if the blocks are corrupt or missing
pub fn from_bytes(bytes: &[u8], filename: &str) -> Result<AsdfFile, IOError> {
    check_magic(bytes, filename)?;
    let malformed = |message: &str| IOError::MalformedTree {
        filename: filename.to_string(),
        message: message.to_string(),
    };
    let tree_start = bytes
        .windows(4)
        .position(|window| window == b"\n---")
        .map(|position| position + 1)
        .ok_or_else(|| malformed("no document start marker"))?;
    let tree_end = bytes[tree_start..]
        .windows(END_MARKER.len())
        .position(|window| window == END_MARKER)
        .map(|position| tree_start + position + 1)
        .ok_or_else(|| malformed("no document end marker"))?;
    let yaml = std::str::from_utf8(&bytes[tree_start..tree_end])
        .map_err(|_| malformed("the tree is not valid utf-8"))?;
    let blocks_start = tree_end + END_MARKER.len() - 1;
    let blocks = read_blocks(&bytes[blocks_start..], blocks_start)?;
    trace!("found {} blocks", blocks.len());

    let (tag, roman) = split_roman(serde_yaml::from_str(yaml)?, filename)?;
    let tree = decode(roman, &blocks, "roman")?;
    Ok(AsdfFile { tag, tree })
}

/// Read an ASDF file.
///
/// # Errors
///
/// - [`IOError::FileAccess`] if the file cannot be read
/// - see [`from_bytes`]
pub fn read_asdf(path: &Path) -> Result<AsdfFile, IOError> {
    let bytes = std::fs::read(path).map_err(|io_error| IOError::FileAccess {
        io_error,
        filename: path.display().to_string(),
        source_file: file!(),
        source_line: line!(),
    })?;
    from_bytes(&bytes, &path.display().to_string())
}

/// Read only the YAML tree of an ASDF file, leaving its blocks on disk.
///
/// # Errors
///
/// - [`IOError::FileAccess`] if the file cannot be read
/// - [`IOError::NotAsdf`] / [`IOError::MalformedTree`] / [`IOError::Yaml`] if the tree cannot be parsed
pub fn read_header(path: &Path) -> Result<AsdfHeader, IOError> {
    let filename = path.display().to_string();
    let file = File::open(path).map_err(|io_error| IOError::FileAccess {
        io_error,
        filename: filename.clone(),
        source_file: file!(),
        source_line: line!(),
    })?;
    let mut reader = BufReader::new(file);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    check_magic(first.as_bytes(), &filename)?;

    let mut yaml = String::new();
    let mut in_tree = false;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(IOError::MalformedTree {
                filename,
                message: "no document end marker".into(),
            });
        }
        if line.starts_with("---") {
            in_tree = true;
        }
        if in_tree && line.trim_end() == "..." {
            break;
        }
        if in_tree {
            yaml.push_str(&line);
        }
    }
    let (tag, tree) = split_roman(serde_yaml::from_str(&yaml)?, &filename)?;
    Ok(AsdfHeader { tag, tree })
}
