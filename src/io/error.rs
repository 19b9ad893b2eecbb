//! Errors that can occur in the io module

use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in file io operations
pub enum IOError {
    /// Error when opening or creating a file.
    #[error("{source_file}:{source_line}\nCouldn't access {filename}: {io_error}")]
    FileAccess {
        /// The underlying [`std::io::Error`]
        io_error: std::io::Error,
        /// The path that could not be accessed
        filename: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    #[error("{0}")]
    /// Error derived from [`std::io::Error`]
    StdIO(#[from] std::io::Error),

    #[error("{0}")]
    /// Error derived from [`serde_yaml::Error`]
    Yaml(#[from] serde_yaml::Error),

    /// The file does not start with the ASDF magic
    #[error("{filename} is not an ASDF file, it starts with {found:?}")]
    NotAsdf {
        /// The filename
        filename: String,
        /// The first line found
        found: String,
    },

    /// The YAML tree is not laid out as expected
    #[error("malformed tree in {filename}: {message}")]
    MalformedTree {
        /// The filename
        filename: String,
        /// What is wrong
        message: String,
    },

    /// A block does not start with the block magic
    #[error("bad block magic at byte {offset}: {found:02x?}")]
    BadBlockMagic {
        /// Offset of the block from the start of the file
        offset: usize,
        /// The bytes found
        found: Vec<u8>,
    },

    /// A block header declares an unsupported layout
    #[error("unsupported block header at byte {offset}: {message}")]
    UnsupportedBlock {
        /// Offset of the block from the start of the file
        offset: usize,
        /// What is unsupported
        message: String,
    },

    /// A block is shorter than its header claims
    #[error("block {index} is truncated: expected {expected} bytes, found {found}")]
    TruncatedBlock {
        /// Index of the block
        index: usize,
        /// Number of bytes declared
        expected: usize,
        /// Number of bytes available
        found: usize,
    },

    /// An array refers to a block that does not exist
    #[error("array at {path} refers to block {block_source}, but there are only {num_blocks} blocks")]
    MissingBlock {
        /// Dotted path of the array
        path: String,
        /// The block index referred to
        block_source: usize,
        /// The number of blocks in the file
        num_blocks: usize,
    },

    /// An array descriptor could not be decoded
    #[error("bad array at {path}: {message}")]
    BadArray {
        /// Dotted path of the array
        path: String,
        /// What is wrong
        message: String,
    },
}
