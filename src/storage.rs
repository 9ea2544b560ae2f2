// Local storage access for file-backed jobs
use encoding_rs::Encoding;
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::error::JobError;

pub const STORAGE_LOCAL: &str = "local";
pub const STORAGE_SDCARD: &str = "sdcard";

pub const DEFAULT_ENCODING: &str = "utf-8";

/// Decoded, line-readable view of a local file.
pub type TextReader = BufReader<DecodeReaderBytes<File, Vec<u8>>>;

/// Looks up an encoding by its WHATWG label ("utf-8", "latin1", ...).
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, JobError> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| JobError::UnknownEncoding(label.to_string()))
}

pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Opens `path` for text reading starting at byte `offset`.
///
/// Invalid byte sequences decode to U+FFFD instead of failing. A byte order
/// mark at the start of the file overrides `encoding` and is stripped.
pub fn open_text(path: &Path, encoding: &'static Encoding, offset: u64) -> io::Result<TextReader> {
    let mut file = File::open(path)?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))?;
    }
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .bom_override(true)
        .bom_sniffing(offset == 0)
        .build(file);
    Ok(BufReader::new(decoder))
}

/// Finite iterator over the decoded lines of a file, without terminators.
///
/// Each call to [`ContentLines::open`] starts from the beginning of the file
/// with its own handle.
pub struct ContentLines {
    reader: TextReader,
}

impl ContentLines {
    pub fn open(path: &Path, encoding: &'static Encoding) -> io::Result<Self> {
        Ok(Self {
            reader: open_text(path, encoding, 0)?,
        })
    }
}

impl Iterator for ContentLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Some(Ok(line))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
