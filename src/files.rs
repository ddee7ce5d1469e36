// File loading: turns the input sources named on the command line into
// the in-memory file map that becomes the body of the gist.
// - Every file is read completely; one unreadable file aborts the upload.
// - Names are taken verbatim from the command line and used both as the
//   map key and as the file name shown on the gist page.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// One named file destined for the gist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub content: String,
}

/// Files keyed by name. Ordered so the request body is deterministic.
pub type FileMap = BTreeMap<String, FileEntry>;

impl FileEntry {
    /// Build an entry from raw bytes, decoding them as UTF-8. Invalid
    /// sequences are replaced rather than rejected.
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> Self {
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("{} is not valid UTF-8, replacing invalid bytes", filename);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        FileEntry {
            filename: filename.to_string(),
            content,
        }
    }
}

/// Read every path into the file map. A later path with the same name
/// replaces an earlier one.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<FileMap> {
    let mut files = FileMap::new();
    for path in paths {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();
        let bytes = std::fs::read(path).with_context(|| format!("open {}", name))?;
        tracing::debug!(file = %name, bytes = bytes.len(), "loaded file");
        files.insert(name.clone(), FileEntry::from_bytes(&name, bytes));
    }
    Ok(files)
}

/// Read all of `reader` (normally standard input) into a single entry
/// called `name`.
pub fn load_reader<R: Read>(name: &str, mut reader: R) -> Result<FileMap> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .context("read standard input")?;
    tracing::debug!(file = %name, bytes = bytes.len(), "loaded standard input");

    let mut files = FileMap::new();
    files.insert(name.to_string(), FileEntry::from_bytes(name, bytes));
    Ok(files)
}
