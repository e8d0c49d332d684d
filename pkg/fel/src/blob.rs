//! Firmware blobs and recorded bus traces the orchestrator replays
//! verbatim (spec §4.5, §9 "Trace-replay blobs").

use std::path::{Path, PathBuf};

use common::errors::*;
use common::Fail;

#[derive(Debug, Fail)]
pub enum BlobError {
    #[fail(display = "blob '{}' not found under {:?}", name, root)]
    NotFound { name: String, root: PathBuf },
    #[fail(display = "malformed hex in trace '{}' at line {}: {}", name, line, text)]
    MalformedTrace {
        name: String,
        line: usize,
        text: String,
    },
}

/// Firmware blobs and recorded bus traces, addressed by logical name.
pub trait BlobProvider {
    fn get(&self, name: &str) -> Result<Vec<u8>>;
    fn decode_trace(&self, name: &str, min_bytes: usize) -> Result<Vec<u8>>;
}

/// Resolves blob names to files under a configured root directory:
/// `<root>/<name>` for firmware, `<root>/traces/<name>.txt` for trace logs.
/// Reads with plain `std::fs`, matching this codebase's convention for
/// leaf command-line tools that don't need the async file abstraction.
pub struct FsBlobProvider {
    root: PathBuf,
}

impl FsBlobProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn trace_path(&self, name: &str) -> PathBuf {
        self.root.join("traces").join(format!("{}.txt", name))
    }
}

impl BlobProvider for FsBlobProvider {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(name);
        std::fs::read(&path).map_err(|_| {
            BlobError::NotFound {
                name: name.to_string(),
                root: self.root.clone(),
            }
            .into()
        })
    }

    fn decode_trace(&self, name: &str, min_bytes: usize) -> Result<Vec<u8>> {
        let path = self.trace_path(name);
        let text = std::fs::read_to_string(&path).map_err(|_| BlobError::NotFound {
            name: name.to_string(),
            root: self.root.clone(),
        })?;
        decode_trace_text(name, &text, min_bytes)
    }
}

/// Parses a bus-trace log: each line carries optional prefix text up to
/// and including the first `:`, followed by whitespace-separated,
/// case-insensitive hex byte pairs. Concatenates the decoded bytes across
/// all lines and right-pads with zero to `min_bytes`.
fn decode_trace_text(name: &str, text: &str, min_bytes: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = match raw_line.rsplit_once(':') {
            Some((_, rest)) => rest,
            None => raw_line,
        };

        for token in line.split_whitespace() {
            let byte = u8::from_str_radix(token, 16).map_err(|_| BlobError::MalformedTrace {
                name: name.to_string(),
                line: line_no + 1,
                text: token.to_string(),
            })?;
            out.push(byte);
        }
    }

    if out.len() < min_bytes {
        out.resize(min_bytes, 0);
    }

    Ok(out)
}

pub fn decode_trace_file(path: &Path, name: &str, min_bytes: usize) -> Result<Vec<u8>> {
    let text = std::fs::read_to_string(path)?;
    decode_trace_text(name, &text, min_bytes)
}
