//src/raw.rs

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::ReportError;
use crate::types::SourceKind;

/// Where a raw tool output lives.
#[derive(Debug, Clone)]
pub enum RawContent {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A raw tool output plus the kind of tool that produced it.
#[derive(Debug, Clone)]
pub struct RawSource {
    kind: SourceKind,
    content: RawContent,
}

impl RawSource {
    pub fn from_path<P: Into<PathBuf>>(kind: SourceKind, path: P) -> Self {
        Self {
            kind,
            content: RawContent::Path(path.into()),
        }
    }

    pub fn from_bytes<B: Into<Vec<u8>>>(kind: SourceKind, bytes: B) -> Self {
        Self {
            kind,
            content: RawContent::Bytes(bytes.into()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn content(&self) -> &RawContent {
        &self.content
    }

    /// Decode the whole source to text. `.gz` paths and gzip-magic byte
    /// buffers are decompressed transparently. Only reading the file is an
    /// I/O failure; bytes that do not decode are a format error.
    pub fn read_text(&self) -> Result<String, ReportError> {
        let raw = match &self.content {
            RawContent::Path(path) => {
                let bytes = read_path(self.kind, path)?;
                let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
                if is_gz || is_gzip(&bytes) {
                    gunzip(self.kind, &bytes)?
                } else {
                    bytes
                }
            }
            RawContent::Bytes(bytes) if is_gzip(bytes) => gunzip(self.kind, bytes)?,
            RawContent::Bytes(bytes) => bytes.clone(),
        };
        decode_utf8(self.kind, raw)
    }
}

fn read_path(kind: SourceKind, path: &Path) -> Result<Vec<u8>, ReportError> {
    let io_err = |source| ReportError::Io {
        kind,
        path: path.to_path_buf(),
        source,
    };

    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).map_err(io_err)?;
    Ok(raw)
}

fn gunzip(kind: SourceKind, bytes: &[u8]) -> Result<Vec<u8>, ReportError> {
    let mut out = Vec::new();
    MultiGzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| ReportError::format(kind, format!("bad gzip stream: {}", e)))?;
    Ok(out)
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn decode_utf8(kind: SourceKind, raw: Vec<u8>) -> Result<String, ReportError> {
    String::from_utf8(raw).map_err(|e| ReportError::format(kind, format!("input is not valid UTF-8: {}", e)))
}

/// Longest name shown for a coverage plot.
const COVERAGE_NAME_LEN: usize = 20;

/// One coverage plot supplied alongside the tool outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageImage {
    pub name: String,
    pub path: PathBuf,
}

impl CoverageImage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = stem.chars().take(COVERAGE_NAME_LEN).collect();
        Self { name, path }
    }
}

/// Collect the SVG coverage plots of `folder`, skipping `._` resource-fork
/// files, sorted by file name so the report does not depend on directory
/// iteration order.
pub fn collect_coverage_images<P: AsRef<Path>>(folder: P) -> Result<Vec<CoverageImage>, ReportError> {
    let folder = folder.as_ref();
    let io_err = |source| ReportError::Io {
        kind: SourceKind::CoverageImages,
        path: folder.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(io_err)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let file_name = path.file_name()?.to_string_lossy().into_owned();
            let is_svg = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("svg"))
                .unwrap_or(false);
            if is_svg && !file_name.starts_with("._") && path.is_file() {
                Some(path)
            } else {
                None
            }
        })
        .collect();
    paths.sort();

    log::info!("Found {} coverage plot(s) in {}", paths.len(), folder.display());
    Ok(paths.into_iter().map(CoverageImage::new).collect())
}
