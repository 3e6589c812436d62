//! Built-in format definitions for the tagwalk engine

pub mod bmp;
pub mod gif;

use std::path::Path;

use tagwalk::TagDef;
use thiserror::Error;

/// Result type for format lookups
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors that can occur while selecting or building a format
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Unknown format: {0}")]
    Unknown(String),

    #[error("No format registered for '{0}'")]
    NoMatch(String),

    #[error("Definition error: {0}")]
    Definition(#[from] tagwalk::Error),
}

/// A registered format
#[derive(Debug, Clone, Copy)]
pub struct Format {
    /// Name used on the command line
    pub name: &'static str,
    /// File extension, without the dot
    pub ext: &'static str,
    /// One-line summary
    pub description: &'static str,
    build: fn() -> tagwalk::Result<TagDef>,
}

impl Format {
    /// Build and validate the definition
    pub fn def(&self) -> Result<TagDef> {
        Ok((self.build)()?)
    }
}

static FORMATS: [Format; 2] = [
    Format {
        name: "gif",
        ext: "gif",
        description: "GIF image: header, logical screen, extension and image blocks",
        build: gif::gif_def,
    },
    Format {
        name: "bmp",
        ext: "bmp",
        description: "BMP image: file header, DIB header revisions, palette and pixels",
        build: bmp::bmp_def,
    },
];

/// All built-in formats
pub fn formats() -> &'static [Format] {
    &FORMATS
}

/// Look a format up by name
pub fn by_name(name: &str) -> Result<&'static Format> {
    FORMATS
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| FormatError::Unknown(name.to_string()))
}

/// Pick a format from a file's extension
pub fn for_path(path: &Path) -> Result<&'static Format> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    FORMATS
        .iter()
        .find(|f| f.ext.eq_ignore_ascii_case(ext))
        .ok_or_else(|| FormatError::NoMatch(path.display().to_string()))
}
