//! Versioned file naming.
//!
//! A logical file `name.ext` at version `v` is stored on disk as `name_v.ext`:
//! the delimiter and version go between the base name and the extension. Files
//! without an extension are stored as `name_v`.
//!
//! Remote names may contain `/`; they are flattened to `#` before storage so
//! every stored file is a plain entry in a node's directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Separator between the base name and the version number.
pub const DELIMITER: char = '_';

/// Character that stands in for `/` in stored remote names.
const PATH_SEPARATOR_STANDIN: char = '#';

/// Build the stored name of `file` at `version`.
///
/// # Example
///
/// ```rust
/// use corelib::naming::versioned_name;
///
/// assert_eq!(versioned_name("a.txt", 3), "a_3.txt");
/// assert_eq!(versioned_name("README", 1), "README_1");
/// ```
pub fn versioned_name(file: &str, version: u64) -> String {
    let (stem, extension) = split_extension(file);
    match extension {
        Some(extension) => format!("{stem}{DELIMITER}{version}.{extension}"),
        None => format!("{stem}{DELIMITER}{version}"),
    }
}

/// Same as `versioned_name`, applied to the final component of a local path.
pub fn versioned_path(path: &Path, version: u64) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(versioned_name(&file_name, version))
}

/// Split a stored name back into its logical name and version.
///
/// # Example
///
/// ```rust
/// use corelib::naming::parse_versioned;
///
/// assert_eq!(parse_versioned("a_3.txt").unwrap(), ("a.txt".to_string(), 3));
/// assert!(parse_versioned("a.txt").is_err());
/// ```
pub fn parse_versioned(stored: &str) -> Result<(String, u64)> {
    let (stem, extension) = split_extension(stored);
    let (base, version) = stem
        .rsplit_once(DELIMITER)
        .ok_or_else(|| Error::InvalidFileName(stored.to_string()))?;
    let version = version
        .parse::<u64>()
        .map_err(|_| Error::InvalidFileName(stored.to_string()))?;

    let logical = match extension {
        Some(extension) => format!("{base}.{extension}"),
        None => base.to_string(),
    };
    Ok((logical, version))
}

/// True when `stored` is `target` itself or any version of logical `target`.
pub fn matches_logical(stored: &str, target: &str) -> bool {
    stored == target
        || parse_versioned(stored)
            .map(|(logical, _)| logical == target)
            .unwrap_or(false)
}

/// Flatten a remote name for storage.
pub fn encode_remote(name: &str) -> String {
    name.replace('/', &PATH_SEPARATOR_STANDIN.to_string())
}

/// Inverse of `encode_remote`, for display.
pub fn decode_remote(name: &str) -> String {
    name.replace(PATH_SEPARATOR_STANDIN, "/")
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        // A leading dot marks a hidden file, not an extension.
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (name, None),
    }
}
