//! `jsondb` crate — keyed JSON document persistence.
//!
//! Maps string keys to files: key `k` lives at `<dir>/<k>.json` and holds
//! the JSON encoding of a single document.  Writes are atomic per key
//! (write to a temporary file, then rename), so a crash mid-write can never
//! leave a half-document readable.  Reading a missing key is not an error.
//!
//! Two consumers share this crate and never share a directory: the job
//! queue stores one document per job (keyed by UUID), the compose store
//! stores its whole state under a single reserved key.

pub mod error;

pub use error::JsonDbError;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A directory of JSON documents with atomic per-key writes.
#[derive(Debug)]
pub struct JsonDatabase {
    dir: PathBuf,
    /// Unix permission bits applied to every document file.
    mode: u32,
}

impl JsonDatabase {
    /// Create a database handle for `dir`.
    ///
    /// The directory itself is not created or checked here; `list` and
    /// `write` will report the error if it does not exist.
    pub fn new(dir: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            dir: dir.into(),
            mode,
        }
    }

    /// Read the document stored under `name`.
    ///
    /// Returns `Ok(None)` if no document with that name exists.  A document
    /// that exists but does not parse is an error.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, JsonDbError> {
        let data = match fs::read(self.path_for(name)) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(JsonDbError::Io(err)),
        };

        let document = serde_json::from_slice(&data).map_err(|source| JsonDbError::Invalid {
            name: name.to_owned(),
            source,
        })?;

        Ok(Some(document))
    }

    /// Write `document` under `name`, replacing any previous content.
    ///
    /// The document is first written to `<name>.json.tmp` and then renamed
    /// into place, so concurrent readers either see the old document or the
    /// new one, never a torn write.
    pub fn write<T: Serialize>(&self, name: &str, document: &T) -> Result<(), JsonDbError> {
        let data = serde_json::to_vec(document).map_err(|source| JsonDbError::Encode {
            name: name.to_owned(),
            source,
        })?;

        let path = self.path_for(name);
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, &data)?;
        set_mode(&tmp_path, self.mode)?;
        fs::rename(&tmp_path, &path)?;

        Ok(())
    }

    /// List the names of all documents in the directory, sorted.
    ///
    /// Only well-formed `<name>.json` children count; temporary files and
    /// other directory entries are skipped.
    pub fn list(&self) -> Result<Vec<String>, JsonDbError> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
