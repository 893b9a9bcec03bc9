use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::ArtifactError;

/// Named JSON artifacts under one directory. Absolute paths bypass the root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: impl AsRef<Path>) -> bool {
        self.path(name).is_file()
    }

    pub fn load<T: DeserializeOwned>(&self, name: impl AsRef<Path>) -> Result<T, ArtifactError> {
        let path = self.path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ArtifactError::Missing(path)),
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| ArtifactError::Malformed { path, source })
    }

    /// Pretty JSON, written to a sibling temp file and renamed into place so
    /// a reader never sees a half-written artifact.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        name: impl AsRef<Path>,
        value: &T,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.path(name);
        let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Malformed {
            path: path.clone(),
            source,
        })?;
        bytes.push(b'\n');
        self.write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "saved artifact");
        Ok(path)
    }

    pub fn save_table(&self, name: impl AsRef<Path>, table: &Table) -> Result<PathBuf, ArtifactError> {
        let path = self.path(name);
        let mut buf = Vec::new();
        table
            .write_csv(&mut buf)
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
        self.write_atomic(&path, &buf)?;
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

/// Header plus rows, written as comma-separated values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: &[&str]) -> Self {
        Table {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn write_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        write_row(&mut w, &self.header)?;
        for row in &self.rows {
            write_row(&mut w, row)?;
        }
        Ok(())
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, ",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}
