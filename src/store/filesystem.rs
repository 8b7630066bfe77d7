// Directory-backed object store, STIX FileSystemStore layout:
//   <root>/<type>/<id>/<modified as %Y%m%d%H%M%S%3f>.json   versioned records
//   <root>/<type>/<id>.json                                  records without `modified`
//   <root>/<document name>                                   output documents

use super::{type_of, ObjectStore};
use crate::error::StoreError;
use crate::temporal::parse_timestamp;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| anyhow::anyhow!("Failed to create store root {:?}: {}", root, e))?;
        Ok(FileSystemStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        let stix_type = type_of(id).ok_or_else(|| StoreError::Corrupt {
            id: id.to_string(),
            reason: "id has no '<type>--' prefix".to_string(),
        })?;
        Ok(self.root.join(stix_type))
    }

    /// Version files of one record, sorted oldest first
    pub fn version_files(&self, id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.type_dir(id)?.join(id);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::unavailable("get", id, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::unavailable("get", id, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_json(&self, id: &str, path: &Path) -> Result<Option<Value>, StoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::unavailable("get", id, e)),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })
    }

    fn write_json(&self, id: &str, path: &Path, object: &Value) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::unavailable("put", id, e))?;
        }
        let text = serde_json::to_string_pretty(object).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| StoreError::unavailable("put", id, e))
    }
}

impl ObjectStore for FileSystemStore {
    fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        // Filenames are fixed-width timestamps, so the last one is the newest
        if let Some(latest) = self.version_files(id)?.last() {
            return self.read_json(id, latest);
        }

        let flat = self.type_dir(id)?.join(format!("{}.json", id));
        self.read_json(id, &flat)
    }

    fn put(&mut self, id: &str, object: &Value) -> Result<(), StoreError> {
        let type_dir = self.type_dir(id)?;

        let path = match object.get("modified").and_then(Value::as_str) {
            Some(raw) => {
                let modified = parse_timestamp(raw).ok_or_else(|| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("unparsable modified timestamp '{}'", raw),
                })?;
                type_dir
                    .join(id)
                    .join(format!("{}.json", modified.format("%Y%m%d%H%M%S%3f")))
            }
            None => type_dir.join(format!("{}.json", id)),
        };

        self.write_json(id, &path, object)
    }

    fn replace(&mut self, id: &str, object: &Value) -> Result<(), StoreError> {
        let type_dir = self.type_dir(id)?;

        match fs::remove_dir_all(type_dir.join(id)) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(StoreError::unavailable("replace", id, e))
            }
            _ => {}
        }
        match fs::remove_file(type_dir.join(format!("{}.json", id))) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(StoreError::unavailable("replace", id, e))
            }
            _ => {}
        }

        self.put(id, object)
    }

    fn put_document(&mut self, name: &str, contents: &str) -> Result<String, StoreError> {
        let path = self.root.join(name);
        fs::write(&path, contents).map_err(|e| StoreError::unavailable("put_document", name, e))?;
        Ok(path.display().to_string())
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}
