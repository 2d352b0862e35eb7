use std::path::PathBuf;
use std::str::FromStr;

use crate::eid::Eid;

/// File-backed key/value storage rooted at a single directory. Writes go
/// through a uniquely named temp file and a rename, so a reader never
/// observes a half-written file.
#[derive(Clone)]
pub struct BackendLocal {
    base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &str) -> std::io::Result<Self> {
        let path = PathBuf::from_str(storage_dir).expect("infallible PathBuf::from_str for &str");
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    pub fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.base_dir.join(ident)).is_ok()
    }

    pub fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.base_dir.join(ident))
    }

    pub fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.base_dir.join(ident);
        let temp_path = self.base_dir.join(format!("{}-{ident}", Eid::new()));

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)
    }
}
