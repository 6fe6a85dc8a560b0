use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::codec::{self, DecodeError, EncodeError, EncodeOptions};
use crate::document::EwpDocument;

/// Reads and writes a single `.ewp` file on disk.
/// 讀寫磁碟上的單一 `.ewp` 專案檔。
#[derive(Debug)]
pub struct EwpStore {
    path: PathBuf,
}

impl EwpStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and decodes the project file.
    /// 載入並解碼專案檔。
    pub fn load(&self) -> Result<EwpDocument, EwpStoreError> {
        let bytes = fs::read(&self.path)?;
        let document = codec::decode(&bytes)?;
        debug!("loaded {}", self.path.display());
        Ok(document)
    }

    /// Encodes `document` and replaces the file atomically.
    /// 編碼後以原子方式覆寫專案檔。
    pub fn save(&self, document: &EwpDocument, options: &EncodeOptions) -> Result<(), EwpStoreError> {
        let payload = codec::encode_with(document, options)?;
        write_atomic(&self.path, &payload)?;
        debug!("saved {} ({} bytes)", self.path.display(), payload.len());
        Ok(())
    }
}

/// Writes through a temporary sibling followed by rename.
/// 先寫入同目錄的暫存檔再改名；失敗時暫存檔會被移除。
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path)?;
    Ok(())
}

/// Errors emitted by [`EwpStore`].
/// [`EwpStore`] 可能拋出的錯誤。
#[derive(Debug, Error)]
pub enum EwpStoreError {
    #[error("project file IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FileEntry;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = EwpStore::new(dir.path().join("app.ewp"));

        let mut doc = EwpDocument::new(3);
        doc.insert_file(FileEntry::in_project_dir("main.c", Vec::<String>::new()));
        doc.insert_file(FileEntry::in_project_dir("board\\bsp.c", ["Release"]));

        store.save(&doc, &EncodeOptions::default()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_leaves_no_temporary_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("occupied.ewp");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "x").unwrap();

        assert!(write_atomic(&target, b"<project/>").is_err());

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["occupied.ewp"]);
    }

    #[test]
    fn load_missing_reports_io_error() {
        let dir = tempdir().unwrap();
        let store = EwpStore::new(dir.path().join("absent.ewp"));
        assert!(matches!(store.load(), Err(EwpStoreError::Io(_))));
    }

    #[test]
    fn load_invalid_reports_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.ewp");
        fs::write(&path, "<workspace/>").unwrap();
        let store = EwpStore::new(&path);
        assert!(matches!(store.load(), Err(EwpStoreError::Decode(_))));
    }
}
