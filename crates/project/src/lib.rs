//! Reading, editing and writing IAR Embedded Workbench `.ewp` project files.
//! 讀取、編輯與寫回 IAR Embedded Workbench `.ewp` 專案檔的核心模組。
//!
//! Configuration and group blocks are kept as raw markup and never
//! interpreted; only the file list is modelled.

pub mod codec;
pub mod document;
pub mod store;

pub use codec::{decode, encode, encode_with, DecodeError, EncodeError, EncodeOptions};
pub use document::{
    compare_paths, EwpDocument, FileEntry, OpaqueBlock, XmlDeclaration, PATH_SEPARATOR,
    PROJECT_DIR,
};
pub use store::{write_atomic, EwpStore, EwpStoreError};
