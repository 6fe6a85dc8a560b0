use log::trace;

/// Macro token IAR expands to the directory holding the `.ewp` file.
/// IAR 展開為 `.ewp` 所在目錄的巨集字串。
pub const PROJECT_DIR: &str = "$PROJ_DIR$";

/// Separator used by toolchain paths, independent of the host platform.
pub const PATH_SEPARATOR: char = '\\';

/// Raw inner markup of a `configuration` or `group` element.
/// `configuration` 或 `group` 元素的原始內部標記，逐位元組保留。
///
/// The content is never parsed; encoding writes it back exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpaqueBlock {
    raw: String,
}

impl OpaqueBlock {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// The `<?xml ...?>` prolog found at the top of a decoded document.
/// 解碼時讀到的 XML 宣告。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl XmlDeclaration {
    /// Prolog IAR Embedded Workbench writes into its project files.
    pub fn iar_default() -> Self {
        Self {
            version: "1.0".into(),
            encoding: Some("iso-8859-1".into()),
            standalone: None,
        }
    }
}

/// One `file` element of the project.
/// 專案中的單一 `file` 元素。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    /// Configurations the file is excluded from. `None` means the document
    /// carries no `excluded` element at all, which differs from `Some(vec![])`.
    pub exclusions: Option<Vec<String>>,
}

impl FileEntry {
    /// Wraps an already prefixed toolchain path without exclusions.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exclusions: None,
        }
    }

    /// Builds an entry rooted at [`PROJECT_DIR`].
    /// 建立以 [`PROJECT_DIR`] 為根的檔案項目；未提供排除設定時為 `None`。
    ///
    /// `name` is appended after a backslash as given; it is not validated or
    /// normalised.
    pub fn in_project_dir<I, S>(name: &str, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exclusions: Vec<String> = exclusions.into_iter().map(Into::into).collect();
        Self {
            path: format!("{PROJECT_DIR}{PATH_SEPARATOR}{name}"),
            exclusions: (!exclusions.is_empty()).then_some(exclusions),
        }
    }

    /// Final segment of the path, or the whole path when it has no separator.
    /// 取得路徑最後一段的檔名。
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit_once(PATH_SEPARATOR)
            .map_or(self.path.as_str(), |(_, base)| base)
    }

    pub fn is_excluded_from(&self, configuration: &str) -> bool {
        self.exclusions
            .as_deref()
            .is_some_and(|names| names.iter().any(|name| name == configuration))
    }
}

/// Orders entries by their full raw path using byte-wise comparison.
pub fn compare_paths(a: &FileEntry, b: &FileEntry) -> std::cmp::Ordering {
    a.path.as_bytes().cmp(b.path.as_bytes())
}

/// In-memory model of one IAR `.ewp` project file.
/// 單一 IAR `.ewp` 專案檔的記憶體模型。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EwpDocument {
    pub declaration: Option<XmlDeclaration>,
    pub file_version: i32,
    pub configurations: Vec<OpaqueBlock>,
    pub groups: Vec<OpaqueBlock>,
    pub files: Vec<FileEntry>,
}

impl EwpDocument {
    /// Creates an empty project without prolog, blocks or files.
    pub fn new(file_version: i32) -> Self {
        Self {
            declaration: None,
            file_version,
            configurations: Vec::new(),
            groups: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Appends `entry` and re-sorts every file by full path.
    /// 加入檔案並依完整路徑重新排序；不會去除重複項目。
    ///
    /// Entries sharing a path are kept side by side. Call [`Self::contains`]
    /// first when uniqueness matters.
    pub fn insert_file(&mut self, entry: FileEntry) {
        trace!("inserting {} into project", entry.path);
        self.files.push(entry);
        self.sort_files();
    }

    pub fn sort_files(&mut self) {
        self.files.sort_by(compare_paths);
    }

    pub fn is_sorted(&self) -> bool {
        self.files
            .windows(2)
            .all(|pair| compare_paths(&pair[0], &pair[1]).is_le())
    }

    /// Returns `true` when some entry has exactly the same path; exclusions
    /// are ignored.
    pub fn contains(&self, entry: &FileEntry) -> bool {
        self.find_file(&entry.path).is_some()
    }

    /// Looks up the first entry whose path equals `path`.
    /// 依完整路徑尋找檔案項目。
    pub fn find_file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|file| file.path == path)
    }
}
