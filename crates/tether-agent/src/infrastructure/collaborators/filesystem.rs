//! [`FileBrowser`] over the local filesystem.  Read-only: nothing here
//! creates, modifies, or deletes a file.
//!
//! Failures are reported as `FsResult::Err` with a human-readable message;
//! the error strings are part of the wire contract and the server prints
//! them verbatim.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use tether_core::protocol::payloads::{
    format_size, DirectoryListing, Drive, DriveList, EntryKind, FileContent, FileDetails,
    FileEntry, FsResult, Permissions, MAX_DOWNLOAD_BYTES,
};
use tracing::debug;

use crate::application::collaborators::FileBrowser;

const NOT_AVAILABLE: &str = "N/A";

/// Browses the filesystem as the agent process sees it.
#[derive(Debug, Clone)]
pub struct LocalFileBrowser {
    max_download_bytes: u64,
}

impl Default for LocalFileBrowser {
    fn default() -> Self {
        Self {
            max_download_bytes: MAX_DOWNLOAD_BYTES,
        }
    }
}

impl LocalFileBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the download size cap.
    pub fn with_max_download_bytes(max_download_bytes: u64) -> Self {
        Self { max_download_bytes }
    }

    fn list_dir(&self, dir: &Path) -> FsResult<DirectoryListing> {
        let shown = dir.display().to_string();
        if !dir.exists() {
            return FsResult::failed(format!("Path does not exist: {shown}"), shown);
        }
        if !dir.is_dir() {
            return FsResult::failed(format!("Path is not a directory: {shown}"), shown);
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return FsResult::failed(
                    format!("Permission denied accessing directory: {shown}"),
                    shown,
                );
            }
            Err(e) => return FsResult::failed(format!("Error listing directory: {e}"), shown),
        };

        let mut items: Vec<FileEntry> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(describe_entry(
                    &entry.path(),
                    entry.file_name().to_string_lossy().into_owned(),
                )),
                Err(e) => {
                    debug!("skipping unreadable entry in {shown}: {e}");
                    None
                }
            })
            .collect();
        items.sort_by_key(|item| (item.kind != EntryKind::Directory, item.name.to_lowercase()));

        FsResult::Ok(DirectoryListing {
            parent_path: dir.parent().map(|p| p.display().to_string()),
            path: shown,
            total_items: items.len(),
            items,
            timestamp: now_iso(),
        })
    }
}

impl FileBrowser for LocalFileBrowser {
    fn list(&self, path: Option<String>) -> FsResult<DirectoryListing> {
        let requested = path.filter(|p| !p.is_empty());
        match absolutize(requested.as_deref()) {
            Ok(dir) => self.list_dir(&dir),
            Err(e) => FsResult::failed(
                format!("Error listing directory: {e}"),
                requested.unwrap_or_else(|| "unknown".to_string()),
            ),
        }
    }

    fn info(&self, path: &str) -> FsResult<FileDetails> {
        let target = Path::new(path);
        if !target.exists() {
            return FsResult::failed(format!("File does not exist: {path}"), path);
        }
        let meta = match fs::metadata(target) {
            Ok(meta) => meta,
            Err(e) => return FsResult::failed(format!("Error getting file info: {e}"), path),
        };

        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let permissions = permissions_of(target, &meta);
        let is_downloadable =
            meta.is_file() && permissions.readable && meta.len() <= self.max_download_bytes;

        FsResult::Ok(FileDetails {
            path: path.to_string(),
            name: base_name(target),
            size: meta.len(),
            size_formatted: format_size(meta.len()),
            kind,
            created: iso_or_na(meta.created().or_else(|_| meta.modified())),
            modified: iso_or_na(meta.modified()),
            accessed: iso_or_na(meta.accessed()),
            permissions,
            is_downloadable,
        })
    }

    fn download(&self, path: &str) -> FsResult<FileContent> {
        let target = Path::new(path);
        if !target.exists() {
            return FsResult::failed(format!("File does not exist: {path}"), path);
        }
        if !target.is_file() {
            return FsResult::failed(format!("Path is not a file: {path}"), path);
        }

        let mut file = match File::open(target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return FsResult::failed(format!("Permission denied reading file: {path}"), path);
            }
            Err(e) => return FsResult::failed(format!("Error downloading file: {e}"), path),
        };
        let size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => return FsResult::failed(format!("Error downloading file: {e}"), path),
        };
        if size > self.max_download_bytes {
            return FsResult::failed(
                format!(
                    "File too large (max {}): {}",
                    format_size(self.max_download_bytes),
                    format_size(size)
                ),
                path,
            );
        }

        let mut bytes = Vec::with_capacity(size as usize);
        if let Err(e) = io::Read::read_to_end(&mut file, &mut bytes) {
            return FsResult::failed(format!("Error downloading file: {e}"), path);
        }
        debug!("read {} bytes from {path}", bytes.len());

        FsResult::Ok(FileContent {
            path: path.to_string(),
            filename: base_name(target),
            size: bytes.len() as u64,
            size_formatted: format_size(bytes.len() as u64),
            data: STANDARD.encode(&bytes),
            timestamp: now_iso(),
        })
    }

    fn drives(&self) -> FsResult<DriveList> {
        FsResult::Ok(DriveList {
            drives: probe_drives(),
            timestamp: now_iso(),
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// One listing row.  An entry that cannot be inspected (a dangling symlink,
/// a file removed mid-listing) is still reported, with kind `error`.
fn describe_entry(path: &Path, name: String) -> FileEntry {
    let shown = path.display().to_string();
    match fs::metadata(path) {
        Ok(meta) => {
            let kind = kind_of(&meta);
            let size = if kind == EntryKind::File { meta.len() } else { 0 };
            FileEntry {
                name,
                path: shown,
                kind,
                size,
                size_formatted: format_size(size),
                modified: iso_or_na(meta.modified()),
                permissions: permissions_of(path, &meta),
                error: None,
            }
        }
        Err(e) => FileEntry {
            name,
            path: shown,
            kind: EntryKind::Error,
            size: 0,
            size_formatted: NOT_AVAILABLE.to_string(),
            modified: NOT_AVAILABLE.to_string(),
            permissions: Permissions::default(),
            error: Some(e.to_string()),
        },
    }
}

fn kind_of(meta: &Metadata) -> EntryKind {
    if meta.is_dir() {
        EntryKind::Directory
    } else if meta.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

/// Access as this process would get it.  Readability is probed by opening
/// the entry; special files are never opened because a FIFO would block.
fn permissions_of(path: &Path, meta: &Metadata) -> Permissions {
    let readable = if meta.is_dir() {
        fs::read_dir(path).is_ok()
    } else if meta.is_file() {
        File::open(path).is_ok()
    } else {
        false
    };
    Permissions {
        readable,
        writable: !meta.permissions().readonly(),
        executable: is_executable(path, meta),
    }
}

#[cfg(unix)]
fn is_executable(_path: &Path, meta: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, meta: &Metadata) -> bool {
    if meta.is_dir() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ["exe", "bat", "cmd", "com"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(windows)]
fn probe_drives() -> Vec<Drive> {
    (b'A'..=b'Z')
        .filter_map(|letter| {
            let letter = char::from(letter).to_string();
            let root = format!("{letter}:\\");
            Path::new(&root).exists().then(|| Drive {
                accessible: fs::read_dir(&root).is_ok(),
                letter,
                path: root,
            })
        })
        .collect()
}

#[cfg(not(windows))]
fn probe_drives() -> Vec<Drive> {
    vec![Drive {
        letter: "/".to_string(),
        path: "/".to_string(),
        accessible: fs::read_dir("/").is_ok(),
    }]
}

/// Makes `path` absolute against the working directory and folds `.` and
/// `..` lexically.  `None` means the working directory itself.
fn absolutize(path: Option<&str>) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let joined = match path {
        None => return Ok(cwd),
        Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
        Some(p) => cwd.join(p),
    };

    let mut folded = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other.as_os_str()),
        }
    }
    Ok(folded)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn iso_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.f")
        .to_string()
}

fn iso_or_na(time: io::Result<SystemTime>) -> String {
    time.map(iso_time)
        .unwrap_or_else(|_| NOT_AVAILABLE.to_string())
}

fn now_iso() -> String {
    iso_time(SystemTime::now())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::protocol::payloads::FsFailure;
    use uuid::Uuid;

    /// A fresh directory under the system temp dir, removed on drop.
    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("tether-fs-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn path(&self) -> &Path {
            &self.0
        }

        fn shown(&self) -> String {
            self.0.display().to_string()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.0).ok();
        }
    }

    fn unwrap_ok<T: std::fmt::Debug>(result: FsResult<T>) -> T {
        match result {
            FsResult::Ok(value) => value,
            FsResult::Err(failure) => panic!("expected success, got {failure:?}"),
        }
    }

    fn unwrap_err<T: std::fmt::Debug>(result: FsResult<T>) -> FsFailure {
        match result {
            FsResult::Err(failure) => failure,
            FsResult::Ok(value) => panic!("expected failure, got {value:?}"),
        }
    }

    #[test]
    fn test_listing_puts_directories_first_then_names_case_insensitively() {
        // Arrange
        let tmp = TempDir::new();
        fs::write(tmp.path().join("b.txt"), b"bb").unwrap();
        fs::write(tmp.path().join("A.txt"), b"a").unwrap();
        fs::create_dir(tmp.path().join("zeta")).unwrap();
        fs::create_dir(tmp.path().join("Alpha")).unwrap();

        // Act
        let listing = unwrap_ok(LocalFileBrowser::new().list(Some(tmp.shown())));

        // Assert
        let names: Vec<&str> = listing.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta", "A.txt", "b.txt"]);
        assert_eq!(listing.total_items, 4);
        assert_eq!(listing.path, tmp.shown());
        assert_eq!(
            listing.parent_path,
            tmp.path().parent().map(|p| p.display().to_string())
        );
    }

    #[test]
    fn test_listing_reports_sizes_for_files_only() {
        let tmp = TempDir::new();
        fs::write(tmp.path().join("data.bin"), vec![0u8; 1536]).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let listing = unwrap_ok(LocalFileBrowser::new().list(Some(tmp.shown())));

        let dir = &listing.items[0];
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!((dir.size, dir.size_formatted.as_str()), (0, "0 B"));
        let file = &listing.items[1];
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!((file.size, file.size_formatted.as_str()), (1536, "1.5 KB"));
        assert!(file.permissions.readable);
        assert_ne!(file.modified, NOT_AVAILABLE);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_listed_as_an_error_entry() {
        // Arrange
        let tmp = TempDir::new();
        std::os::unix::fs::symlink(tmp.path().join("missing"), tmp.path().join("dangling"))
            .unwrap();

        // Act
        let listing = unwrap_ok(LocalFileBrowser::new().list(Some(tmp.shown())));

        // Assert
        let entry = &listing.items[0];
        assert_eq!(entry.kind, EntryKind::Error);
        assert_eq!(entry.size_formatted, "N/A");
        assert_eq!(entry.modified, "N/A");
        assert_eq!(entry.permissions, Permissions::default());
        assert!(entry.error.is_some());
    }

    #[test]
    fn test_listing_missing_directory_fails_with_its_path() {
        let tmp = TempDir::new();
        let missing = tmp.path().join("nope").display().to_string();

        let failure = unwrap_err(LocalFileBrowser::new().list(Some(missing.clone())));

        assert_eq!(failure.error, format!("Path does not exist: {missing}"));
        assert_eq!(failure.path, Some(missing));
    }

    #[test]
    fn test_listing_a_file_fails() {
        let tmp = TempDir::new();
        let file = tmp.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        let shown = file.display().to_string();

        let failure = unwrap_err(LocalFileBrowser::new().list(Some(shown.clone())));

        assert_eq!(failure.error, format!("Path is not a directory: {shown}"));
    }

    #[test]
    fn test_listing_without_a_path_uses_the_working_directory() {
        let listing = unwrap_ok(LocalFileBrowser::new().list(None));

        assert_eq!(
            listing.path,
            std::env::current_dir().unwrap().display().to_string()
        );
    }

    #[test]
    fn test_relative_paths_are_made_absolute_and_folded() {
        // Arrange
        let cwd = std::env::current_dir().unwrap();

        // Act
        let folded = absolutize(Some("a/./b/../c")).unwrap();

        // Assert
        assert_eq!(folded, cwd.join("a").join("c"));
        assert!(folded.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_root_has_no_parent() {
        let listing = unwrap_ok(LocalFileBrowser::new().list(Some("/".to_string())));
        assert_eq!(listing.parent_path, None);
    }

    #[test]
    fn test_info_describes_a_small_file_as_downloadable() {
        // Arrange
        let tmp = TempDir::new();
        let file = tmp.path().join("notes.txt");
        fs::write(&file, b"hello").unwrap();
        let shown = file.display().to_string();

        // Act
        let details = unwrap_ok(LocalFileBrowser::new().info(&shown));

        // Assert
        assert_eq!(details.name, "notes.txt");
        assert_eq!(details.size, 5);
        assert_eq!(details.size_formatted, "5.0 B");
        assert_eq!(details.kind, EntryKind::File);
        assert!(details.is_downloadable);
        assert_ne!(details.created, NOT_AVAILABLE);
    }

    #[test]
    fn test_info_marks_directories_and_large_files_not_downloadable() {
        let tmp = TempDir::new();
        let file = tmp.path().join("big.bin");
        fs::write(&file, vec![0u8; 64]).unwrap();
        let browser = LocalFileBrowser::with_max_download_bytes(16);

        let dir = unwrap_ok(browser.info(&tmp.shown()));
        let big = unwrap_ok(browser.info(&file.display().to_string()));

        assert_eq!(dir.kind, EntryKind::Directory);
        assert!(!dir.is_downloadable);
        assert!(!big.is_downloadable);
    }

    #[test]
    fn test_info_missing_file() {
        let failure = unwrap_err(LocalFileBrowser::new().info("/definitely/not/here"));
        assert_eq!(failure.error, "File does not exist: /definitely/not/here");
        assert_eq!(failure.path.as_deref(), Some("/definitely/not/here"));
    }

    #[test]
    fn test_download_returns_base64_content() {
        // Arrange
        let tmp = TempDir::new();
        let file = tmp.path().join("report.pdf");
        fs::write(&file, b"%PDF-1.4").unwrap();
        let shown = file.display().to_string();

        // Act
        let content = unwrap_ok(LocalFileBrowser::new().download(&shown));

        // Assert
        assert_eq!(content.filename, "report.pdf");
        assert_eq!(content.size, 8);
        assert_eq!(STANDARD.decode(&content.data).unwrap(), b"%PDF-1.4");
        assert_eq!(content.path, shown);
    }

    #[test]
    fn test_download_refuses_directories() {
        let tmp = TempDir::new();

        let failure = unwrap_err(LocalFileBrowser::new().download(&tmp.shown()));

        assert_eq!(failure.error, format!("Path is not a file: {}", tmp.shown()));
    }

    #[test]
    fn test_download_refuses_files_over_the_cap() {
        // Arrange
        let tmp = TempDir::new();
        let file = tmp.path().join("big.bin");
        fs::write(&file, vec![0u8; 2048]).unwrap();
        let browser = LocalFileBrowser::with_max_download_bytes(1024);

        // Act
        let failure = unwrap_err(browser.download(&file.display().to_string()));

        // Assert
        assert_eq!(failure.error, "File too large (max 1.0 KB): 2.0 KB");
    }

    #[test]
    fn test_default_cap_message_matches_ten_megabytes() {
        assert_eq!(format_size(LocalFileBrowser::new().max_download_bytes), "10.0 MB");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_drives_reports_the_root_elsewhere_than_windows() {
        let drives = unwrap_ok(LocalFileBrowser::new().drives());
        assert_eq!(
            drives.drives,
            vec![Drive {
                letter: "/".to_string(),
                path: "/".to_string(),
                accessible: true,
            }]
        );
    }
}
