//! The abstract file-system interface exported over NFS.
//!
//! Embedders implement [`FileSystem`] to make any storage reachable by NFS
//! clients. The trait is path-based: the server owns the mapping between
//! opaque NFS file handles and canonical paths, and hands the backend plain
//! `/`-separated paths rooted at the export.
//!
//! Errors carry a [`FsError`] kind so the protocol layer can map them onto
//! NFS status codes without inspecting message strings.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

pub type FsResult<T> = Result<T, FsError>;

/// Error kinds a backend can report.
///
/// Every variant has a fixed NFS status mapping; I/O errors that fit no
/// other kind travel in [`FsError::Io`] with their message preserved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    Permission,
    #[error("file exists")]
    Exists,
    #[error("invalid argument")]
    Invalid,
    #[error("directory not empty")]
    NotEmpty,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("no space left on device")]
    NoSpace,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("read-only file system")]
    ReadOnly,
    #[error("file too large")]
    TooLarge,
    #[error("filename too long")]
    NameTooLong,
    #[error("operation not supported")]
    NotSupported,
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> FsError {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Permission,
            ErrorKind::AlreadyExists => FsError::Exists,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => FsError::Invalid,
            ErrorKind::DirectoryNotEmpty => FsError::NotEmpty,
            ErrorKind::IsADirectory => FsError::IsDirectory,
            ErrorKind::NotADirectory => FsError::NotDirectory,
            ErrorKind::StorageFull => FsError::NoSpace,
            ErrorKind::QuotaExceeded => FsError::QuotaExceeded,
            ErrorKind::ReadOnlyFilesystem => FsError::ReadOnly,
            ErrorKind::FileTooLarge => FsError::TooLarge,
            ErrorKind::InvalidFilename => FsError::NameTooLong,
            ErrorKind::Unsupported => FsError::NotSupported,
            // Unclassified errors keep their message; this is the only
            // place a string survives the mapping.
            _ => FsError::Io(err.to_string()),
        }
    }
}

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        SystemTime::now().into()
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Timestamp {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp { seconds: since.as_secs(), nanos: since.subsec_nanos() }
    }
}

impl From<Timestamp> for filetime::FileTime {
    fn from(time: Timestamp) -> filetime::FileTime {
        filetime::FileTime::from_unix_time(time.seconds as i64, time.nanos)
    }
}

/// Kind of a file-system object.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FileKind {
    #[default]
    Regular,
    Directory,
    Symlink,
    Socket,
    Fifo,
    CharDevice,
    BlockDevice,
}

/// Attributes of a file-system object, as returned by [`FileSystem::stat`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileKind,
    /// Permission bits, `0o777`-style plus setuid/setgid/sticky.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Bytes allocated on the underlying storage.
    pub used: u64,
    /// Major/minor numbers for device nodes.
    pub rdev: (u32, u32),
    pub fsid: u64,
    /// Stable identifier of the object within the backend; 0 is reserved.
    pub fileid: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub fileid: u64,
    pub kind: FileKind,
}

/// Capacity figures reported by FSSTAT.
#[derive(Copy, Clone, Debug)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
    pub available_files: u64,
}

impl Default for FsStats {
    fn default() -> FsStats {
        FsStats {
            total_bytes: 1 << 40,
            free_bytes: 1 << 39,
            available_bytes: 1 << 39,
            total_files: 1 << 20,
            free_files: 1 << 19,
            available_files: 1 << 19,
        }
    }
}

/// The operations a backend must provide.
///
/// Paths are normalized, `/`-separated and always start with `/`; the server
/// guarantees they cannot escape the export root. Implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Returns the attributes of the object at `path`, following symlinks.
    async fn stat(&self, path: &str) -> FsResult<FileAttr>;

    /// Returns the attributes of the object itself, not following symlinks.
    async fn lstat(&self, path: &str) -> FsResult<FileAttr> {
        self.stat(path).await
    }

    /// Lists a directory. Entry order must be stable between calls as long
    /// as the directory is unchanged.
    async fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>>;

    /// Reads up to `count` bytes at `offset`. The boolean is true when the
    /// read reached end of file.
    async fn read_file(&self, path: &str, offset: u64, count: u32) -> FsResult<(Vec<u8>, bool)>;

    /// Writes `data` at `offset`, extending the file if needed. Returns the
    /// number of bytes written.
    async fn write_file(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<u32>;

    /// Creates a regular file.
    async fn create(&self, path: &str, mode: u32) -> FsResult<FileAttr>;

    /// Creates a directory.
    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<FileAttr>;

    /// Removes a file or an empty directory.
    async fn remove(&self, path: &str) -> FsResult<()>;

    /// Removes a path and everything beneath it.
    async fn remove_all(&self, path: &str) -> FsResult<()> {
        self.remove(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()>;

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    async fn chtimes(
        &self,
        path: &str,
        atime: Option<Timestamp>,
        mtime: Option<Timestamp>,
    ) -> FsResult<()>;

    async fn truncate(&self, path: &str, size: u64) -> FsResult<()>;

    /// Creates a symbolic link at `link` pointing at `target`. The target
    /// string is stored verbatim.
    async fn symlink(&self, target: &str, link: &str) -> FsResult<()>;

    /// Returns the stored target of a symbolic link.
    async fn readlink(&self, path: &str) -> FsResult<String>;

    /// Creates a hard link. Backends without hard links keep the default.
    async fn link(&self, _source: &str, _link: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Creates a special node (device, socket or FIFO). Backends without
    /// device support keep the default.
    async fn mknod(
        &self,
        _path: &str,
        _kind: FileKind,
        _mode: u32,
        _rdev: (u32, u32),
    ) -> FsResult<FileAttr> {
        Err(FsError::NotSupported)
    }

    /// Forces previously written data for `path` to stable storage.
    async fn flush(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    /// Capacity figures for FSSTAT. The default reports a roomy synthetic
    /// file system, which is adequate for virtual backends.
    async fn fs_stat(&self) -> FsResult<FsStats> {
        Ok(FsStats::default())
    }
}
