//! The per-file copy, redirect and fallback sequence.
//!
//! A media server may hold any source file open while it is being moved.
//! The atomic redirect never leaves the source path missing, empty or
//! truncated:
//!
//! 1. copy `src` to `dest` with timestamps and ownership preserved
//! 2. make `dest` group read/write (best effort)
//! 3. create a uniquely named symlink to `dest` next to `src`
//! 4. `rename(2)` the symlink over `src`
//!
//! A reader that opened `src` before step 4 keeps reading the original inode,
//! which lives on until its last handle closes. Anyone opening the path after
//! step 4 follows the symlink to the cached copy.

use std::fs::{self, File, FileTimes, Metadata};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{Gid, Uid, chown};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tiercache_core::{RedirectMode, TierConfig, TransferError, TransferMode, TransferWarning};

/// Symlink and rename calls used by the redirect step.
///
/// The fallback move always goes straight to the filesystem; only the redirect
/// goes through this seam.
pub trait Linker: Send + Sync + std::fmt::Debug {
    /// Create a symbolic link at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// The real POSIX calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixLinker;

impl Linker for PosixLinker {
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Result of transferring a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    /// Bytes written to the destination.
    pub bytes: u64,
    /// Whether the source path now points at the destination.
    pub redirected: bool,
    /// Whether the redirect failed and the plain move was used instead.
    pub fell_back: bool,
    /// Non-fatal condition to surface in the batch outcome.
    pub warning: Option<TransferWarning>,
}

impl FileTransfer {
    fn new(bytes: u64, redirected: bool) -> Self {
        Self {
            bytes,
            redirected,
            fell_back: false,
            warning: None,
        }
    }
}

/// Executes the transfer sequence for one file.
#[derive(Debug, Clone)]
pub struct TransferPrimitive {
    config: Arc<TierConfig>,
    linker: Arc<dyn Linker>,
}

impl TransferPrimitive {
    /// Create a primitive using real symlink/rename calls.
    pub fn new(config: Arc<TierConfig>) -> Self {
        Self::with_linker(config, Arc::new(PosixLinker))
    }

    /// Create a primitive with a custom linker.
    pub fn with_linker(config: Arc<TierConfig>, linker: Arc<dyn Linker>) -> Self {
        Self { config, linker }
    }

    /// Transfer `src` to `dest`.
    ///
    /// Any failure before the redirect removes the partially written `dest`
    /// so a retry starts clean. The destination's parent must exist.
    pub fn transfer_one(
        &self,
        src: &Path,
        dest: &Path,
        mode: TransferMode,
    ) -> Result<FileTransfer, TransferError> {
        let metadata = fs::metadata(src).map_err(|e| TransferError::io(src, e))?;
        if !metadata.is_file() {
            return Err(TransferError::Io {
                path: src.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        if is_same_file(src, dest) {
            return Err(TransferError::SameFile {
                path: src.to_path_buf(),
            });
        }

        let dest = std::path::absolute(dest).map_err(|e| TransferError::io(dest, e))?;
        let size = metadata.len();
        let media = self.config.is_media(src);

        if media && mode == TransferMode::Move && self.config.redirect_mode == RedirectMode::Direct
        {
            return self.direct_redirect(src, &dest, &metadata);
        }

        if let Err(e) = copy_preserving(src, &dest, &metadata) {
            remove_partial(&dest);
            return Err(TransferError::io(src, e));
        }
        relax_permissions(&dest);

        match (media, mode) {
            (false, TransferMode::Move) => {
                if let Err(e) = fs::remove_file(src) {
                    remove_partial(&dest);
                    return Err(TransferError::io(src, e));
                }
                debug!(src = %src.display(), dest = %dest.display(), "moved");
                Ok(FileTransfer::new(size, false))
            }
            (false, TransferMode::Copy) => {
                debug!(src = %src.display(), dest = %dest.display(), "copied");
                Ok(FileTransfer::new(size, false))
            }
            (true, mode) => match self.atomic_redirect(src, &dest) {
                Ok(()) => {
                    info!(src = %src.display(), dest = %dest.display(), "redirected");
                    Ok(FileTransfer::new(size, true))
                }
                Err(redirect_err) if mode == TransferMode::Move => {
                    warn!(
                        src = %src.display(),
                        error = %redirect_err,
                        "redirect failed, falling back to plain move"
                    );
                    move_file(src, &dest, &metadata).map_err(|source| TransferError::Fallback {
                        path: src.to_path_buf(),
                        redirect: redirect_err.to_string(),
                        source,
                    })?;
                    Ok(FileTransfer {
                        fell_back: true,
                        ..FileTransfer::new(size, false)
                    })
                }
                Err(redirect_err) => {
                    warn!(
                        src = %src.display(),
                        error = %redirect_err,
                        "redirect failed, original left in place"
                    );
                    Ok(FileTransfer {
                        warning: Some(TransferWarning::redirect_skipped(src, &redirect_err)),
                        ..FileTransfer::new(size, false)
                    })
                }
            },
        }
    }

    /// Swap `src` for a symlink to `dest` via a temp link and `rename(2)`.
    fn atomic_redirect(&self, src: &Path, dest: &Path) -> Result<(), TransferError> {
        let temp_link = temp_link_path(src);
        self.linker
            .symlink(dest, &temp_link)
            .map_err(|source| TransferError::Redirect {
                path: temp_link.clone(),
                source,
            })?;

        if let Err(source) = self.linker.rename(&temp_link, src) {
            if let Err(e) = fs::remove_file(&temp_link) {
                warn!(link = %temp_link.display(), error = %e, "could not remove temp link");
            }
            return Err(TransferError::Redirect {
                path: src.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Degraded redirect: move first, then link the old path to the new one.
    fn direct_redirect(
        &self,
        src: &Path,
        dest: &Path,
        metadata: &Metadata,
    ) -> Result<FileTransfer, TransferError> {
        let size = metadata.len();
        move_file(src, dest, metadata).map_err(|e| {
            remove_partial(dest);
            TransferError::io(src, e)
        })?;
        relax_permissions(dest);

        match self.linker.symlink(dest, src) {
            Ok(()) => {
                info!(src = %src.display(), dest = %dest.display(), "moved and linked");
                Ok(FileTransfer::new(size, true))
            }
            Err(e) => {
                // The file itself is safely at dest; only the link is missing
                warn!(src = %src.display(), error = %e, "moved but could not link");
                Ok(FileTransfer {
                    warning: Some(TransferWarning::redirect_skipped(src, e)),
                    ..FileTransfer::new(size, false)
                })
            }
        }
    }
}

/// Check whether two paths already resolve to the same file.
fn is_same_file(src: &Path, dest: &Path) -> bool {
    match (fs::canonicalize(src), fs::canonicalize(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Hidden, unique name in the same directory as `src`.
///
/// The name does not embed the source name, so it stays within `NAME_MAX`
/// whatever the length of the file being redirected.
fn temp_link_path(src: &Path) -> PathBuf {
    src.with_file_name(format!(".tiercache-{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Copy contents and mode, then carry over timestamps and ownership.
fn copy_preserving(src: &Path, dest: &Path, metadata: &Metadata) -> io::Result<u64> {
    let bytes = fs::copy(src, dest)?;

    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Err(e) = File::options()
        .write(true)
        .open(dest)
        .and_then(|f| f.set_times(times))
    {
        debug!(dest = %dest.display(), error = %e, "could not preserve timestamps");
    }

    // Ownership changes need privileges; failing here is expected as a normal user
    if let Err(e) = chown(
        dest,
        Some(Uid::from_raw(metadata.uid())),
        Some(Gid::from_raw(metadata.gid())),
    ) {
        debug!(dest = %dest.display(), error = %e, "could not preserve ownership");
    }

    Ok(bytes)
}

/// Add group read/write to `path`, ignoring failures.
fn relax_permissions(path: &Path) {
    let Ok(metadata) = fs::metadata(path) else {
        return;
    };
    let mut perms = metadata.permissions();
    perms.set_mode(perms.mode() | 0o660);
    if let Err(e) = fs::set_permissions(path, perms) {
        debug!(path = %path.display(), error = %e, "could not adjust permissions");
    }
}

/// Rename, falling back to a preserving copy and unlink across filesystems.
fn move_file(src: &Path, dest: &Path, metadata: &Metadata) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => return Ok(()),
        Err(e) => debug!(src = %src.display(), error = %e, "rename failed, copying instead"),
    }
    copy_preserving(src, dest, metadata)?;
    relax_permissions(dest);
    fs::remove_file(src)
}

/// Remove whatever was written at `dest`, if anything.
fn remove_partial(dest: &Path) {
    match fs::remove_file(dest) {
        Ok(()) => debug!(dest = %dest.display(), "removed partial destination"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dest = %dest.display(), error = %e, "could not remove partial destination"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct NoSymlinks;

    impl Linker for NoSymlinks {
        fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks disabled"))
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            fs::rename(from, to)
        }
    }

    /// Real symlinks, but the rename over the source always fails.
    #[derive(Debug)]
    struct FailRename;

    impl Linker for FailRename {
        fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
            std::os::unix::fs::symlink(target, link)
        }

        fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "rename refused"))
        }
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("array")).unwrap();
        fs::create_dir_all(temp.path().join("cache")).unwrap();
        let src = temp.path().join("array/episode.mkv");
        let dest = temp.path().join("cache/episode.mkv");
        fs::write(&src, b"original bytes").unwrap();
        (temp, src, dest)
    }

    fn primitive() -> TransferPrimitive {
        TransferPrimitive::new(Arc::new(TierConfig::default()))
    }

    #[test]
    fn test_media_move_redirects() {
        let (_temp, src, dest) = setup();
        let result = primitive()
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();

        assert!(result.redirected);
        assert_eq!(result.bytes, 14);
        assert!(src.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&src).unwrap(), dest);
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
    }

    #[test]
    fn test_open_reader_is_not_interrupted() {
        let (_temp, src, dest) = setup();
        let mut reader = File::open(&src).unwrap();

        primitive()
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();

        // Make the cached copy distinguishable from the original inode
        fs::write(&dest, b"cached bytes").unwrap();

        let mut held = Vec::new();
        reader.read_to_end(&mut held).unwrap();
        assert_eq!(held, b"original bytes");
        assert_eq!(fs::read(&src).unwrap(), b"cached bytes");
    }

    #[test]
    fn test_non_media_move_deletes_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("notes.txt");
        let dest = temp.path().join("notes-cached.txt");
        fs::write(&src, "plain").unwrap();

        let result = primitive()
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();
        assert!(!result.redirected);
        assert!(src.symlink_metadata().is_err());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "plain");
    }

    #[test]
    fn test_non_media_copy_keeps_both() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("poster.jpg");
        let dest = temp.path().join("poster-copy.jpg");
        fs::write(&src, "img").unwrap();

        primitive()
            .transfer_one(&src, &dest, TransferMode::Copy)
            .unwrap();
        assert!(src.symlink_metadata().unwrap().is_file());
        assert!(dest.is_file());
    }

    #[test]
    fn test_fallback_move_when_symlink_fails() {
        let (_temp, src, dest) = setup();
        let primitive =
            TransferPrimitive::with_linker(Arc::new(TierConfig::default()), Arc::new(NoSymlinks));

        let result = primitive
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();
        assert!(result.fell_back);
        assert!(!result.redirected);
        assert!(src.symlink_metadata().is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
    }

    #[test]
    fn test_copy_mode_keeps_source_when_symlink_fails() {
        let (temp, src, dest) = setup();
        let primitive =
            TransferPrimitive::with_linker(Arc::new(TierConfig::default()), Arc::new(NoSymlinks));

        let result = primitive
            .transfer_one(&src, &dest, TransferMode::Copy)
            .unwrap();
        assert!(result.warning.is_some());
        assert!(src.symlink_metadata().unwrap().is_file());
        assert_eq!(fs::read(&src).unwrap(), b"original bytes");
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
        // No temp link left behind
        assert_eq!(fs::read_dir(temp.path().join("array")).unwrap().count(), 1);
    }

    #[test]
    fn test_direct_mode_links_after_move() {
        let (_temp, src, dest) = setup();
        let config = TierConfig::builder()
            .redirect_mode(RedirectMode::Direct)
            .build()
            .unwrap();
        let result = TransferPrimitive::new(Arc::new(config))
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();

        assert!(result.redirected);
        assert_eq!(fs::read_link(&src).unwrap(), dest);
        assert_eq!(fs::read(&src).unwrap(), b"original bytes");
    }

    #[test]
    fn test_already_redirected_is_same_file() {
        let (_temp, src, dest) = setup();
        let primitive = primitive();
        primitive
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();

        let err = primitive
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap_err();
        assert!(matches!(err, TransferError::SameFile { .. }));
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
    }

    #[test]
    fn test_missing_destination_parent_leaves_no_partial() {
        let (temp, src, _dest) = setup();
        let dest = temp.path().join("cache/missing-dir/episode.mkv");

        let err = primitive()
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
        assert!(src.is_file());
        assert!(!dest.exists());
    }

    #[test]
    fn test_preserves_mtime_and_group_rw() {
        let (_temp, src, dest) = setup();
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_times(FileTimes::new().set_modified(old))
            .unwrap();

        primitive()
            .transfer_one(&src, &dest, TransferMode::Copy)
            .unwrap();

        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(meta.modified().unwrap(), old);
        assert_eq!(meta.permissions().mode() & 0o060, 0o060);
    }

    #[test]
    fn test_long_filename_redirects() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("array")).unwrap();
        fs::create_dir_all(temp.path().join("cache")).unwrap();
        let name = format!("{}.mkv", "A".repeat(226));
        let src = temp.path().join("array").join(&name);
        let dest = temp.path().join("cache").join(&name);
        fs::write(&src, b"long name").unwrap();
        let mut reader = File::open(&src).unwrap();

        let result = primitive()
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();
        assert!(result.redirected);
        assert!(!result.fell_back);
        assert_eq!(fs::read_link(&src).unwrap(), dest);

        let mut held = Vec::new();
        reader.read_to_end(&mut held).unwrap();
        assert_eq!(held, b"long name");
    }

    #[test]
    fn test_temp_link_name_is_bounded() {
        let src = PathBuf::from(format!("/array/{}.mkv", "B".repeat(250)));
        let link = temp_link_path(&src);
        assert_eq!(link.parent(), src.parent());
        let name = link.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".tiercache-"));
        assert!(name.len() < 64);
    }

    #[test]
    fn test_copy_mode_rename_failure_removes_temp_link() {
        let (temp, src, dest) = setup();
        let primitive =
            TransferPrimitive::with_linker(Arc::new(TierConfig::default()), Arc::new(FailRename));

        let result = primitive
            .transfer_one(&src, &dest, TransferMode::Copy)
            .unwrap();
        assert!(result.warning.is_some());
        assert!(!result.redirected);
        assert!(src.symlink_metadata().unwrap().is_file());
        assert_eq!(fs::read(&src).unwrap(), b"original bytes");
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
        let entries: Vec<_> = fs::read_dir(temp.path().join("array"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("episode.mkv")]);
    }

    #[test]
    fn test_move_mode_rename_failure_falls_back() {
        let (temp, src, dest) = setup();
        let primitive =
            TransferPrimitive::with_linker(Arc::new(TierConfig::default()), Arc::new(FailRename));

        let result = primitive
            .transfer_one(&src, &dest, TransferMode::Move)
            .unwrap();
        assert!(result.fell_back);
        assert!(src.symlink_metadata().is_err());
        assert!(dest.symlink_metadata().unwrap().is_file());
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
        assert_eq!(fs::read_dir(temp.path().join("array")).unwrap().count(), 0);
    }

    #[test]
    fn test_move_across_filesystems_preserves_mtime() {
        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let other = TempDir::new_in(shm).unwrap();
        let (_temp, src, _dest) = setup();
        if fs::metadata(other.path()).unwrap().dev() == fs::metadata(&src).unwrap().dev() {
            return;
        }

        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(2_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_times(FileTimes::new().set_modified(old))
            .unwrap();
        let metadata = fs::metadata(&src).unwrap();
        let dest = other.path().join("episode.mkv");

        move_file(&src, &dest, &metadata).unwrap();
        assert!(src.symlink_metadata().is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"original bytes");
        assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), old);
    }
}
