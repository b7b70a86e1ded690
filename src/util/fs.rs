use std::io::Write;
use std::path::Path;

/// Atomically writes a byte buffer to a file using the
/// write-to-temp-then-rename pattern.
///
/// The destination is never left in a partial state: either the previous
/// contents survive untouched or the new contents replace them completely.
/// The temp file lives in the destination directory so the final rename
/// stays on one filesystem.
///
/// # Arguments
///
/// * `path` - Destination file path
/// * `data` - Bytes to persist
///
/// # Errors
///
/// Returns the underlying I/O error if the temp file cannot be created,
/// written, synced or renamed. The temp file is cleaned up on failure.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    // SEC-009: Randomized temp filename so a concurrent writer or attacker
    // cannot predict the path and pre-create a symlink there.
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true) // Fails atomically if the file exists
        .open(&temp_path)?;

    if let Err(e) = temp_file.write_all(data) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    // Sync to disk so the data is durable before the rename makes it visible.
    if let Err(e) = temp_file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    drop(temp_file);

    // POSIX guarantees rename atomicity on the same filesystem.
    #[cfg(windows)]
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedvault_fs_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_writes_new_file() {
        let dir = test_dir("new");
        let path = dir.join("out.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_replaces_existing_file() {
        let dir = test_dir("replace");
        let path = dir.join("out.txt");
        std::fs::write(&path, b"old contents").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = test_dir("cleanup");
        let path = dir.join("out.txt");
        atomic_write(&path, b"data").unwrap();
        let entries: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1, "only the destination should remain: {:?}", entries);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_errors() {
        let path = std::env::temp_dir()
            .join(format!("feedvault_fs_missing_{}", std::process::id()))
            .join("nested")
            .join("out.txt");
        assert!(atomic_write(&path, b"data").is_err());
    }
}
