//! Crash-safe file primitives.
//!
//! Nothing here ever writes in place: new bytes land in a temp file in the
//! target directory, are synced, and are renamed over the destination. A
//! reader therefore sees either the old file or the new one, never a torn
//! write. Temp files are removed when their handle drops, so an early return
//! leaves nothing behind.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde_json::{Map, Value};
use tempfile::{Builder, NamedTempFile};

/// Write `contents` to `path`, refreshing `backup` from the current primary
/// first.
///
/// Backup failures are logged and do not abort the write. Any other failure
/// leaves `path` exactly as it was.
pub(crate) fn write_with_backup(path: &Path, backup: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path)?;

    let staged = stage(dir, &temp_prefix(path), contents)?;

    if path.exists() {
        if let Err(e) = copy_atomic(path, backup) {
            log::warn!(
                "failed to refresh backup {} (continuing without it): {}",
                backup.display(),
                e
            );
        }
    }

    staged.persist(path).map_err(|e| e.error)?;

    if let Err(e) = sync_dir(dir) {
        log::debug!("directory sync for {} skipped: {}", dir.display(), e);
    }
    Ok(())
}

/// Copy `src` over `dest` via a synced temp file and a rename.
pub(crate) fn copy_atomic(src: &Path, dest: &Path) -> io::Result<()> {
    let dir = parent_dir(dest)?;
    let mut source = File::open(src)?;

    let mut staged = Builder::new()
        .prefix(&temp_prefix(dest))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    io::copy(&mut source, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    // Metadata is cosmetic; keep going if it cannot be carried over.
    if let Ok(meta) = fs::metadata(src) {
        let _ = staged.as_file().set_permissions(meta.permissions());
    }

    staged.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Read and parse a JSON document whose root must be an object.
pub(crate) fn read_document(path: &Path) -> Result<Map<String, Value>, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn stage(dir: &Path, prefix: &str, contents: &[u8]) -> io::Result<NamedTempFile> {
    let mut staged = Builder::new().prefix(prefix).suffix(".tmp").tempfile_in(dir)?;
    staged.write_all(contents)?;
    staged.flush()?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        Some(_) => Ok(Path::new(".")),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )),
    }
}

fn temp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    format!(".{}.", name)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leftover_temps(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_write_creates_primary_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.json.bak");

        write_with_backup(&path, &backup, br#"{"a":1}"#).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"a":1}"#);
        assert!(!backup.exists());
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_write_rotates_previous_primary_into_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.json.bak");

        write_with_backup(&path, &backup, br#"{"v":1}"#).unwrap();
        write_with_backup(&path, &backup, br#"{"v":2}"#).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"v":2}"#);
        assert_eq!(fs::read_to_string(&backup).unwrap(), r#"{"v":1}"#);
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_write_leaves_primary_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.json.bak");
        write_with_backup(&path, &backup, br#"{"v":1}"#).unwrap();

        // Target directory vanished: staging fails before any rename.
        let gone = dir.path().join("missing").join("config.json");
        assert!(write_with_backup(&gone, &backup, br#"{"v":2}"#).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"v":1}"#);
    }

    #[test]
    fn test_failed_rename_discards_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.json.bak");
        write_with_backup(&path, &backup, br#"{"v":1}"#).unwrap();
        write_with_backup(&path, &backup, br#"{"v":2}"#).unwrap();

        // A non-empty directory at the target makes the final rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), r#"{"v":2}"#).unwrap();

        assert!(write_with_backup(&path, &backup, br#"{"v":3}"#).is_err());

        assert_eq!(fs::read_to_string(path.join("inner")).unwrap(), r#"{"v":2}"#);
        assert_eq!(fs::read_to_string(&backup).unwrap(), r#"{"v":1}"#);
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_read_document_rejects_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, "[1, 2]").unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(err.contains("an array"));

        fs::write(&path, "{\"prefix\": ").unwrap();
        assert!(read_document(&path).is_err());

        fs::write(&path, "{\"prefix\": \"!\"}").unwrap();
        let doc = read_document(&path).unwrap();
        assert_eq!(doc.get("prefix"), Some(&Value::from("!")));
    }

    #[test]
    fn test_copy_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("config.json.bak");
        let dest = dir.path().join("config.json");
        fs::write(&src, "{}").unwrap();

        copy_atomic(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{}");
        assert!(leftover_temps(dir.path()).is_empty());
    }
}
