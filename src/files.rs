use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Reads a file that is allowed to be absent. Invalid UTF-8 is replaced
/// rather than rejected; checklists are hand-edited.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, String> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(format!("Failed to read {}: {}", path.display(), err)),
    }
}

pub(crate) fn write(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                format!("Failed to create directory {}: {}", parent.display(), err)
            })?;
        }
    }
    fs::write(path, content).map_err(|err| format!("Failed to write {}: {}", path.display(), err))
}

pub(crate) fn append(path: &Path, content: &str) -> Result<(), String> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| format!("Failed to open {}: {}", path.display(), err))?;
    file.write_all(content.as_bytes())
        .map_err(|err| format!("Failed to append to {}: {}", path.display(), err))
}

/// Removes a file; returns whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, String> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(format!("Failed to remove {}: {}", path.display(), err)),
    }
}
