use std::path::{Component, Path};

use crate::Error;

/// Validates a destination object key before any remote call.
///
/// Rejects:
/// - Empty keys
/// - Absolute keys (`/a/b`, `C:\a`)
/// - Parent directory traversal (`..`)
/// - Keys ending with `/` (those name a folder, not an object)
pub fn validate_destination_key(key: &str) -> Result<(), Error> {
    if key.trim().is_empty() {
        return Err(Error::InvalidKey("empty key".into()));
    }

    if key.ends_with('/') {
        return Err(Error::InvalidKey(format!("key names a folder: {key}")));
    }

    let path = Path::new(key);

    if path.is_absolute() {
        return Err(Error::InvalidKey(format!("absolute key not allowed: {key}")));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(Error::InvalidKey(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(Error::InvalidKey(format!("absolute key not allowed: {key}")));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
