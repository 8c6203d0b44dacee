use std::path::{Component, Path};

use crate::TransferError;

/// Validates that an upload name is a single plain file name.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent or current directory components (`..`, `.`)
/// - Nested paths (`a/b`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (_, Some(Component::ParentDir)) => Err(
            TransferError::InvalidPath(format!("parent directory traversal not allowed: {name}")),
        ),
        (Some(Component::Prefix(_) | Component::RootDir), _) => Err(TransferError::InvalidPath(
            format!("absolute path not allowed: {name}"),
        )),
        _ => Err(TransferError::InvalidPath(format!(
            "name must be a single file name: {name}"
        ))),
    }
}
