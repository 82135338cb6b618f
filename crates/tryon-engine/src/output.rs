use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tryon_contracts::images::ImageData;

/// File name used when the output is saved into a directory.
pub const DOWNLOAD_FILE_NAME: &str = "virtual-try-on.png";

/// Writes the image to `target`, or to `target/virtual-try-on.png` when
/// `target` is an existing directory. Returns the written path.
pub fn save_output(image: &ImageData, target: &Path) -> Result<PathBuf> {
    let path = if target.is_dir() {
        target.join(DOWNLOAD_FILE_NAME)
    } else {
        target.to_path_buf()
    };
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
