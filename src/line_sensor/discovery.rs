// Serial device discovery by stable id
//
// udev publishes symlinks under /dev/serial/by-id named after the USB
// descriptor; the first entry whose name contains the keyword is resolved
// to its real device node.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

pub fn discover_device(dir: &Path, keyword: &str) -> Option<PathBuf> {
    let keyword = keyword.to_lowercase();
    let entries = fs::read_dir(dir).ok()?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().to_lowercase().contains(&keyword) {
            continue;
        }
        match fs::canonicalize(entry.path()) {
            Ok(path) => {
                debug!("Discovered {} -> {}", entry.path().display(), path.display());
                return Some(path);
            }
            Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    None
}
