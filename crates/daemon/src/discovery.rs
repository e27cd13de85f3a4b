// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk image discovery for the discoverable target classes.

use std::io;
use std::path::{Path, PathBuf};

use sysupdate_core::{ImageType, TargetClass};
use tracing::debug;

/// One image found under a class directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImage {
    pub name: String,
    pub path: PathBuf,
    pub image_type: ImageType,
}

/// Directory searched for a discoverable class. `root` overrides the
/// `/var/lib` prefix (used by tests).
pub fn class_root(class: TargetClass, root: Option<&Path>) -> PathBuf {
    let dir = match class {
        TargetClass::Machine => "machines",
        TargetClass::Portable => "portables",
        TargetClass::Sysext => "extensions",
        TargetClass::Confext => "confexts",
        TargetClass::Host | TargetClass::Component => "",
    };
    root.unwrap_or_else(|| Path::new("/var/lib")).join(dir)
}

/// Scan one class directory.
///
/// Directories become `Directory` images, `*.raw` files become `Raw`,
/// block devices become `Block`. Hidden entries are skipped, which also
/// covers the `.host` image the daemon enrolls itself.
pub fn discover_images(class: TargetClass, dir: &Path) -> io::Result<Vec<DiscoveredImage>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat image candidate, skipping");
                continue;
            }
        };

        let file_type = metadata.file_type();
        let (name, image_type) = if file_type.is_dir() {
            (name.to_string(), ImageType::Directory)
        } else if is_block_device(&file_type) {
            (name.to_string(), ImageType::Block)
        } else if file_type.is_file() {
            match name.strip_suffix(".raw") {
                Some(stem) if !stem.is_empty() => (stem.to_string(), ImageType::Raw),
                _ => continue,
            }
        } else {
            continue;
        };

        debug!(class = %class, name, path = %path.display(), "discovered image");
        images.push(DiscoveredImage { name, path, image_type });
    }

    images.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(images)
}

fn is_block_device(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device()
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
