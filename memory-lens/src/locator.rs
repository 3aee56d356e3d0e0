use crate::types::{DiscoveryError, IndexerError, Result};
use crate::utils::path::{has_image_extension, to_key};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Images found under a root, plus whatever could not be read on the way.
#[derive(Debug, Default)]
pub struct Discovery {
    pub images: Vec<PathBuf>,
    pub errors: Vec<DiscoveryError>,
}

/// Recursively enumerates image files under a root directory.
pub struct ImageLocator {
    root: PathBuf,
}

impl ImageLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk the tree. Paths are root-joined, deduplicated and sorted by their
    /// normalized key, so `images` and `./images/` yield the same keys. Unreadable entries are reported in `errors` and
    /// the walk carries on; only a missing root is an error.
    pub fn locate(&self) -> Result<Discovery> {
        if !self.root.is_dir() {
            return Err(IndexerError::Discovery(DiscoveryError {
                path: to_key(&self.root),
                reason: "image root is not a readable directory".to_string(),
            }));
        }

        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(&self.root) {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && has_image_extension(entry.path()) {
                        let path = entry.into_path();
                        found.entry(to_key(&path)).or_insert(path);
                    }
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(to_key)
                        .unwrap_or_else(|| to_key(&self.root));
                    warn!("Skipping unreadable entry {}: {}", path, e);
                    errors.push(DiscoveryError {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let images: Vec<PathBuf> = found.into_values().collect();
        debug!("Located images: {:?}", images);
        info!(
            "Found {} images under {} ({} unreadable entries)",
            images.len(),
            self.root.display(),
            errors.len()
        );

        Ok(Discovery { images, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_nested_images_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/deeper")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("b/deeper/z.PNG"), b"x").unwrap();
        fs::write(root.join("a/photo.jpg"), b"x").unwrap();
        fs::write(root.join("top.jpeg"), b"x").unwrap();
        fs::write(root.join("scan.bmp"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join("a/anim.gif"), b"x").unwrap();

        let discovery = ImageLocator::new(root).locate().unwrap();
        let names: Vec<String> = discovery
            .images
            .iter()
            .map(|p| to_key(p.strip_prefix(root).unwrap()))
            .collect();

        assert_eq!(names, vec!["a/photo.jpg", "b/deeper/z.PNG", "scan.bmp", "top.jpeg"]);
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn root_spelling_does_not_change_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images/trip")).unwrap();
        fs::write(dir.path().join("images/a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("images/trip/b.png"), b"x").unwrap();

        let keys = |root: PathBuf| -> Vec<String> {
            ImageLocator::new(root).locate().unwrap().images.iter().map(|p| to_key(p)).collect()
        };
        let plain = keys(dir.path().join("images"));
        assert_eq!(plain.len(), 2);
        assert_eq!(plain, keys(dir.path().join("./images/")));
        assert_eq!(plain, keys(dir.path().join(".").join("images").join(".")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageLocator::new(dir.path().join("nope")).locate();
        assert!(matches!(result, Err(IndexerError::Discovery(_))));
    }

    #[test]
    fn directories_named_like_images_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("album.jpg")).unwrap();
        fs::write(dir.path().join("album.jpg/inner.jpg"), b"x").unwrap();

        let discovery = ImageLocator::new(dir.path()).locate().unwrap();
        assert_eq!(discovery.images.len(), 1);
        assert!(discovery.images[0].ends_with("album.jpg/inner.jpg"));
    }
}
