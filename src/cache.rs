//! Path and tag canonicalization cache
//!
//! Lookups never canonicalize on their own; they ask a [`Cache`]. The trait
//! is the whole contract the matching code relies on. [`DevDiskCache`] is a
//! small implementation that resolves paths with `realpath(3)` and tags with
//! the udev `/dev/disk/by-*` symlinks.
//!
//! Caches are not thread-safe. Tables share them through `Rc`.

use crate::error::{MountError, MountResult};
use crate::utils::parse_tag;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Canonicalization services consumed by the matching engine
pub trait Cache {
    /// Absolute, symlink-free form of `path`
    fn canonicalize_path(&self, path: &str) -> Option<String>;

    /// Canonical device path for a `NAME=value` tag or a plain path
    fn canonicalize_spec(&self, spec: &str) -> Option<String> {
        if spec.contains('=') {
            let (name, value) = parse_tag(spec)?;
            self.resolve_tag(&name, &value)
        } else {
            self.canonicalize_path(spec)
        }
    }

    /// Load all tags of `device` into the cache.
    ///
    /// Fails with [`MountError::PermissionDenied`] when the tags are not
    /// readable by this user; callers fall back to [`Cache::resolve_tag`].
    fn read_tags_of(&self, device: &str) -> MountResult<()>;

    /// Whether `device` carries `tag=value`; only meaningful after
    /// [`Cache::read_tags_of`] succeeded for the device
    fn device_has_tag(&self, device: &str, tag: &str, value: &str) -> bool;

    /// Device path that `tag=value` points to
    fn resolve_tag(&self, tag: &str, value: &str) -> Option<String>;
}

const TAG_DIRS: &[(&str, &str)] = &[
    ("LABEL", "by-label"),
    ("UUID", "by-uuid"),
    ("PARTLABEL", "by-partlabel"),
    ("PARTUUID", "by-partuuid"),
];

/// Cache backed by `realpath(3)` and the udev `/dev/disk/by-*` symlinks
#[derive(Debug)]
pub struct DevDiskCache {
    disk_dir: PathBuf,
    paths: RefCell<HashMap<String, String>>,
    tags: RefCell<HashMap<String, Vec<(String, String)>>>,
}

impl DevDiskCache {
    pub fn new() -> Self {
        Self::with_disk_dir("/dev/disk")
    }

    /// Use a different directory than `/dev/disk` for the `by-*` links
    pub fn with_disk_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            disk_dir: dir.into(),
            paths: RefCell::new(HashMap::new()),
            tags: RefCell::new(HashMap::new()),
        }
    }

    fn tag_dir(&self, tag: &str) -> Option<PathBuf> {
        TAG_DIRS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, dir)| self.disk_dir.join(dir))
    }
}

impl Default for DevDiskCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for DevDiskCache {
    fn canonicalize_path(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        if let Some(hit) = self.paths.borrow().get(path) {
            return Some(hit.clone());
        }

        // unresolvable paths (not mounted yet, pseudo sources) stay as they are
        let resolved = fs::canonicalize(path)
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_else(|| path.to_string());

        debug!("canonicalized {} -> {}", path, resolved);
        self.paths
            .borrow_mut()
            .insert(path.to_string(), resolved.clone());
        Some(resolved)
    }

    fn read_tags_of(&self, device: &str) -> MountResult<()> {
        if self.tags.borrow().contains_key(device) {
            return Ok(());
        }

        let mut found = Vec::new();
        for (tag, dir) in TAG_DIRS {
            let entries = match fs::read_dir(self.disk_dir.join(dir)) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    return Err(MountError::PermissionDenied(format!(
                        "reading {} tags of {}",
                        tag, device
                    )));
                }
                Err(e) => return Err(MountError::io(format!("reading tags of {}", device), e)),
            };

            for entry in entries.flatten() {
                let link = entry.path();
                if canonical_str(&link).as_deref() != Some(device) {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    found.push((tag.to_string(), udev_decode(name)));
                }
            }
        }

        debug!("{}: read {} tags", device, found.len());
        self.tags.borrow_mut().insert(device.to_string(), found);
        Ok(())
    }

    fn device_has_tag(&self, device: &str, tag: &str, value: &str) -> bool {
        self.tags
            .borrow()
            .get(device)
            .is_some_and(|tags| tags.iter().any(|(t, v)| t == tag && v == value))
    }

    fn resolve_tag(&self, tag: &str, value: &str) -> Option<String> {
        let link = self.tag_dir(tag)?.join(udev_encode(value));
        canonical_str(&link)
    }
}

fn canonical_str(path: &Path) -> Option<String> {
    fs::canonicalize(path)
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
}

/// Escape a tag value the way udev names its `by-*` links
fn udev_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || b"#+-.:=@_".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

fn udev_decode(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') && i + 3 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// Fake `/dev` with one device and its udev links
    fn fake_dev() -> (TempDir, DevDiskCache, String) {
        let dir = TempDir::new().unwrap();
        let dev = dir.path().join("sda1");
        fs::write(&dev, "").unwrap();
        let disk = dir.path().join("disk");
        fs::create_dir_all(disk.join("by-label")).unwrap();
        fs::create_dir_all(disk.join("by-uuid")).unwrap();
        symlink(&dev, disk.join("by-label").join("my\\x20root")).unwrap();
        symlink(&dev, disk.join("by-uuid").join("1234-abcd")).unwrap();

        let device = fs::canonicalize(&dev).unwrap().to_str().unwrap().to_string();
        (dir, DevDiskCache::with_disk_dir(disk), device)
    }

    #[test]
    fn resolves_tags_through_links() {
        let (_dir, cache, device) = fake_dev();
        assert_eq!(cache.resolve_tag("UUID", "1234-abcd"), Some(device.clone()));
        assert_eq!(cache.resolve_tag("LABEL", "my root"), Some(device.clone()));
        assert_eq!(cache.resolve_tag("LABEL", "other"), None);
        assert_eq!(cache.resolve_tag("BOGUS", "x"), None);
        assert_eq!(cache.canonicalize_spec("UUID=1234-abcd"), Some(device));
    }

    #[test]
    fn reads_device_tags() {
        let (_dir, cache, device) = fake_dev();
        cache.read_tags_of(&device).unwrap();
        assert!(cache.device_has_tag(&device, "LABEL", "my root"));
        assert!(cache.device_has_tag(&device, "UUID", "1234-abcd"));
        assert!(!cache.device_has_tag(&device, "UUID", "ffff"));
    }

    #[test]
    fn canonicalizes_and_memoizes() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        symlink(&real, &link).unwrap();

        let cache = DevDiskCache::new();
        let expected = fs::canonicalize(&real).unwrap();
        assert_eq!(
            cache.canonicalize_path(link.to_str().unwrap()),
            Some(expected.to_str().unwrap().to_string())
        );
        assert_eq!(cache.canonicalize_path("/no/such/path"), Some("/no/such/path".into()));
        assert_eq!(cache.canonicalize_path(""), None);
    }

    #[test]
    fn udev_escaping() {
        assert_eq!(udev_encode("my root"), "my\\x20root");
        assert_eq!(udev_decode("my\\x20root"), "my root");
        assert_eq!(udev_decode("plain"), "plain");
    }
}
