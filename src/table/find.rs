//! High-level lookups
//!
//! Each lookup makes several passes over the table, from cheap raw string
//! compares to canonicalized paths and evaluated tags. Passes that need the
//! cache are skipped when the table has none. The first match in scan order
//! wins.

use super::{Direction, Table};
use crate::entry::Entry;
use crate::error::MountError;
use crate::utils::parse_tag;
use tracing::debug;

impl Table {
    /// Entry mounted on `path`
    pub fn find_target(&self, path: &str, direction: Direction) -> Option<&Entry> {
        debug!("lookup target: {}", path);

        if let Some(fs) = self.entries(direction).find(|fs| fs.equal_target(path)) {
            return Some(fs);
        }

        let cache = self.cache()?;
        let cn = cache.canonicalize_path(path)?;

        if let Some(fs) = self.entries(direction).find(|fs| fs.equal_target(&cn)) {
            return Some(fs);
        }

        // swap "mountpoints" are never canonicalized on write
        self.entries(direction).find(|fs| {
            let Some(target) = fs.target() else {
                return false;
            };
            fs.is_swap()
                && target != "/"
                && cache.canonicalize_path(target).as_deref() == Some(cn.as_str())
        })
    }

    /// Entry whose source is the device or directory `path`
    pub fn find_srcpath(&self, path: &str, direction: Direction) -> Option<&Entry> {
        debug!("lookup srcpath: {}", path);

        let mut ntags = 0;
        for fs in self.entries(direction) {
            if fs.equal_source_path(Some(path)) {
                return Some(fs);
            }
            if fs.srcpath().is_none() {
                ntags += 1;
            }
        }

        let cache = self.cache()?;
        let cn = cache.canonicalize_path(path)?;

        if ntags < self.len() {
            if let Some(fs) = self
                .entries(direction)
                .find(|fs| fs.equal_source_path(Some(&cn)))
            {
                return Some(fs);
            }
        }

        if ntags > 0 {
            let tagged = || self.entries(direction).filter_map(|fs| fs.tag().map(|t| (fs, t)));
            match cache.read_tags_of(&cn) {
                Ok(()) => {
                    if let Some((fs, _)) =
                        tagged().find(|(_, (tag, value))| cache.device_has_tag(&cn, tag, value))
                    {
                        return Some(fs);
                    }
                }
                Err(MountError::PermissionDenied(_)) => {
                    // device unreadable; evaluate every tag through udev links
                    if let Some((fs, _)) = tagged().find(|(_, (tag, value))| {
                        cache.resolve_tag(tag, value).as_deref() == Some(cn.as_str())
                    }) {
                        return Some(fs);
                    }
                }
                Err(e) => debug!("{}: cannot read tags: {}", cn, e),
            }
        }

        self.entries(direction).find(|fs| {
            if fs.is_net() || fs.is_pseudo() {
                return false;
            }
            fs.srcpath()
                .and_then(|src| cache.canonicalize_path(src))
                .is_some_and(|src| src == cn)
        })
    }

    /// Entry with source `tag=value`, directly or through the device the
    /// tag resolves to
    pub fn find_tag(&self, tag: &str, value: &str, direction: Direction) -> Option<&Entry> {
        debug!("lookup by tag: {} {}", tag, value);

        if let Some(fs) = self
            .entries(direction)
            .find(|fs| fs.tag() == Some((tag, value)))
        {
            return Some(fs);
        }

        let device = self.cache()?.resolve_tag(tag, value)?;
        self.find_srcpath(&device, direction)
    }

    /// Entry for `source`, which may be a path or a `NAME=value` tag
    pub fn find_source(&self, source: &str, direction: Direction) -> Option<&Entry> {
        debug!("lookup source: {}", source);

        if source.contains('=') {
            let (tag, value) = parse_tag(source)?;
            return self.find_tag(&tag, &value, direction);
        }
        self.find_srcpath(source, direction)
    }

    /// Entry matching both `source` and `target`.
    ///
    /// Every entry is fully evaluated, which makes this the most expensive
    /// lookup.
    pub fn find_pair(&self, source: &str, target: &str, direction: Direction) -> Option<&Entry> {
        debug!("lookup source: {} target: {}", source, target);

        let cache = self.cache();
        self.entries(direction)
            .find(|fs| fs.match_target(target, cache) && fs.match_source(source, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::error::MountResult;
    use crate::table::tests::entry;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeCache {
        paths: HashMap<&'static str, &'static str>,
        tags: HashMap<(String, String), &'static str>,
        deny_tag_reads: bool,
        tag_reads: Cell<usize>,
    }

    impl Cache for FakeCache {
        fn canonicalize_path(&self, path: &str) -> Option<String> {
            Some(self.paths.get(path).copied().unwrap_or(path).to_string())
        }

        fn read_tags_of(&self, device: &str) -> MountResult<()> {
            self.tag_reads.set(self.tag_reads.get() + 1);
            if self.deny_tag_reads {
                return Err(MountError::PermissionDenied(device.to_string()));
            }
            Ok(())
        }

        fn device_has_tag(&self, device: &str, tag: &str, value: &str) -> bool {
            self.tags.get(&key(tag, value)).copied() == Some(device)
        }

        fn resolve_tag(&self, tag: &str, value: &str) -> Option<String> {
            self.tags.get(&key(tag, value)).map(|d| d.to_string())
        }
    }

    fn key(tag: &str, value: &str) -> (String, String) {
        (tag.to_string(), value.to_string())
    }

    fn fstab() -> Table {
        vec![
            entry("UUID=d3a8", "/", "ext4"),
            entry("/dev/sda2", "/home/", "ext4"),
            entry("LABEL=data", "/mnt/data", "xfs"),
            entry("/dev/mapper/swap", "/dev/mapper/swap", "swap"),
            entry("proc", "/proc", "proc"),
            entry("server:/export", "/net", "nfs"),
            entry("/dev/sdc1", "/mnt/usb", "vfat"),
        ]
        .into_iter()
        .collect()
    }

    fn cache() -> FakeCache {
        let mut cache = FakeCache::default();
        cache.paths.insert("/srv/home", "/home");
        cache.paths.insert("/dev/disk/by-id/usb", "/dev/sdc1");
        cache.paths.insert("/dev/mapper/swap", "/dev/dm-0");
        cache.paths.insert("/dev/swaplink", "/dev/dm-0");
        cache.tags.insert(key("UUID", "d3a8"), "/dev/sda1");
        cache.tags.insert(key("LABEL", "data"), "/dev/sdb1");
        cache
    }

    fn with_cache(cache: FakeCache) -> (Table, Rc<FakeCache>) {
        let cache = Rc::new(cache);
        let mut tb = fstab();
        tb.set_cache(Some(cache.clone()));
        (tb, cache)
    }

    #[test]
    fn raw_lookups_without_cache() {
        let tb = fstab();
        let fwd = Direction::Forward;

        assert_eq!(tb.find_target("/home", fwd).and_then(Entry::srcpath), Some("/dev/sda2"));
        assert!(tb.find_target("/srv/home", fwd).is_none());
        assert_eq!(tb.find_srcpath("/dev/sdc1", fwd).and_then(Entry::target), Some("/mnt/usb"));
        assert!(tb.find_srcpath("/dev/sda1", fwd).is_none());
        assert_eq!(tb.find_tag("LABEL", "data", fwd).and_then(Entry::target), Some("/mnt/data"));
        assert!(tb.find_tag("LABEL", "other", fwd).is_none());
        assert_eq!(tb.find_source("UUID=d3a8", fwd).and_then(Entry::target), Some("/"));
        assert!(tb.find_source("UUID=", fwd).is_none());
        assert_eq!(tb.find_pair("/dev/sda2", "/home", fwd).map(|fs| fs.passno()), Some(0));
        assert!(tb.find_pair("/dev/sda2", "/mnt/usb", fwd).is_none());
    }

    #[test]
    fn target_through_cache() {
        let (tb, _) = with_cache(cache());
        let fs = tb.find_target("/srv/home", Direction::Forward).unwrap();
        assert_eq!(fs.srcpath(), Some("/dev/sda2"));

        let fs = tb.find_target("/dev/swaplink", Direction::Forward).unwrap();
        assert!(fs.is_swap());
    }

    #[test]
    fn srcpath_through_canonical_path() {
        let (tb, _) = with_cache(cache());
        let fs = tb.find_srcpath("/dev/disk/by-id/usb", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/mnt/usb"));
    }

    #[test]
    fn srcpath_through_tags() {
        let (tb, cache) = with_cache(cache());
        let fs = tb.find_srcpath("/dev/sdb1", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/mnt/data"));
        assert_eq!(cache.tag_reads.get(), 1);

        let fs = tb.find_srcpath("/dev/sda1", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/"));
    }

    #[test]
    fn srcpath_tag_fallback_on_permission_error() {
        let mut c = cache();
        c.deny_tag_reads = true;
        let (tb, _) = with_cache(c);
        let fs = tb.find_srcpath("/dev/sdb1", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/mnt/data"));
        assert!(tb.find_srcpath("/dev/sdz9", Direction::Forward).is_none());
    }

    #[test]
    fn srcpath_canonicalizes_entries_last() {
        let mut c = cache();
        c.paths.insert("/dev/sdc1", "/dev/usb0");
        c.paths.insert("/dev/usb-alias", "/dev/usb0");
        let (tb, _) = with_cache(c);
        let fs = tb.find_srcpath("/dev/usb-alias", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/mnt/usb"));
    }

    #[test]
    fn tag_through_device() {
        let mut c = cache();
        c.tags.insert(key("UUID", "abcd"), "/dev/sda2");
        let (tb, _) = with_cache(c);
        let fs = tb.find_source("UUID=abcd", Direction::Forward).unwrap();
        assert_eq!(fs.target(), Some("/home/"));
    }

    #[test]
    fn pair_uses_cache() {
        let (tb, _) = with_cache(cache());
        let fs = tb.find_pair("/dev/sdb1", "/mnt/data/", Direction::Forward).unwrap();
        assert_eq!(fs.tag(), Some(("LABEL", "data")));
        assert!(tb.find_pair("server:/export", "/net", Direction::Forward).is_some());
    }

    #[test]
    fn direction_picks_first_match() {
        let mut tb = Table::new();
        tb.add(entry("/dev/sda1", "/mnt", "ext4"));
        tb.add(entry("/dev/sdb1", "/mnt", "ext4"));
        assert_eq!(
            tb.find_target("/mnt", Direction::Forward).and_then(Entry::srcpath),
            Some("/dev/sda1")
        );
        assert_eq!(
            tb.find_target("/mnt", Direction::Backward).and_then(Entry::srcpath),
            Some("/dev/sdb1")
        );
    }
}
