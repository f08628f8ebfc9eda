//! One mount table record
//!
//! An [`Entry`] is a line of fstab, mtab or mountinfo. The source is kept as
//! written; when it is a `NAME=value` tag the parsed pair is stored too and
//! the path view ([`Entry::srcpath`]) is empty.

use crate::cache::Cache;
use crate::error::{MountError, MountResult};
use crate::optmap::{BuiltinOptionMap, OptionMap};
use crate::optstr::{self, OptString};
use crate::utils::{self, parse_tag, streq_except_trailing_slash};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use tracing::debug;

/// Flags derived from the filesystem type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsFlags {
    pub pseudo: bool,
    pub net: bool,
    pub swap: bool,
}

impl FsFlags {
    fn for_fstype(fstype: Option<&str>) -> Self {
        let mut flags = Self::default();
        match fstype {
            Some(t) if utils::is_pseudo_fs(t) => flags.pseudo = true,
            Some(t) if utils::is_net_fs(t) => flags.net = true,
            Some("swap") => flags.swap = true,
            _ => {}
        }
        flags
    }
}

/// fstab/mtab/mountinfo entry
#[derive(Default, Serialize)]
pub struct Entry {
    pub(crate) id: u32,
    pub(crate) parent_id: u32,
    pub(crate) devno: u64,

    pub(crate) source: Option<String>,
    #[serde(skip)]
    pub(crate) tag: Option<(String, String)>,
    pub(crate) bind_source: Option<String>,

    pub(crate) root: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) fstype: Option<String>,
    #[serde(skip)]
    pub(crate) flags: FsFlags,

    pub(crate) vfs_options: Option<OptString>,
    pub(crate) fs_options: Option<OptString>,
    pub(crate) user_options: Option<OptString>,
    pub(crate) attributes: Option<OptString>,

    pub(crate) freq: i32,
    pub(crate) passno: i32,

    #[serde(skip)]
    user_data: Option<Box<dyn Any>>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// mountinfo mount ID (0 for other formats)
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// mountinfo parent mount ID (0 for other formats)
    pub fn parent_id(&self) -> u32 {
        self.parent_id
    }

    pub fn set_parent_id(&mut self, id: u32) {
        self.parent_id = id;
    }

    /// mountinfo `st_dev` of the mounted filesystem
    pub fn devno(&self) -> u64 {
        self.devno
    }

    pub fn set_devno(&mut self, devno: u64) {
        self.devno = devno;
    }

    /// Source as written: a path, a `NAME=value` tag, or `None`
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Set the source; `"none"` clears it and `NAME=value` is parsed as a tag
    pub fn set_source(&mut self, source: Option<&str>) -> MountResult<()> {
        let source = source.filter(|s| *s != "none");
        let tag = match source {
            Some(s) if s.contains('=') => {
                Some(parse_tag(s).ok_or_else(|| MountError::TagSpec(s.to_string()))?)
            }
            _ => None,
        };
        self.source = source.map(str::to_string);
        self.tag = tag;
        Ok(())
    }

    /// Source path (device, file or bind directory); `None` when the source
    /// is a tag
    pub fn srcpath(&self) -> Option<&str> {
        if self.tag.is_some() {
            return None;
        }
        self.source.as_deref()
    }

    /// `(NAME, value)` when the source is a tag such as `LABEL=root`
    pub fn tag(&self) -> Option<(&str, &str)> {
        self.tag.as_ref().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Literal path given to a bind mount
    pub fn bind_source(&self) -> Option<&str> {
        self.bind_source.as_deref()
    }

    pub fn set_bind_source(&mut self, src: Option<&str>) {
        self.bind_source = src.map(str::to_string);
    }

    /// Root of the mount within the filesystem (mountinfo only)
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn set_root(&mut self, root: Option<&str>) {
        self.root = root.map(str::to_string);
    }

    /// Mountpoint
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: Option<&str>) {
        self.target = target.map(str::to_string);
    }

    pub fn fstype(&self) -> Option<&str> {
        self.fstype.as_deref()
    }

    /// Set the filesystem type and recompute the pseudo/net/swap flags
    pub fn set_fstype(&mut self, fstype: Option<&str>) {
        self.fstype = fstype.map(str::to_string);
        self.flags = FsFlags::for_fstype(fstype);
    }

    pub fn flags(&self) -> FsFlags {
        self.flags
    }

    pub fn is_pseudo(&self) -> bool {
        self.flags.pseudo
    }

    pub fn is_net(&self) -> bool {
        self.flags.net
    }

    pub fn is_swap(&self) -> bool {
        self.flags.swap
    }

    /// Filesystem-independent (VFS) options
    pub fn vfs_options(&self) -> Option<&str> {
        self.vfs_options.as_ref().map(OptString::as_str)
    }

    pub fn set_vfs_options(&mut self, optstr: Option<&str>) {
        self.vfs_options = optstr.map(OptString::from);
    }

    /// Filesystem-specific (superblock) options
    pub fn fs_options(&self) -> Option<&str> {
        self.fs_options.as_ref().map(OptString::as_str)
    }

    pub fn set_fs_options(&mut self, optstr: Option<&str>) {
        self.fs_options = optstr.map(OptString::from);
    }

    /// Userspace mount options, never passed to the kernel
    pub fn user_options(&self) -> Option<&str> {
        self.user_options.as_ref().map(OptString::as_str)
    }

    pub fn set_user_options(&mut self, optstr: Option<&str>) {
        self.user_options = optstr.map(OptString::from);
    }

    /// Userspace bookkeeping attributes; not mount options
    pub fn attributes(&self) -> Option<&str> {
        self.attributes.as_ref().map(OptString::as_str)
    }

    pub fn set_attributes(&mut self, optstr: Option<&str>) {
        self.attributes = optstr.map(OptString::from);
    }

    pub fn append_attributes(&mut self, optstr: &str) -> MountResult<()> {
        let mut attrs = self.attributes.clone().unwrap_or_default();
        attrs.append_str(optstr)?;
        self.attributes = Some(attrs);
        Ok(())
    }

    pub fn prepend_attributes(&mut self, optstr: &str) -> MountResult<()> {
        let mut attrs = self.attributes.clone().unwrap_or_default();
        attrs.prepend(optstr, None)?;
        self.attributes = Some(attrs);
        Ok(())
    }

    /// Split `optstr` with the built-in option map and replace all three
    /// option strings
    pub fn set_options(&mut self, optstr: Option<&str>) -> MountResult<()> {
        self.set_options_with(optstr, &BuiltinOptionMap)
    }

    pub fn set_options_with(&mut self, optstr: Option<&str>, map: &dyn OptionMap) -> MountResult<()> {
        let split = match optstr {
            Some(s) => OptString::from(s).split(map, 0, 0)?,
            None => Default::default(),
        };
        self.vfs_options = split.vfs;
        self.fs_options = split.fs;
        self.user_options = split.user;
        Ok(())
    }

    /// Split `optstr` and append each part to the matching option string
    pub fn append_options(&mut self, optstr: &str) -> MountResult<()> {
        let split = OptString::from(optstr).split(&BuiltinOptionMap, 0, 0)?;
        for (part, dest) in [
            (split.vfs, &mut self.vfs_options),
            (split.fs, &mut self.fs_options),
            (split.user, &mut self.user_options),
        ] {
            if let Some(part) = part {
                dest.get_or_insert_with(OptString::new)
                    .append_str(part.as_str())?;
            }
        }
        Ok(())
    }

    /// Split `optstr` and prepend each part to the matching option string
    pub fn prepend_options(&mut self, optstr: &str) -> MountResult<()> {
        let split = OptString::from(optstr).split(&BuiltinOptionMap, 0, 0)?;
        for (part, dest) in [
            (split.vfs, &mut self.vfs_options),
            (split.fs, &mut self.fs_options),
            (split.user, &mut self.user_options),
        ] {
            if let Some(part) = part {
                dest.get_or_insert_with(OptString::new)
                    .prepend(part.as_str(), None)?;
            }
        }
        Ok(())
    }

    /// Look an option up in the fs, then VFS, then userspace options
    pub fn get_option(&self, name: &str) -> MountResult<Option<Option<&str>>> {
        for optstr in [&self.fs_options, &self.vfs_options, &self.user_options]
            .into_iter()
            .flatten()
        {
            if let Some(found) = optstr.get(name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub fn get_attribute(&self, name: &str) -> MountResult<Option<Option<&str>>> {
        match &self.attributes {
            Some(attrs) => attrs.get(name),
            None => Ok(None),
        }
    }

    /// All options in one string: merged VFS and fs options, userspace
    /// options last. The entry is not modified.
    pub fn strdup_options(&self) -> MountResult<Option<OptString>> {
        let mut merged = optstr::merge(self.vfs_options(), self.fs_options())?;
        if let Some(user) = self.user_options() {
            merged
                .get_or_insert_with(OptString::new)
                .append_str(user)?;
        }
        Ok(merged)
    }

    /// Dump frequency (fstab field 5)
    pub fn freq(&self) -> i32 {
        self.freq
    }

    pub fn set_freq(&mut self, freq: i32) {
        self.freq = freq;
    }

    /// fsck pass number (fstab field 6)
    pub fn passno(&self) -> i32 {
        self.passno
    }

    pub fn set_passno(&mut self, passno: i32) {
        self.passno = passno;
    }

    /// Attach caller data to the entry; it is dropped with the entry
    pub fn set_user_data<T: Any>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }

    /// Compare the mountpoint with `path`, ignoring a trailing slash
    pub fn equal_target(&self, path: &str) -> bool {
        streq_except_trailing_slash(self.target(), Some(path))
    }

    /// Compare the source path with `path`.
    ///
    /// A trailing slash is ignored except for pseudo filesystems, where the
    /// strings must be identical (two missing sources are equal).
    pub fn equal_source_path(&self, path: Option<&str>) -> bool {
        let own = self.srcpath();
        if !self.flags.pseudo {
            return streq_except_trailing_slash(own, path);
        }
        match (own, path) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Does the mountpoint match `target`?
    ///
    /// Tries the raw strings, then canonical `target` against the raw
    /// mountpoint, then both canonicalized. Without a cache only the first
    /// attempt is made.
    pub fn match_target(&self, target: &str, cache: Option<&dyn Cache>) -> bool {
        let Some(own) = self.target() else {
            return false;
        };
        if self.equal_target(target) {
            return true;
        }
        let Some(cache) = cache else {
            return false;
        };
        let Some(cn) = cache.canonicalize_path(target) else {
            return false;
        };
        if cn == own {
            return true;
        }
        cache.canonicalize_path(own).is_some_and(|t| t == cn)
    }

    /// Does the source match `source` (a path or a `NAME=value` tag)?
    ///
    /// Up to four attempts: raw strings; canonical `source` against the raw
    /// source path; both canonicalized; and, for tagged entries, whether the
    /// canonical device carries the entry's tag. Network and pseudo
    /// filesystems stop after the raw comparison, as does a missing cache.
    pub fn match_source(&self, source: &str, cache: Option<&dyn Cache>) -> bool {
        let Some(raw) = self.source() else {
            return false;
        };
        if self.equal_source_path(Some(source)) || (self.tag.is_some() && raw == source) {
            return true;
        }

        let Some(cache) = cache else {
            return false;
        };
        if self.flags.net || self.flags.pseudo {
            return false;
        }
        let Some(cn) = cache.canonicalize_spec(source) else {
            return false;
        };

        if let Some(src) = self.srcpath() {
            if self.equal_source_path(Some(&cn)) {
                return true;
            }
            return cache.canonicalize_path(src).is_some_and(|s| s == cn);
        }

        let Some((tag, value)) = self.tag() else {
            return false;
        };
        match cache.read_tags_of(&cn) {
            Ok(()) => cache.device_has_tag(&cn, tag, value),
            Err(MountError::PermissionDenied(_)) => {
                // tags of the device are unreadable, but the udev links that
                // map our tag to a device name usually are not
                cache.resolve_tag(tag, value).is_some_and(|dev| dev == cn)
            }
            Err(e) => {
                debug!("{}: cannot read tags: {}", cn, e);
                false
            }
        }
    }

    /// Match the filesystem type against a pattern such as `nonfs,cifs`
    pub fn match_fstype(&self, pattern: &str) -> bool {
        utils::match_fstype(self.fstype(), Some(pattern))
    }

    /// Match all options against a pattern such as `rw,nouser`
    pub fn match_options(&self, pattern: &str) -> bool {
        match self.strdup_options() {
            Ok(Some(opts)) => utils::match_options(Some(opts.as_str()), Some(pattern)),
            Ok(None) => utils::match_options(None, Some(pattern)),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("fstype", &self.fstype)
            .field("vfs_options", &self.vfs_options())
            .field("fs_options", &self.fs_options())
            .field("user_options", &self.user_options())
            .finish_non_exhaustive()
    }
}

/// Multi-line dump used in debug output
impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<&str>| v.unwrap_or("(none)").to_string();
        writeln!(f, "source: {}", show(self.source()))?;
        writeln!(f, "target: {}", show(self.target()))?;
        writeln!(f, "fstype: {}", show(self.fstype()))?;

        let optional = [
            ("VFS-optstr", self.vfs_options()),
            ("FS-optstr", self.fs_options()),
            ("user-optstr", self.user_options()),
            ("attributes", self.attributes()),
            ("root", self.root()),
            ("bindsrc", self.bind_source()),
        ];
        for (label, value) in optional {
            if let Some(v) = value {
                writeln!(f, "{}: {}", label, v)?;
            }
        }
        if self.freq != 0 {
            writeln!(f, "freq: {}", self.freq)?;
        }
        if self.passno != 0 {
            writeln!(f, "pass: {}", self.passno)?;
        }
        if self.id != 0 {
            writeln!(f, "id: {}", self.id)?;
        }
        if self.parent_id != 0 {
            writeln!(f, "parent: {}", self.parent_id)?;
        }
        if self.devno != 0 {
            writeln!(f, "devno: {}:{}", utils::major(self.devno), utils::minor(self.devno))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Cache with fixed answers
    #[derive(Default)]
    pub(crate) struct StaticCache {
        pub paths: HashMap<String, String>,
        pub tags: HashMap<(String, String), String>,
        pub deny_tag_reads: bool,
    }

    impl Cache for StaticCache {
        fn canonicalize_path(&self, path: &str) -> Option<String> {
            Some(self.paths.get(path).cloned().unwrap_or_else(|| path.to_string()))
        }

        fn read_tags_of(&self, device: &str) -> MountResult<()> {
            if self.deny_tag_reads {
                return Err(MountError::PermissionDenied(device.to_string()));
            }
            Ok(())
        }

        fn device_has_tag(&self, device: &str, tag: &str, value: &str) -> bool {
            self.tags.get(&(tag.to_string(), value.to_string())).map(String::as_str) == Some(device)
        }

        fn resolve_tag(&self, tag: &str, value: &str) -> Option<String> {
            self.tags.get(&(tag.to_string(), value.to_string())).cloned()
        }
    }

    fn entry(source: &str, target: &str, fstype: &str) -> Entry {
        let mut e = Entry::new();
        e.set_source(Some(source)).unwrap();
        e.set_target(Some(target));
        e.set_fstype(Some(fstype));
        e
    }

    #[test]
    fn tag_hides_srcpath() {
        let e = entry("LABEL=root", "/", "ext4");
        assert_eq!(e.source(), Some("LABEL=root"));
        assert_eq!(e.srcpath(), None);
        assert_eq!(e.tag(), Some(("LABEL", "root")));

        let e = entry("/dev/sda1", "/", "ext4");
        assert_eq!(e.srcpath(), Some("/dev/sda1"));
        assert_eq!(e.tag(), None);
    }

    #[test]
    fn none_source_is_empty() {
        let e = entry("none", "/proc", "proc");
        assert_eq!(e.source(), None);
        assert!(Entry::new().set_source(Some("=oops")).is_err());
    }

    #[test]
    fn fstype_sets_flags() {
        let mut e = Entry::new();
        e.set_fstype(Some("proc"));
        assert!(e.is_pseudo());
        e.set_fstype(Some("nfs4"));
        assert!(e.is_net() && !e.is_pseudo());
        e.set_fstype(Some("swap"));
        assert!(e.is_swap() && !e.is_net());
        e.set_fstype(None);
        assert_eq!(e.flags(), FsFlags::default());
    }

    #[test]
    fn target_ignores_trailing_slash() {
        let e = entry("/dev/sda1", "/mnt/", "ext4");
        assert!(e.equal_target("/mnt"));
        assert!(!e.equal_target("/mn"));
    }

    #[test]
    fn pseudo_source_compare_is_exact() {
        let mut e = Entry::new();
        e.set_fstype(Some("proc"));
        assert!(e.equal_source_path(None));
        assert!(!e.equal_source_path(Some("/mnt")));

        e.set_source(Some("/srv/")).unwrap();
        assert!(!e.equal_source_path(Some("/srv")));
        e.set_fstype(Some("ext4"));
        assert!(e.equal_source_path(Some("/srv")));
    }

    #[test]
    fn match_target_tiers() {
        let e = entry("/dev/sda1", "/mnt/data", "ext4");
        assert!(e.match_target("/mnt/data/", None));
        assert!(!e.match_target("/data", None));

        let mut cache = StaticCache::default();
        cache.paths.insert("/data".into(), "/mnt/data".into());
        assert!(e.match_target("/data", Some(&cache)));

        let e = entry("/dev/sda1", "/srv/link", "ext4");
        cache.paths.insert("/srv/link".into(), "/mnt/data".into());
        assert!(e.match_target("/data", Some(&cache)));
    }

    #[test]
    fn match_source_tiers() {
        let mut cache = StaticCache::default();
        cache.paths.insert("/dev/root".into(), "/dev/sda1".into());
        cache.paths.insert("/dev/disk/by-id/x".into(), "/dev/sda1".into());

        let e = entry("/dev/sda1", "/", "ext4");
        assert!(e.match_source("/dev/sda1", None));
        assert!(!e.match_source("/dev/root", None));
        assert!(e.match_source("/dev/root", Some(&cache)));

        let e = entry("/dev/disk/by-id/x", "/", "ext4");
        assert!(e.match_source("/dev/root", Some(&cache)));
    }

    #[test]
    fn match_source_by_tag() {
        let mut cache = StaticCache::default();
        cache
            .tags
            .insert(("UUID".into(), "1234".into()), "/dev/sdb1".into());

        let e = entry("UUID=1234", "/home", "xfs");
        assert!(e.match_source("UUID=1234", None));
        assert!(e.match_source("/dev/sdb1", Some(&cache)));
        assert!(!e.match_source("/dev/sdc1", Some(&cache)));

        cache.deny_tag_reads = true;
        assert!(e.match_source("/dev/sdb1", Some(&cache)));
        assert!(!e.match_source("/dev/sdc1", Some(&cache)));
    }

    #[test]
    fn net_and_pseudo_skip_canonical_tiers() {
        let mut cache = StaticCache::default();
        cache.paths.insert("alias:/export".into(), "server:/export".into());
        let e = entry("server:/export", "/net", "nfs");
        assert!(!e.match_source("alias:/export", Some(&cache)));
    }

    #[test]
    fn options_roundtrip_through_split() {
        let mut e = Entry::new();
        e.set_options(Some("noauto,rw,journal=update,user,nosuid"))
            .unwrap();
        assert_eq!(e.vfs_options(), Some("rw,nosuid"));
        assert_eq!(e.fs_options(), Some("journal=update"));
        assert_eq!(e.user_options(), Some("noauto,user"));
        assert_eq!(
            e.strdup_options().unwrap().unwrap().as_str(),
            "rw,nosuid,journal=update,noauto,user"
        );
    }

    #[test]
    fn append_and_prepend_options() {
        let mut e = Entry::new();
        e.set_options(Some("rw,data=ordered")).unwrap();
        e.append_options("noexec,noauto").unwrap();
        e.prepend_options("commit=5").unwrap();
        assert_eq!(e.vfs_options(), Some("rw,noexec"));
        assert_eq!(e.fs_options(), Some("commit=5,data=ordered"));
        assert_eq!(e.user_options(), Some("noauto"));
    }

    #[test]
    fn option_lookup_order() {
        let mut e = Entry::new();
        e.set_vfs_options(Some("rw,size=1"));
        e.set_fs_options(Some("size=2"));
        assert_eq!(e.get_option("size").unwrap(), Some(Some("2")));
        assert_eq!(e.get_option("rw").unwrap(), Some(None));
        assert_eq!(e.get_option("missing").unwrap(), None);

        e.append_attributes("helper=x").unwrap();
        e.prepend_attributes("first").unwrap();
        assert_eq!(e.attributes(), Some("first,helper=x"));
        assert_eq!(e.get_attribute("helper").unwrap(), Some(Some("x")));

        assert!(matches!(e.append_attributes("a,,b"), Err(MountError::OptionParse(_))));
        assert!(matches!(e.prepend_attributes(",a"), Err(MountError::OptionParse(_))));
        assert_eq!(e.attributes(), Some("first,helper=x"));

        let mut bare = Entry::new();
        assert!(bare.append_attributes("a,,b").is_err());
        assert_eq!(bare.attributes(), None);
    }

    #[test]
    fn fstype_and_option_patterns() {
        let mut e = entry("/dev/sda1", "/", "ext4");
        e.set_options(Some("rw,noexec")).unwrap();
        assert!(e.match_fstype("ext4,xfs"));
        assert!(!e.match_fstype("noext4"));
        assert!(e.match_options("rw,noexec"));
        assert!(e.match_options("nouser"));
        assert!(!e.match_options("ro"));
    }

    #[test]
    fn user_data_is_typed() {
        let mut e = Entry::new();
        e.set_user_data(42u32);
        assert_eq!(e.user_data::<u32>(), Some(&42));
        assert_eq!(e.user_data::<String>(), None);
        assert!(e.take_user_data().is_some());
        assert!(e.user_data::<u32>().is_none());
    }

    #[test]
    fn display_dump() {
        let mut e = entry("/dev/sda1", "/", "ext4");
        e.set_devno(crate::utils::makedev(8, 1));
        let dump = e.to_string();
        assert!(dump.contains("source: /dev/sda1"));
        assert!(dump.contains("devno: 8:1"));
    }
}
