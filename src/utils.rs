//! Small helpers shared by the entry, table and parser modules

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PATH_FSTAB: &str = "/etc/fstab";
pub const PATH_MTAB: &str = "/etc/mtab";
pub const PATH_PROC_MOUNTINFO: &str = "/proc/self/mountinfo";
pub const PATH_PROC_MOUNTS: &str = "/proc/mounts";

/// Environment override for the default fstab path
pub const ENV_FSTAB: &str = "MOUNTTAB_FSTAB";
/// Environment override for the default mtab path
pub const ENV_MTAB: &str = "MOUNTTAB_MTAB";

const PSEUDO_FILESYSTEMS: &[&str] = &[
    "none",
    "proc",
    "tmpfs",
    "sysfs",
    "devpts",
    "cgroups",
    "devfs",
    "dlmfs",
    "cpuset",
    "securityfs",
    "rpc_pipefs",
    "fusectl",
    "binfmt_misc",
    "fuse.gvfs-fuse-daemon",
    "debugfs",
    "spufs",
];

/// Filesystem without a backing device (proc, sysfs, ...)
pub fn is_pseudo_fs(fstype: &str) -> bool {
    PSEUDO_FILESYSTEMS.contains(&fstype)
}

/// Filesystem backed by a network resource
pub fn is_net_fs(fstype: &str) -> bool {
    matches!(fstype, "cifs" | "smbfs" | "afs" | "ncpfs")
        || fstype.starts_with("nfs")
        || fstype.starts_with("9p")
}

/// Compare two paths ignoring one trailing slash on either side
pub fn streq_except_trailing_slash(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b || strip_slash(a) == strip_slash(b),
        _ => false,
    }
}

fn strip_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Split a `NAME=value` tag specification; quotes around the value are removed
pub fn parse_tag(spec: &str) -> Option<(String, String)> {
    let (name, value) = spec.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    let value = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value);
    if value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Match a filesystem type against a pattern like `ext4,xfs` or `nonfs,cifs`.
///
/// A leading `no` negates the whole list; a `no` prefix on a later item
/// excludes just that type. A missing pattern matches only a missing type.
pub fn match_fstype(fstype: Option<&str>, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return fstype.is_none();
    };
    let fstype = fstype.unwrap_or("");
    let (negated, list) = match pattern.strip_prefix("no") {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    for item in list.split(',') {
        if item.strip_prefix("no") == Some(fstype) {
            return false;
        }
        if item == fstype {
            return !negated;
        }
    }
    negated
}

/// Check that every item of `pattern` is present in `optstr`, or absent for
/// items written as `noITEM`
pub fn match_options(optstr: Option<&str>, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return optstr.is_none();
    };
    let haystack = optstr.unwrap_or("");

    pattern.split(',').filter(|p| !p.is_empty()).all(|needle| {
        let (negated, needle) = match needle.strip_prefix("no") {
            Some(rest) => (true, rest),
            None => (false, needle),
        };
        let found = haystack.split(',').any(|item| item == needle);
        found != negated
    })
}

/// Default fstab path, honouring `MOUNTTAB_FSTAB`
pub fn fstab_path() -> PathBuf {
    std::env::var_os(ENV_FSTAB)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(PATH_FSTAB))
}

/// Default mtab path, honouring `MOUNTTAB_MTAB`
pub fn mtab_path() -> PathBuf {
    std::env::var_os(ENV_MTAB)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(PATH_MTAB))
}

/// State of an mtab file on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MtabStatus {
    /// The file is a regular file (not a symlink to /proc/mounts)
    pub regular: bool,
    /// The file can be opened for writing
    pub writable: bool,
}

/// Check whether `path` is a regular, userspace-maintained mtab.
///
/// With `probe_write` the file is opened for writing, which creates it when
/// it does not exist yet.
pub fn has_regular_mtab(path: &Path, probe_write: bool) -> MtabStatus {
    let mut status = MtabStatus::default();

    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_file() {
                status.regular = true;
                status.writable = probe_write && try_write(path);
            }
        }
        Err(_) if probe_write => {
            status.writable = try_write(path);
            status.regular = status.writable;
        }
        Err(_) => {}
    }

    if !status.regular {
        debug!("{}: irregular/non-writable mtab", path.display());
    }
    status
}

fn try_write(path: &Path) -> bool {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
        .is_ok()
}

/// Pack a major/minor pair the way glibc's `makedev` does
pub fn makedev(major: u32, minor: u32) -> u64 {
    let (ma, mi) = (u64::from(major), u64::from(minor));
    ((ma & 0xffff_f000) << 32) | ((ma & 0x0000_0fff) << 8) | ((mi & 0xffff_ff00) << 12) | (mi & 0x0000_00ff)
}

pub fn major(dev: u64) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32
}

pub fn minor(dev: u64) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn fs_classes() {
        assert!(is_pseudo_fs("proc"));
        assert!(is_pseudo_fs("tmpfs"));
        assert!(!is_pseudo_fs("ext4"));
        assert!(is_net_fs("nfs4"));
        assert!(is_net_fs("9p"));
        assert!(is_net_fs("cifs"));
        assert!(!is_net_fs("xfs"));
    }

    #[test]
    fn trailing_slash_is_ignored() {
        assert!(streq_except_trailing_slash(Some("/mnt/"), Some("/mnt")));
        assert!(streq_except_trailing_slash(Some("/mnt"), Some("/mnt/")));
        assert!(streq_except_trailing_slash(None, None));
        assert!(!streq_except_trailing_slash(None, Some("/mnt")));
        assert!(!streq_except_trailing_slash(Some("/mnt"), Some("/mn")));
        assert!(!streq_except_trailing_slash(Some("/mnt//"), Some("/mnt")));
    }

    #[test]
    fn tag_specs() {
        assert_eq!(
            parse_tag("LABEL=root"),
            Some(("LABEL".to_string(), "root".to_string()))
        );
        assert_eq!(
            parse_tag("UUID=\"1234-abcd\""),
            Some(("UUID".to_string(), "1234-abcd".to_string()))
        );
        assert_eq!(parse_tag("/dev/sda1"), None);
        assert_eq!(parse_tag("=x"), None);
        assert_eq!(parse_tag("LABEL="), None);
    }

    #[test]
    fn fstype_patterns() {
        assert!(match_fstype(Some("ext4"), Some("ext4")));
        assert!(match_fstype(Some("xfs"), Some("ext4,xfs")));
        assert!(!match_fstype(Some("btrfs"), Some("ext4,xfs")));
        assert!(!match_fstype(Some("nfs"), Some("nonfs,cifs")));
        assert!(!match_fstype(Some("cifs"), Some("nonfs,cifs")));
        assert!(match_fstype(Some("ext4"), Some("nonfs,cifs")));
        assert!(!match_fstype(Some("proc"), Some("ext4,noproc")));
        assert!(match_fstype(None, None));
        assert!(!match_fstype(Some("ext4"), None));
    }

    #[test]
    fn option_patterns() {
        let opts = Some("rw,noexec,uid=0");
        assert!(match_options(opts, Some("rw")));
        assert!(match_options(opts, Some("rw,uid=0")));
        assert!(match_options(opts, Some("nouser")));
        assert!(!match_options(opts, Some("ro")));
        assert!(!match_options(opts, Some("rw,nouid=0")));
        assert!(match_options(None, None));
        assert!(!match_options(opts, None));
    }

    #[test]
    fn devno_roundtrip() {
        let dev = makedev(259, 3);
        assert_eq!(major(dev), 259);
        assert_eq!(minor(dev), 3);
        assert_eq!(makedev(8, 1), 0x801);
    }

    #[test]
    #[serial]
    fn default_paths_follow_env() {
        std::env::set_var(ENV_FSTAB, "/tmp/custom-fstab");
        assert_eq!(fstab_path(), PathBuf::from("/tmp/custom-fstab"));
        std::env::remove_var(ENV_FSTAB);
        assert_eq!(fstab_path(), PathBuf::from(PATH_FSTAB));
    }

    #[test]
    fn regular_mtab_detection() {
        let dir = TempDir::new().unwrap();
        let regular = dir.path().join("mtab");
        fs::write(&regular, "").unwrap();
        let status = has_regular_mtab(&regular, true);
        assert!(status.regular);
        assert!(status.writable);

        let link = dir.path().join("mtab-link");
        std::os::unix::fs::symlink(&regular, &link).unwrap();
        assert!(!has_regular_mtab(&link, false).regular);

        let missing = dir.path().join("missing");
        assert!(!has_regular_mtab(&missing, false).regular);
        assert!(has_regular_mtab(&missing, true).regular);
        assert!(missing.exists());
    }
}
