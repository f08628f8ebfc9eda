//! Mount option maps
//!
//! An option map tells the option-string splitter whether a name is a generic
//! kernel (VFS) flag, a userspace-only option, or a placeholder that must be
//! dropped. Names the map does not know are filesystem-specific.

/// Option must not be written to mtab
pub const MASK_NOMTAB: u32 = 1 << 0;

/// Option must not be passed to /sbin/mount.<type> helpers
pub const MASK_NOHELPERS: u32 = 1 << 1;

/// Category of a known option name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Generic VFS flag understood by the kernel (`ro`, `nosuid`, ...)
    Vfs,
    /// Userspace-only option, never sent to the kernel (`noauto`, `user`, ...)
    Userspace,
    /// Known but meaningless name (e.g. `comment=`); dropped when splitting
    Undefined,
}

/// Classification of one option name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDef {
    pub kind: OptionKind,
    pub mask: u32,
}

/// Name to category classifier consumed by [`crate::optstr::OptString::split`]
pub trait OptionMap {
    /// Classify `name`, or `None` when the name is filesystem-specific
    fn lookup(&self, name: &str) -> Option<OptionDef>;
}

impl<F> OptionMap for F
where
    F: Fn(&str) -> Option<OptionDef>,
{
    fn lookup(&self, name: &str) -> Option<OptionDef> {
        self(name)
    }
}

const LINUX_MAP: &[(&str, u32)] = &[
    ("ro", 0),
    ("rw", 0),
    ("exec", 0),
    ("noexec", 0),
    ("suid", 0),
    ("nosuid", 0),
    ("dev", 0),
    ("nodev", 0),
    ("sync", 0),
    ("async", 0),
    ("dirsync", 0),
    ("mand", 0),
    ("nomand", 0),
    ("atime", 0),
    ("noatime", 0),
    ("iversion", 0),
    ("noiversion", 0),
    ("diratime", 0),
    ("nodiratime", 0),
    ("relatime", 0),
    ("norelatime", 0),
    ("strictatime", 0),
    ("nostrictatime", 0),
    ("loud", 0),
    ("silent", 0),
    ("remount", MASK_NOMTAB),
    ("bind", MASK_NOMTAB),
    ("rbind", MASK_NOMTAB),
    ("move", MASK_NOMTAB),
    ("private", MASK_NOMTAB),
    ("shared", MASK_NOMTAB),
    ("slave", MASK_NOMTAB),
    ("unbindable", MASK_NOMTAB),
];

const USERSPACE_MAP: &[(&str, u32)] = &[
    ("defaults", MASK_NOMTAB),
    ("auto", MASK_NOMTAB),
    ("noauto", MASK_NOMTAB),
    ("user", 0),
    ("nouser", MASK_NOMTAB),
    ("users", MASK_NOMTAB),
    ("owner", MASK_NOMTAB),
    ("noowner", MASK_NOMTAB),
    ("group", MASK_NOMTAB),
    ("nogroup", MASK_NOMTAB),
    ("_netdev", 0),
    ("nofail", MASK_NOMTAB),
    ("loop", MASK_NOHELPERS),
    ("offset", MASK_NOHELPERS),
    ("sizelimit", MASK_NOHELPERS),
    ("encryption", MASK_NOHELPERS),
    ("uhelper", 0),
    ("helper", MASK_NOMTAB),
];

/// Built-in Linux VFS and userspace option tables
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinOptionMap;

impl OptionMap for BuiltinOptionMap {
    fn lookup(&self, name: &str) -> Option<OptionDef> {
        if name == "comment" {
            return Some(OptionDef {
                kind: OptionKind::Undefined,
                mask: MASK_NOMTAB,
            });
        }
        let find = |map: &[(&str, u32)]| map.iter().find(|(n, _)| *n == name).map(|(_, m)| *m);

        if let Some(mask) = find(LINUX_MAP) {
            return Some(OptionDef {
                kind: OptionKind::Vfs,
                mask,
            });
        }
        find(USERSPACE_MAP).map(|mask| OptionDef {
            kind: OptionKind::Userspace,
            mask,
        })
    }
}
