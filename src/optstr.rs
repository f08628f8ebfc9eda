//! Mount option strings
//!
//! Low-level editing of comma separated `name[=value]` lists such as
//! `rw,noexec,context="a,b"`. Commas inside double quotes are part of the
//! value. Every mutation keeps the string well formed: it never starts or
//! ends with a comma and never contains an empty item.

use crate::error::{MountError, MountResult};
use crate::optmap::{OptionKind, OptionMap};
use std::fmt;
use std::ops::Range;
use tracing::debug;

/// One `name[=value]` item borrowed from an option string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionItem<'a> {
    pub name: &'a str,
    /// `None` for a bare name, `Some("")` for `name=`
    pub value: Option<&'a str>,
}

/// Byte location of an item inside its option string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionLocation {
    /// Offset of the first byte of the name
    pub begin: usize,
    /// Offset of the terminating `,` or the end of the string
    pub end: usize,
    pub name_len: usize,
    pub value: Option<Range<usize>>,
}

/// Parse the item starting at `*pos` and advance `*pos` past it.
///
/// Returns `Ok(None)` at the end of the string. An empty item (`a,,b`, a
/// leading comma) or a quote left open at the end is a parse error.
pub fn next_option<'a>(optstr: &'a str, pos: &mut usize) -> MountResult<Option<OptionItem<'a>>> {
    match scan_item(optstr, *pos)? {
        None => Ok(None),
        Some((loc, next)) => {
            *pos = next;
            Ok(Some(OptionItem {
                name: &optstr[loc.begin..loc.begin + loc.name_len],
                value: loc.value.map(|r| &optstr[r]),
            }))
        }
    }
}

/// Returns the item location and the offset of the following item
fn scan_item(optstr: &str, from: usize) -> MountResult<Option<(OptionLocation, usize)>> {
    let bytes = optstr.as_bytes();
    if from >= bytes.len() {
        return Ok(None);
    }

    let mut open_quote = false;
    let mut sep = None;

    for (i, &b) in bytes.iter().enumerate().skip(from) {
        if b == b'"' {
            open_quote = !open_quote;
        }
        if open_quote {
            continue;
        }
        if sep.is_none() && b == b'=' {
            sep = Some(i);
        }
        let stop = if b == b',' {
            i
        } else if i + 1 == bytes.len() {
            i + 1
        } else {
            continue;
        };
        if stop <= from {
            debug!("option string parse error: {:?}", optstr);
            return Err(MountError::OptionParse(optstr.to_string()));
        }

        let loc = OptionLocation {
            begin: from,
            end: stop,
            name_len: sep.unwrap_or(stop) - from,
            value: sep.map(|s| s + 1..stop),
        };
        let next = if stop < bytes.len() { stop + 1 } else { stop };
        return Ok(Some((loc, next)));
    }

    // only reachable with a quote still open
    debug!("option string parse error (open quote): {:?}", optstr);
    Err(MountError::OptionParse(optstr.to_string()))
}

/// Owned, editable option string
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OptString {
    buf: String,
}

/// Result of [`OptString::split`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOptions {
    pub user: Option<OptString>,
    pub vfs: Option<OptString>,
    pub fs: Option<OptString>,
}

impl OptString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterate over items; iteration stops after the first parse error
    pub fn iter(&self) -> OptIter<'_> {
        OptIter {
            optstr: &self.buf,
            pos: 0,
            failed: false,
        }
    }

    /// Find the first item named exactly `name`
    pub fn locate(&self, name: &str) -> MountResult<Option<OptionLocation>> {
        let mut pos = 0;
        while let Some((loc, next)) = scan_item(&self.buf, pos)? {
            if &self.buf[loc.begin..loc.begin + loc.name_len] == name {
                return Ok(Some(loc));
            }
            pos = next;
        }
        Ok(None)
    }

    /// Look up `name`; the outer `Option` is presence, the inner one the value
    pub fn get(&self, name: &str) -> MountResult<Option<Option<&str>>> {
        Ok(self
            .locate(name)?
            .map(|loc| loc.value.map(|r| &self.buf[r])))
    }

    /// Whether an item named `name` exists
    pub fn contains(&self, name: &str) -> MountResult<bool> {
        Ok(self.locate(name)?.is_some())
    }

    /// Append `name` or `name=value`. An empty value is treated as none.
    ///
    /// Fails with [`MountError::OptionParse`] when the new text holds an
    /// empty item or an open quote; the string is left unchanged then.
    pub fn append(&mut self, name: &str, value: Option<&str>) -> MountResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        let value = value.filter(|v| !v.is_empty());
        match value {
            Some(v) => validate(&format!("{name}={v}"))?,
            None => validate(name)?,
        }
        let well_formed = is_well_formed(&self.buf);

        let trimmed = self.buf.trim_end_matches(',').len();
        self.buf.truncate(trimmed);
        self.buf
            .reserve(name.len() + value.map_or(0, |v| v.len() + 1) + 1);
        if !self.buf.is_empty() {
            self.buf.push(',');
        }
        self.buf.push_str(name);
        if let Some(v) = value {
            self.buf.push('=');
            self.buf.push_str(v);
        }
        self.check(well_formed);
        Ok(())
    }

    /// Append every item of another option string
    pub fn append_str(&mut self, other: &str) -> MountResult<()> {
        self.append(other, None)
    }

    /// Insert `name[=value]` in front of the existing items
    pub fn prepend(&mut self, name: &str, value: Option<&str>) -> MountResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        let mut front = Self::new();
        front.append(name, value)?;
        if !self.buf.is_empty() {
            front.append_str(&self.buf)?;
        }
        *self = front;
        Ok(())
    }

    /// Set, add or change the value of `name`.
    ///
    /// A missing item is appended. A value of `None` strips `=value` and
    /// keeps the bare name.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> MountResult<()> {
        if let Some(v) = value {
            validate(&format!("{name}={v}"))?;
        }
        let Some(loc) = self.locate(name)? else {
            return self.append(name, value);
        };
        let well_formed = is_well_formed(&self.buf);
        let name_end = loc.begin + loc.name_len;

        match (value, loc.value) {
            (None, Some(_)) => self.remove_at(name_end, loc.end),
            (Some(new), None) => self.insert_value(name_end, new),
            (Some(new), Some(old)) if new.len() == old.len() => {
                self.buf.replace_range(old, new);
            }
            (Some(new), Some(_)) => {
                self.remove_at(name_end, loc.end);
                self.insert_value(name_end, new);
            }
            (None, None) => {}
        }
        self.check(well_formed);
        Ok(())
    }

    /// Remove the first item named `name`; returns whether one was removed
    pub fn remove(&mut self, name: &str) -> MountResult<bool> {
        let Some(loc) = self.locate(name)? else {
            return Ok(false);
        };
        let well_formed = is_well_formed(&self.buf);
        self.remove_at(loc.begin, loc.end);
        self.check(well_formed);
        Ok(true)
    }

    /// Splice out `begin..end` plus the one comma needed to stay well formed
    fn remove_at(&mut self, begin: usize, mut end: usize) {
        let bytes = self.buf.as_bytes();
        if (begin == 0 || bytes[begin - 1] == b',') && bytes.get(end) == Some(&b',') {
            end += 1;
        }
        self.buf.replace_range(begin..end, "");
        if begin > 0 && begin == self.buf.len() && self.buf.as_bytes()[begin - 1] == b',' {
            self.buf.truncate(begin - 1);
        }
    }

    /// Insert `=value` (or `value` right after an existing `=`) at `pos`
    fn insert_value(&mut self, pos: usize, value: &str) {
        let after_eq = pos > 0 && self.buf.as_bytes()[pos - 1] == b'=';
        if after_eq {
            self.buf.insert_str(pos, value);
        } else {
            self.buf.insert_str(pos, &format!("={value}"));
        }
    }

    fn check(&self, was_well_formed: bool) {
        debug_assert!(
            !was_well_formed || is_well_formed(&self.buf),
            "option string lost well-formedness: {:?}",
            self.buf
        );
    }

    /// Partition items into userspace, VFS and filesystem-specific subsets.
    ///
    /// Names unknown to `map` are filesystem-specific. Names the map marks as
    /// [`OptionKind::Undefined`] are dropped, as are VFS/userspace names whose
    /// mask intersects `ignore_vfs`/`ignore_user`.
    pub fn split(
        &self,
        map: &dyn OptionMap,
        ignore_user: u32,
        ignore_vfs: u32,
    ) -> MountResult<SplitOptions> {
        let mut out = SplitOptions::default();

        for item in self.iter() {
            let item = item?;
            let target = match map.lookup(item.name) {
                Some(def) => match def.kind {
                    OptionKind::Undefined => continue,
                    OptionKind::Vfs if def.mask & ignore_vfs != 0 => continue,
                    OptionKind::Userspace if def.mask & ignore_user != 0 => continue,
                    OptionKind::Vfs => &mut out.vfs,
                    OptionKind::Userspace => &mut out.user,
                },
                None => &mut out.fs,
            };
            target
                .get_or_insert_with(OptString::new)
                .append(item.name, item.value)?;
        }
        Ok(out)
    }

    /// Items that `map` defines, minus those whose mask intersects `ignore`
    pub fn extract(&self, map: &dyn OptionMap, ignore: u32) -> MountResult<Option<OptString>> {
        let mut subset: Option<OptString> = None;
        for item in self.iter() {
            let item = item?;
            match map.lookup(item.name) {
                Some(def) if def.kind != OptionKind::Undefined && def.mask & ignore == 0 => {
                    subset
                        .get_or_insert_with(OptString::new)
                        .append(item.name, item.value)?;
                }
                _ => {}
            }
        }
        Ok(subset)
    }
}

/// Merge VFS and filesystem option strings into one.
///
/// `ro` wins: the result starts with `ro` if either side is read-only and
/// with `rw` only if both sides said `rw` (or neither said anything).
///
/// ```
/// use mounttab::optstr::merge;
///
/// let merged = merge(Some("rw,noexec"), Some("ro,journal=update")).unwrap();
/// assert_eq!(merged.unwrap().as_str(), "ro,noexec,journal=update");
/// ```
pub fn merge(vfs: Option<&str>, fs: Option<&str>) -> MountResult<Option<OptString>> {
    let (vfs, fs) = match (vfs, fs) {
        (None, None) => return Ok(None),
        (Some(one), None) | (None, Some(one)) => return Ok(Some(OptString::from(one))),
        (Some(vfs), Some(fs)) if vfs == fs => return Ok(Some(OptString::from(vfs))),
        (Some(vfs), Some(fs)) => (vfs, fs),
    };

    let mut body = OptString::from(vfs);
    body.append_str(fs)?;

    let mut rw = 0;
    for _ in 0..2 {
        if body.remove("rw")? {
            rw += 1;
        }
    }
    let mut ro = 0;
    if rw != 2 {
        if body.remove("ro")? {
            ro += 1;
        }
        if ro + rw < 2 && body.remove("ro")? {
            ro += 1;
        }
    }

    let mut merged = OptString::from(if ro > 0 { "ro" } else { "rw" });
    merged.append_str(body.as_str())?;
    Ok(Some(merged))
}

/// Reject text that would leave an empty item or an open quote behind
fn validate(s: &str) -> MountResult<()> {
    if !is_well_formed(s) {
        debug!("malformed option text: {:?}", s);
        return Err(MountError::OptionParse(s.to_string()));
    }
    let mut pos = 0;
    while next_option(s, &mut pos)?.is_some() {}
    Ok(())
}

/// True when `s` has no leading, trailing or doubled (unquoted) comma
pub fn is_well_formed(s: &str) -> bool {
    if s.starts_with(',') || s.ends_with(',') {
        return false;
    }
    let mut open_quote = false;
    let mut prev_comma = false;
    for b in s.bytes() {
        if b == b'"' {
            open_quote = !open_quote;
        }
        let comma = b == b',' && !open_quote;
        if comma && prev_comma {
            return false;
        }
        prev_comma = comma;
    }
    true
}

/// Iterator over the items of an option string
pub struct OptIter<'a> {
    optstr: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for OptIter<'a> {
    type Item = MountResult<OptionItem<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match next_option(self.optstr, &mut self.pos) {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl From<&str> for OptString {
    fn from(s: &str) -> Self {
        Self { buf: s.to_string() }
    }
}

impl From<String> for OptString {
    fn from(buf: String) -> Self {
        Self { buf }
    }
}

impl AsRef<str> for OptString {
    fn as_ref(&self) -> &str {
        &self.buf
    }
}

impl fmt::Display for OptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

impl serde::Serialize for OptString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.buf)
    }
}
