//! fstab and mountinfo line parsers

use super::{Table, TableFormat};
use crate::entry::Entry;
use crate::error::{MountError, MountResult};
use crate::utils::{self, makedev};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What the parser does with a malformed line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAction {
    /// Stop parsing and return the error
    Abort,
    /// Log a warning, drop the line and continue
    Warn,
    /// Drop the line and continue
    Skip,
}

/// Per-line error policy for [`Table::parse_stream`]
pub trait ParseErrorHandler {
    fn on_parse_error(&mut self, table: &Table, source_name: &str, line: usize) -> ParseAction;
}

impl<F> ParseErrorHandler for F
where
    F: FnMut(&Table, &str, usize) -> ParseAction,
{
    fn on_parse_error(&mut self, table: &Table, source_name: &str, line: usize) -> ParseAction {
        self(table, source_name, line)
    }
}

/// Treat every malformed line as fatal
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictParse;

impl ParseErrorHandler for StrictParse {
    fn on_parse_error(&mut self, _table: &Table, _source_name: &str, _line: usize) -> ParseAction {
        ParseAction::Abort
    }
}

/// Where [`Table::parse_mtab`] looks for the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtabSources {
    pub mtab: PathBuf,
    pub mountinfo: PathBuf,
    pub proc_mounts: PathBuf,
}

impl Default for MtabSources {
    fn default() -> Self {
        Self {
            mtab: utils::mtab_path(),
            mountinfo: PathBuf::from(utils::PATH_PROC_MOUNTINFO),
            proc_mounts: PathBuf::from(utils::PATH_PROC_MOUNTS),
        }
    }
}

/// Decode `\NNN` octal escapes into the raw bytes they stand for
pub fn unmangle(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let is_octal = |b: Option<&u8>| matches!(b, Some(b'0'..=b'7'));

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && is_octal(bytes.get(i + 1))
            && is_octal(bytes.get(i + 2))
            && is_octal(bytes.get(i + 3))
        {
            let digit = |k: usize| u32::from(bytes[i + k] - b'0');
            // values above \377 wrap
            out.push((64 * digit(1) + 8 * digit(2) + digit(3)) as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Unmangle one field; entries hold UTF-8 only
fn field(raw: &str, what: &str) -> Result<String, String> {
    String::from_utf8(unmangle(raw)).map_err(|_| format!("{} {:?} is not valid UTF-8", what, raw))
}

/// mountinfo lines start with two unsigned integers
fn guess_format(line: &str) -> TableFormat {
    let mut fields = line.split_ascii_whitespace();
    let is_num = |f: Option<&str>| f.is_some_and(|f| f.parse::<u32>().is_ok());
    if is_num(fields.next()) && is_num(fields.next()) {
        TableFormat::MountInfo
    } else {
        TableFormat::Fstab
    }
}

/// `SOURCE TARGET FSTYPE OPTIONS [FREQ [PASSNO]]`
fn parse_fstab_line(line: &str) -> Result<Entry, String> {
    let mut fields = line.split_ascii_whitespace();
    let mut next = |what: &str| fields.next().ok_or_else(|| format!("missing {}", what));

    let source = field(next("source")?, "source")?;
    let target = field(next("target")?, "target")?;
    let fstype = field(next("fstype")?, "fstype")?;
    let options = field(next("options")?, "options")?;

    let mut fs = Entry::new();
    fs.set_source(Some(&source)).map_err(|e| e.to_string())?;
    fs.set_target(Some(&target));
    fs.set_fstype(Some(&fstype));
    fs.set_options(Some(&options)).map_err(|e| e.to_string())?;

    if let Some(freq) = fields.next() {
        fs.set_freq(freq.parse().map_err(|_| format!("bad freq {:?}", freq))?);
        if let Some(passno) = fields.next() {
            fs.set_passno(passno.parse().map_err(|_| format!("bad passno {:?}", passno))?);
        }
    }
    Ok(fs)
}

/// `ID PARENT MAJ:MIN ROOT TARGET VFS_OPTS [OPTIONAL...] - FSTYPE SOURCE FS_OPTS`
fn parse_mountinfo_line(line: &str) -> Result<Entry, String> {
    let mut fields = line.split_ascii_whitespace();
    let mut next = |what: &str| fields.next().ok_or_else(|| format!("missing {}", what));
    let number = |s: &str, what: &str| s.parse::<u32>().map_err(|_| format!("bad {} {:?}", what, s));

    let id = number(next("mount ID")?, "mount ID")?;
    let parent = number(next("parent ID")?, "parent ID")?;
    let devno = next("device number")?;
    let (maj, min) = devno
        .split_once(':')
        .ok_or_else(|| format!("bad device number {:?}", devno))?;
    let devno = makedev(number(maj, "major")?, number(min, "minor")?);
    let root = field(next("root")?, "root")?;
    let target = field(next("target")?, "target")?;
    let vfs_options = field(next("VFS options")?, "VFS options")?;

    // optional fields end at a lone "-"
    while next("separator")? != "-" {}

    let fstype = field(next("fstype")?, "fstype")?;
    let source = next("source")?;
    let fs_options = next("fs options")?;

    let mut fs = Entry::new();
    fs.set_id(id);
    fs.set_parent_id(parent);
    fs.set_devno(devno);
    fs.set_root(Some(&root));
    fs.set_target(Some(&target));
    fs.set_vfs_options(Some(&vfs_options));
    fs.set_fstype(Some(&fstype));
    let source = (source != "none").then(|| field(source, "source")).transpose()?;
    fs.set_source(source.as_deref()).map_err(|e| e.to_string())?;
    let fs_options = (fs_options != "none")
        .then(|| field(fs_options, "fs options"))
        .transpose()?;
    fs.set_fs_options(fs_options.as_deref());
    Ok(fs)
}

impl Table {
    /// Parse lines from `reader` and append the entries.
    ///
    /// The format is guessed from the first line unless already set.
    /// Malformed lines go to the error handler; without one they are
    /// dropped.
    pub fn parse_stream<R: BufRead>(&mut self, mut reader: R, source_name: &str) -> MountResult<()> {
        debug!("{}: start parsing", source_name);
        let mut buf = Vec::new();
        let mut lineno = 0;

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| MountError::io(format!("reading {}", source_name), e))?;
            if n == 0 {
                break;
            }
            lineno += 1;
            if buf.last() != Some(&b'\n') {
                debug!("{}: no final newline", source_name);
            }

            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let start = raw
                .iter()
                .position(|b| *b != b' ' && *b != b'\t')
                .unwrap_or(raw.len());
            let raw = &raw[start..];
            if raw.is_empty() || raw[0] == b'#' {
                continue;
            }

            let parsed = match std::str::from_utf8(raw) {
                Ok(line) => {
                    if self.format == TableFormat::Unknown {
                        self.format = guess_format(line);
                        debug!("{}: guessed format {:?}", source_name, self.format);
                    }
                    match self.format {
                        TableFormat::MountInfo => parse_mountinfo_line(line),
                        _ => parse_fstab_line(line),
                    }
                }
                Err(_) => Err("line is not valid UTF-8".to_string()),
            };

            match parsed {
                Ok(fs) => {
                    self.add(fs);
                }
                Err(reason) => self.bad_line(source_name, lineno, reason)?,
            }
        }

        debug!("{}: stop parsing ({} entries)", source_name, self.len());
        Ok(())
    }

    fn bad_line(&mut self, source_name: &str, lineno: usize, reason: String) -> MountResult<()> {
        debug!("{}:{}: parse error: {}", source_name, lineno, reason);
        match self.parse_error_action(source_name, lineno) {
            ParseAction::Abort => return Err(MountError::parse(source_name, lineno, reason)),
            ParseAction::Warn => {
                warn!("{}:{}: ignoring malformed line: {}", source_name, lineno, reason);
            }
            ParseAction::Skip => {}
        }
        Ok(())
    }

    fn parse_error_action(&mut self, source_name: &str, line: usize) -> ParseAction {
        let Some(mut handler) = self.error_handler.take() else {
            return ParseAction::Skip;
        };
        let action = handler.on_parse_error(self, source_name, line);
        self.error_handler = Some(handler);
        action
    }

    /// Parse a string; `source_name` is used in messages only
    pub fn parse_str(&mut self, s: &str, source_name: &str) -> MountResult<()> {
        self.parse_stream(s.as_bytes(), source_name)
    }

    /// Parse a whole file and append its entries
    pub fn parse_file(&mut self, path: &Path) -> MountResult<()> {
        let file = File::open(path)
            .map_err(|e| MountError::io(format!("opening {}", path.display()), e))?;
        self.parse_stream(BufReader::new(file), &path.display().to_string())
    }

    /// New table from one file, format guessed
    pub fn from_file(path: &Path) -> MountResult<Self> {
        let mut table = Self::new();
        table.parse_file(path)?;
        Ok(table)
    }

    /// Parse an fstab file; `None` means the default path
    pub fn parse_fstab(&mut self, path: Option<&Path>) -> MountResult<()> {
        let path = path.map_or_else(utils::fstab_path, Path::to_path_buf);
        self.format = TableFormat::Fstab;
        self.parse_file(&path)
    }

    /// Read the mount table of the running system.
    ///
    /// A regular mtab file wins. Otherwise, or when it cannot be parsed, the
    /// kernel's mountinfo is read, and /proc/mounts as a last resort.
    pub fn parse_mtab(&mut self, sources: &MtabSources) -> MountResult<()> {
        if utils::has_regular_mtab(&sources.mtab, false).regular {
            debug!("force {} usage", sources.mtab.display());
            match self.parse_file(&sources.mtab) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("{}: {}", sources.mtab.display(), e),
            }
        }

        self.format = TableFormat::MountInfo;
        if let Err(e) = self.parse_file(&sources.mountinfo) {
            debug!("{}: {}; trying {}", sources.mountinfo.display(), e, sources.proc_mounts.display());
            self.format = TableFormat::Fstab;
            return self.parse_file(&sources.proc_mounts);
        }
        Ok(())
    }
}
