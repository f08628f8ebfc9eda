//! fstab-format writer

use super::Table;
use crate::entry::Entry;
use crate::error::{MountError, MountResult};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

/// Escape space, tab, newline and backslash as `\NNN`
pub fn mangle(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' | '\t' | '\n' | '\\' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Write one entry as an fstab line
pub fn write_entry<W: Write>(w: &mut W, fs: &Entry) -> MountResult<()> {
    let options = fs.strdup_options()?;
    let options = options
        .as_ref()
        .map(|o| o.as_str())
        .filter(|o| !o.is_empty())
        .unwrap_or("defaults");

    writeln!(
        w,
        "{} {} {} {} {} {}",
        mangle(fs.source().unwrap_or("none")),
        mangle(fs.target().unwrap_or("none")),
        mangle(fs.fstype().unwrap_or("auto")),
        mangle(options),
        fs.freq(),
        fs.passno()
    )
    .map_err(|e| MountError::io("writing entry", e))
}

/// Write every entry of `table` as one fstab line
pub fn write_fstab<W: Write>(table: &Table, w: &mut W) -> MountResult<()> {
    for fs in table {
        write_entry(w, fs)?;
    }
    Ok(())
}

impl Table {
    /// Replace `path` with the table contents.
    ///
    /// The data goes to `<path>.tmp` first and is renamed over `path`, so
    /// readers never see a half-written file. Hold the mtab lock around
    /// this when `path` is shared.
    pub fn save(&self, path: &Path) -> MountResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(tmp)
            .map_err(|e| MountError::io(format!("creating {}", tmp.display()), e))?;

        let mut w = BufWriter::new(file);
        write_fstab(self, &mut w)?;
        let file = w
            .into_inner()
            .map_err(|e| MountError::io(format!("writing {}", tmp.display()), e.into_error()))?;
        file.sync_all()
            .map_err(|e| MountError::io(format!("syncing {}", tmp.display()), e))?;

        fs::rename(tmp, path).map_err(|e| {
            let _ = fs::remove_file(tmp);
            MountError::io(format!("renaming {} to {}", tmp.display(), path.display()), e)
        })?;
        debug!("{}: wrote {} entries", path.display(), self.len());
        Ok(())
    }
}
