//! CLI command implementations

pub mod config;
pub mod find;
pub mod list;
pub mod lock;

pub use config::execute as config;
pub use find::execute as find;
pub use list::execute as list;
pub use lock::execute as lock;

use crate::cache::DevDiskCache;
use crate::cli::args::{OutputFormat, SourceArgs};
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{MountError, MountResult};
use crate::table::{self, ParseAction, StrictParse, Table};
use console::style;
use std::io::{self, Write};
use std::rc::Rc;

/// Read the table selected on the command line
pub(crate) fn load_table(source: &SourceArgs, config: &Config) -> MountResult<Table> {
    let mut tb = Table::new();
    if config.parser.strict {
        tb.set_error_handler(Some(Box::new(StrictParse)));
    } else {
        tb.set_error_handler(Some(Box::new(|_: &Table, _: &str, _: usize| ParseAction::Warn)));
    }
    if source.canonicalize {
        tb.set_cache(Some(Rc::new(DevDiskCache::new())));
    }

    match (&source.file, source.mtab) {
        (Some(path), _) => tb.parse_file(path)?,
        (None, true) => tb.parse_mtab(&config.paths.mtab_sources())?,
        (None, false) => tb.parse_fstab(Some(config.paths.fstab.as_path()))?,
    }
    Ok(tb)
}

/// Print entries in the requested format
pub(crate) fn print_entries(entries: &[&Entry], format: OutputFormat) -> MountResult<()> {
    match format {
        OutputFormat::Table => print_table(entries),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(entries)?;
            println!("{}", json);
        }
        OutputFormat::Plain => {
            let mut out = io::stdout().lock();
            for fs in entries {
                table::write_entry(&mut out, fs)?;
            }
            out.flush()
                .map_err(|e| MountError::io("writing to stdout", e))?;
        }
    }
    Ok(())
}

fn print_table(entries: &[&Entry]) {
    println!(
        "{:<24} {:<24} {:<10} {}",
        style("SOURCE").bold(),
        style("TARGET").bold(),
        style("FSTYPE").bold(),
        style("OPTIONS").bold()
    );

    for fs in entries {
        let options = fs
            .strdup_options()
            .ok()
            .flatten()
            .map(|o| o.into_string())
            .unwrap_or_default();
        println!(
            "{:<24} {:<24} {:<10} {}",
            fs.source().unwrap_or("none"),
            fs.target().unwrap_or("-"),
            fs.fstype().unwrap_or("-"),
            options
        );
    }
}
