//! List command - print the entries of a mount table

use super::{load_table, print_entries};
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::entry::Entry;
use crate::error::MountResult;
use crate::table::{Cursor, Direction, EntryId, Table};
use console::style;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Execute the list command
pub fn execute(args: ListArgs, config: &Config) -> MountResult<()> {
    let tb = load_table(&args.source, config)?;
    debug!("{} entries read", tb.len());

    if args.tree {
        return print_tree(&tb, &args);
    }

    let entries: Vec<&Entry> = tb.iter().filter(|fs| wanted(fs, &args)).collect();
    print_entries(&entries, args.format)
}

fn wanted(fs: &Entry, args: &ListArgs) -> bool {
    args.types.as_deref().map_or(true, |t| fs.match_fstype(t))
        && args.options.as_deref().map_or(true, |o| fs.match_options(o))
}

fn print_tree(tb: &Table, args: &ListArgs) -> MountResult<()> {
    let Some(root) = tb.root()? else {
        debug!("no root filesystem");
        return Ok(());
    };

    let mut ordered = Vec::new();
    walk(tb, root, 0, &mut HashSet::new(), &mut ordered)?;

    match args.format {
        OutputFormat::Table => {
            println!(
                "{:<32} {:<24} {:<10} {}",
                style("TARGET").bold(),
                style("SOURCE").bold(),
                style("FSTYPE").bold(),
                style("ID").bold()
            );
            for (depth, fs) in ordered.iter().filter(|(_, fs)| wanted(fs, args)) {
                let target = format!("{}{}", "  ".repeat(*depth), fs.target().unwrap_or("-"));
                println!(
                    "{:<32} {:<24} {:<10} {}",
                    target,
                    fs.source().unwrap_or("none"),
                    fs.fstype().unwrap_or("-"),
                    fs.id()
                );
            }
            Ok(())
        }
        format => {
            let entries: Vec<&Entry> = ordered
                .into_iter()
                .map(|(_, fs)| fs)
                .filter(|fs| wanted(fs, args))
                .collect();
            print_entries(&entries, format)
        }
    }
}

fn walk<'a>(
    tb: &'a Table,
    id: EntryId,
    depth: usize,
    seen: &mut HashSet<u32>,
    out: &mut Vec<(usize, &'a Entry)>,
) -> MountResult<()> {
    let Some(fs) = tb.get(id) else {
        return Ok(());
    };
    if !seen.insert(fs.id()) {
        warn!("mount ID {} is its own ancestor", fs.id());
        return Ok(());
    }
    out.push((depth, fs));

    let mut cursor = Cursor::new(Direction::Forward);
    while let Some(child) = tb.next_child(&mut cursor, id)? {
        walk(tb, child, depth + 1, seen, out)?;
    }
    Ok(())
}
