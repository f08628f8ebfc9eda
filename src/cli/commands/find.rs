//! Find command - look up one entry by mountpoint and/or source

use super::{load_table, print_entries};
use crate::cli::args::FindArgs;
use crate::config::Config;
use crate::error::MountResult;
use crate::table::Direction;
use tracing::info;

/// Execute the find command. Returns whether an entry matched.
pub fn execute(args: FindArgs, config: &Config) -> MountResult<bool> {
    let tb = load_table(&args.source, config)?;
    let direction = if args.backward {
        Direction::Backward
    } else {
        Direction::Forward
    };

    let found = match (args.source_spec.as_deref(), args.target.as_deref()) {
        (Some(source), Some(target)) => tb.find_pair(source, target, direction),
        (Some(source), None) => tb.find_source(source, direction),
        (None, Some(target)) => tb.find_target(target, direction),
        (None, None) => None,
    };

    match found {
        Some(fs) => {
            print_entries(&[fs], args.format)?;
            Ok(true)
        }
        None => {
            info!("no matching entry");
            Ok(false)
        }
    }
}
