//! Lock command - increment a counter file under the mtab lock

use crate::cli::args::LockArgs;
use crate::config::Config;
use crate::error::{MountError, MountResult};
use crate::lock::Lock;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Execute the lock command
pub fn execute(args: LockArgs, config: &Config) -> MountResult<()> {
    let lock = Lock::new(&args.datafile, args.id);
    lock.use_simple_lock(args.simple || config.lock.simple)?;
    lock.block_signals(config.lock.block_signals);
    lock.set_timeout(
        args.timeout
            .map_or_else(|| config.lock.timeout(), Duration::from_secs),
    );
    lock.set_retry_delay(config.lock.retry_delay());

    let mut last = 0;
    for round in 0..args.count {
        let _guard = lock.guard()?;
        last = read_counter(&args.datafile)? + 1;
        fs::write(&args.datafile, format!("{}\n", last)).map_err(|e| {
            MountError::io(format!("writing {}", args.datafile.display()), e)
        })?;
        debug!("round {}: counter {}", round, last);

        if args.hold_ms > 0 {
            thread::sleep(Duration::from_millis(args.hold_ms));
        }
    }

    println!("{}", last);
    Ok(())
}

fn read_counter(path: &Path) -> MountResult<u64> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(MountError::io(format!("reading {}", path.display()), e)),
    };

    let content = content.trim();
    if content.is_empty() {
        return Ok(0);
    }
    content.parse().map_err(|_| {
        MountError::InvalidArgument(format!("{}: not a counter: {:?}", path.display(), content))
    })
}
