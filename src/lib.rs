//! mounttab - Linux mount tables
//!
//! Parses fstab, mtab and mountinfo files into a [`Table`] of [`Entry`]
//! values, looks entries up by mountpoint, device or tag, manipulates
//! mount option strings, and serializes mtab updates with a [`Lock`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod lock;
pub mod optmap;
pub mod optstr;
pub mod table;
pub mod utils;

pub use cache::{Cache, DevDiskCache};
pub use entry::Entry;
pub use error::{MountError, MountResult};
pub use lock::Lock;
pub use optstr::OptString;
pub use table::{Cursor, Direction, Table};
