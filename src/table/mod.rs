//! Ordered collection of mount entries
//!
//! Entries live in an arena of slots linked in file order, so insertion and
//! removal are O(1) and an [`EntryId`] stays valid until its entry is
//! removed. Every structural change bumps the table generation, which
//! invalidates outstanding [`Cursor`]s.

mod cursor;
mod find;
mod parse;
mod write;

pub use cursor::{Cursor, Direction, EntryFilter};
pub use parse::{unmangle, MtabSources, ParseAction, ParseErrorHandler, StrictParse};
pub use write::{mangle, write_entry, write_fstab};

use crate::cache::Cache;
use crate::entry::Entry;
use crate::error::{MountError, MountResult};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Line format of a table source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Unknown,
    /// fstab, mtab and /proc/mounts
    Fstab,
    /// /proc/self/mountinfo
    MountInfo,
}

/// Stable handle to an entry of one [`Table`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: usize,
    gen: u32,
}

struct Slot {
    entry: Option<Entry>,
    gen: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

/// fstab, mtab or mountinfo contents
#[derive(Default)]
pub struct Table {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    generation: u64,

    format: TableFormat,
    cache: Option<Rc<dyn Cache>>,
    error_handler: Option<Box<dyn ParseErrorHandler>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    pub fn set_format(&mut self, format: TableFormat) {
        self.format = format;
    }

    /// Structural version, bumped by every add and remove
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Attach a canonicalization cache; lookups skip their canonical
    /// passes without one
    pub fn set_cache(&mut self, cache: Option<Rc<dyn Cache>>) {
        self.cache = cache;
    }

    pub fn cache(&self) -> Option<&dyn Cache> {
        self.cache.as_deref()
    }

    /// Install the per-line error policy used while parsing
    pub fn set_error_handler(&mut self, handler: Option<Box<dyn ParseErrorHandler>>) {
        self.error_handler = handler;
    }

    /// Append `entry` and return its handle
    pub fn add(&mut self, entry: Entry) -> EntryId {
        let slot = Slot {
            entry: Some(entry),
            gen: 0,
            prev: self.tail,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                let gen = self.slots[index].gen;
                self.slots[index] = Slot { gen, ..slot };
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        self.generation += 1;

        trace!(index, "added entry");
        EntryId {
            index,
            gen: self.slots[index].gen,
        }
    }

    /// Unlink the entry and hand it back to the caller
    pub fn remove(&mut self, id: EntryId) -> MountResult<Entry> {
        let index = self.check(id)?;
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[index];
        slot.gen = slot.gen.wrapping_add(1);
        slot.prev = None;
        slot.next = None;
        let entry = slot.entry.take().ok_or(MountError::UnknownEntry)?;

        self.free.push(index);
        self.len -= 1;
        self.generation += 1;
        trace!(index, "removed entry");
        Ok(entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn first(&self) -> Option<&Entry> {
        self.head.and_then(|i| self.slots[i].entry.as_ref())
    }

    pub fn last(&self) -> Option<&Entry> {
        self.tail.and_then(|i| self.slots[i].entry.as_ref())
    }

    /// Entries in file order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            table: self,
            front: self.head,
            back: self.tail,
            remaining: self.len,
        }
    }

    /// Handles in file order
    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.iter_slots(Direction::Forward).map(|index| self.id_at(index))
    }

    fn check(&self, id: EntryId) -> MountResult<usize> {
        match self.slots.get(id.index) {
            Some(slot) if slot.gen == id.gen && slot.entry.is_some() => Ok(id.index),
            _ => Err(MountError::UnknownEntry),
        }
    }

    fn id_at(&self, index: usize) -> EntryId {
        EntryId {
            index,
            gen: self.slots[index].gen,
        }
    }

    fn entry_at(&self, index: usize) -> &Entry {
        // linked slots always hold an entry
        match &self.slots[index].entry {
            Some(entry) => entry,
            None => unreachable!("linked slot {index} is empty"),
        }
    }

    fn step(&self, index: usize, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward => self.slots[index].next,
            Direction::Backward => self.slots[index].prev,
        }
    }

    fn start(&self, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward => self.head,
            Direction::Backward => self.tail,
        }
    }

    /// Slot indexes in `direction` order; used by the lookups, which never
    /// mutate the table
    fn iter_slots(&self, direction: Direction) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.start(direction), move |&i| self.step(i, direction))
    }

    fn entries(&self, direction: Direction) -> impl Iterator<Item = &Entry> + '_ {
        self.iter_slots(direction).map(|i| self.entry_at(i))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("format", &self.format)
            .field("len", &self.len)
            .field("generation", &self.generation)
            .field("cache", &self.cache.is_some())
            .field("entries", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl Extend<Entry> for Table {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        for entry in iter {
            self.add(entry);
        }
    }
}

impl FromIterator<Entry> for Table {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Entry;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over a [`Table`]
pub struct Iter<'a> {
    table: &'a Table,
    front: Option<usize>,
    back: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.front?;
        self.front = self.table.slots[index].next;
        self.remaining -= 1;
        Some(self.table.entry_at(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.back?;
        self.back = self.table.slots[index].prev;
        self.remaining -= 1;
        Some(self.table.entry_at(index))
    }
}

impl ExactSizeIterator for Iter<'_> {}
