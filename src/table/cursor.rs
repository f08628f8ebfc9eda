//! Replayable positions into a table

use super::{EntryId, Table};
use crate::entry::Entry;
use crate::error::{MountError, MountResult};
use tracing::debug;

/// Scan direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Position and direction of a walk over a [`Table`].
///
/// A cursor binds to the table generation on its first step; adding or
/// removing entries afterwards makes it stale until [`Cursor::reset`].
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    direction: Direction,
    started: bool,
    /// Slot returned by the next step
    pos: Option<usize>,
    generation: Option<u64>,
}

/// Predicate for [`Table::find_next`]
pub trait EntryFilter {
    fn matches(&mut self, entry: &Entry) -> bool;
}

impl<F> EntryFilter for F
where
    F: FnMut(&Entry) -> bool,
{
    fn matches(&mut self, entry: &Entry) -> bool {
        self(entry)
    }
}

impl Cursor {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Rewind and switch direction
    pub fn reset(&mut self, direction: Direction) {
        *self = Self::new(direction);
    }

    fn sync(&mut self, table: &Table) -> MountResult<()> {
        match self.generation {
            Some(gen) if gen != table.generation => Err(MountError::StaleCursor),
            Some(_) => Ok(()),
            None => {
                self.generation = Some(table.generation);
                if !self.started {
                    self.started = true;
                    self.pos = table.start(self.direction);
                }
                Ok(())
            }
        }
    }
}

impl Table {
    /// Step `cursor` once; `Ok(None)` at the end of the table
    pub fn next(&self, cursor: &mut Cursor) -> MountResult<Option<EntryId>> {
        cursor.sync(self)?;
        let Some(index) = cursor.pos else {
            return Ok(None);
        };
        cursor.pos = self.step(index, cursor.direction);
        Ok(Some(self.id_at(index)))
    }

    /// Step `cursor` until `filter` accepts an entry. The cursor is left
    /// just past the match, so calling again continues the scan.
    pub fn find_next<F: EntryFilter>(
        &self,
        cursor: &mut Cursor,
        mut filter: F,
    ) -> MountResult<Option<EntryId>> {
        while let Some(id) = self.next(cursor)? {
            if filter.matches(self.entry_at(id.index)) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Position `cursor` so that its next step returns `id`
    pub fn seek(&self, cursor: &mut Cursor, id: EntryId) -> MountResult<()> {
        let index = self.check(id)?;
        cursor.started = true;
        cursor.pos = Some(index);
        cursor.generation = Some(self.generation);
        Ok(())
    }

    /// Root filesystem of a mountinfo table.
    ///
    /// The root is the entry with the smallest parent ID. `Ok(None)` when
    /// the table is empty or any entry has a zero parent ID, which means
    /// the table was not read from mountinfo.
    pub fn root(&self) -> MountResult<Option<EntryId>> {
        let mut best: Option<(u32, usize)> = None;

        for index in self.iter_slots(Direction::Forward) {
            let parent = self.entry_at(index).parent_id();
            if parent == 0 {
                debug!("not a mountinfo table; no root");
                return Ok(None);
            }
            if best.map_or(true, |(min, _)| parent < min) {
                best = Some((parent, index));
            }
        }
        Ok(best.map(|(_, index)| self.id_at(index)))
    }

    /// Next child of `parent` in mount order.
    ///
    /// Children are returned by ascending mount ID. The cursor remembers the
    /// last child returned; start with a fresh cursor to get the first one.
    pub fn next_child(&self, cursor: &mut Cursor, parent: EntryId) -> MountResult<Option<EntryId>> {
        let parent_index = self.check(parent)?;
        let parent_id = self.entry_at(parent_index).id();
        if parent_id == 0 {
            return Err(MountError::InvalidArgument(
                "parent entry has no mount ID".to_string(),
            ));
        }

        // a fresh or exhausted cursor starts from the first child
        let last_child = if cursor.started {
            cursor.sync(self)?;
            cursor.pos.map_or(0, |i| self.entry_at(i).id())
        } else {
            0
        };

        let mut best: Option<(u32, usize)> = None;
        for index in self.iter_slots(Direction::Forward) {
            let fs = self.entry_at(index);
            let id = fs.id();
            // old kernels report rootfs as its own parent
            if fs.parent_id() != parent_id || id == parent_id {
                continue;
            }
            if last_child != 0 && id <= last_child {
                if id == last_child && cursor.pos != Some(index) {
                    return Err(MountError::DuplicateMountId(id));
                }
                continue;
            }
            match best {
                Some((min, _)) if id == min => return Err(MountError::DuplicateMountId(id)),
                Some((min, _)) if id > min => {}
                _ => best = Some((id, index)),
            }
        }

        cursor.direction = Direction::Forward;
        match best {
            Some((_, index)) => {
                let child = self.id_at(index);
                self.seek(cursor, child)?;
                Ok(Some(child))
            }
            None => {
                cursor.started = true;
                cursor.pos = None;
                cursor.generation = Some(self.generation);
                Ok(None)
            }
        }
    }
}
