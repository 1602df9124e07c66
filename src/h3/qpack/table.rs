use std::collections::VecDeque;

use super::QpackError;

/// Per-entry overhead added to `name.len() + value.len()` (RFC 9204 §3.2.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// The decoder side of the QPACK dynamic table.
///
/// The newest entry sits at the front. Absolute indices count insertions
/// from zero, so the newest entry has absolute index `insert_count - 1`.
/// Eviction drops entries from the back until the table fits its capacity.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    capacity: usize,
    max_capacity: usize,
    insert_count: u64,
}

impl DynamicTable {
    /// `max_capacity` is the SETTINGS_QPACK_MAX_TABLE_CAPACITY we advertised.
    /// The table starts with capacity zero until the encoder raises it.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            capacity: 0,
            max_capacity,
            insert_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes used under the RFC accounting.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of insertions ever made.
    pub fn insert_count(&self) -> u64 {
        self.insert_count
    }

    /// MaxEntries, used to decode the Required Insert Count.
    pub fn max_entries(&self) -> u64 {
        (self.max_capacity / ENTRY_OVERHEAD) as u64
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<(), QpackError> {
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|&c| c <= self.max_capacity)
            .ok_or(QpackError::CapacityExceeded(capacity))?;
        self.capacity = capacity;
        self.evict_to(capacity);
        Ok(())
    }

    /// Insert a new entry, evicting old ones as needed.
    ///
    /// An entry larger than the whole capacity is refused and the table
    /// is left untouched.
    pub fn insert(&mut self, name: String, value: String) -> bool {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.capacity {
            return false;
        }
        self.evict_to(self.capacity - entry_size);
        self.entries.push_front((name, value));
        self.size += entry_size;
        self.insert_count += 1;
        true
    }

    /// Re-insert the entry at encoder-relative index `index`.
    pub fn duplicate(&mut self, index: u64) -> Result<bool, QpackError> {
        let (name, value) = self
            .get_relative(self.insert_count, index)
            .cloned()
            .ok_or(QpackError::InvalidIndex(index))?;
        Ok(self.insert(name, value))
    }

    pub fn get_absolute(&self, index: u64) -> Option<&(String, String)> {
        let newest = self.insert_count.checked_sub(1)?;
        let pos = usize::try_from(newest.checked_sub(index)?).ok()?;
        self.entries.get(pos)
    }

    /// Entry `index` positions before `base` (relative indexing).
    pub fn get_relative(&self, base: u64, index: u64) -> Option<&(String, String)> {
        self.get_absolute(base.checked_sub(index)?.checked_sub(1)?)
    }

    /// Entry `index` positions at or after `base` (post-base indexing).
    pub fn get_post_base(&self, base: u64, index: u64) -> Option<&(String, String)> {
        self.get_absolute(base.checked_add(index)?)
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= name.len() + value.len() + ENTRY_OVERHEAD,
                None => break,
            }
        }
    }
}
