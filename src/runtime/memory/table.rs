use crate::error::{AccelError, AccelResult};
use crate::runtime::memory::AllocRecord;

/// Index-keyed registry of allocation records.
///
/// Indices grow monotonically until [`AllocationTable::clear`], which bumps
/// the epoch so that handles issued before the clear are recognizable as stale.
#[derive(Debug, Default)]
pub struct AllocationTable {
    records: Vec<AllocRecord>,
    epoch: u32,
}

impl AllocationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Index the next registered record will receive.
    ///
    /// # Errors
    /// `InvalidHandle` once the table holds more records than a handle can address.
    pub fn next_index(&self) -> AccelResult<u32> {
        index_for(self.records.len())
    }

    /// Appends a record. The returned index equals the table size before insertion.
    pub(crate) fn register(&mut self, record: AllocRecord) -> AccelResult<u32> {
        let index = self.next_index()?;
        self.records.push(record);
        Ok(index)
    }

    pub(crate) fn lookup(&self, index: u32, epoch: u32) -> AccelResult<&AllocRecord> {
        self.check(index, epoch)?;
        Ok(&self.records[index as usize])
    }

    pub(crate) fn lookup_mut(&mut self, index: u32, epoch: u32) -> AccelResult<&mut AllocRecord> {
        self.check(index, epoch)?;
        Ok(&mut self.records[index as usize])
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &AllocRecord> {
        self.records.iter()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut AllocRecord> {
        self.records.iter_mut()
    }

    /// Forgets every record. Tracked addresses are not freed here.
    pub fn clear(&mut self) {
        self.records.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn check(&self, index: u32, epoch: u32) -> AccelResult<()> {
        if epoch != self.epoch {
            return Err(AccelError::InvalidHandle(format!(
                "allocation {index} was issued before the table was cleared"
            )));
        }
        if index as usize >= self.records.len() {
            return Err(AccelError::InvalidHandle(format!(
                "allocation {index} out of bounds (table holds {})",
                self.records.len()
            )));
        }
        Ok(())
    }
}

fn index_for(len: usize) -> AccelResult<u32> {
    u32::try_from(len).map_err(|_| {
        AccelError::InvalidHandle(format!("handle space exhausted ({len} records)"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::AllocKind;
    use std::ptr;

    fn record() -> AllocRecord {
        AllocRecord::new(ptr::null_mut(), 16, AllocKind::Imported)
    }

    #[test]
    fn indices_follow_insertion_order() {
        let mut table = AllocationTable::new();
        assert_eq!(table.register(record()).unwrap(), 0);
        assert_eq!(table.register(record()).unwrap(), 1);
        assert_eq!(table.register(record()).unwrap(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.next_index().unwrap(), 3);
    }

    #[test]
    fn out_of_bounds_lookup_is_invalid() {
        let mut table = AllocationTable::new();
        table.register(record()).unwrap();
        assert!(table.lookup(0, 0).is_ok());
        assert!(matches!(
            table.lookup(1, 0),
            Err(AccelError::InvalidHandle(_))
        ));
    }

    #[test]
    fn clear_restarts_indices_and_invalidates_old_epoch() {
        let mut table = AllocationTable::new();
        table.register(record()).unwrap();
        table.register(record()).unwrap();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.epoch(), 1);

        assert_eq!(table.register(record()).unwrap(), 0);
        assert!(matches!(
            table.lookup(0, 0),
            Err(AccelError::InvalidHandle(_))
        ));
        assert!(table.lookup(0, 1).is_ok());
    }

    #[test]
    fn indices_beyond_handle_range_are_refused() {
        assert_eq!(index_for(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            index_for(u32::MAX as usize + 1),
            Err(AccelError::InvalidHandle(_))
        ));
    }
}
