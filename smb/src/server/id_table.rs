use std::collections::HashMap;

use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

/// Monotonic id allocator backing the per-session resource tables. Zero and
/// the top of the range are reserved wire sentinels and are never handed
/// out; allocation wraps once the range is exhausted and skips ids still
/// live in the table.
pub struct IdTable<V> {
    entries: HashMap<u64, V>,
    next: u64,
    max_id: u64,
    space: &'static str,
}

impl<V> IdTable<V> {
    pub fn new(space: &'static str) -> Self {
        Self::bounded(space, u64::MAX)
    }

    /// Table whose ids must fit a narrower wire field, e.g. 32-bit tree ids.
    pub fn bounded(space: &'static str, max_id: u64) -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
            max_id,
            space,
        }
    }

    pub fn insert(&mut self, value: V) -> SMBResult<u64> {
        if self.entries.len() as u64 >= self.max_id - 1 {
            return Err(SMBError::resource_exhausted(self.space));
        }
        loop {
            let candidate = self.next;
            self.next = if self.next >= self.max_id - 1 {
                1
            } else {
                self.next + 1
            };
            if !self.entries.contains_key(&candidate) {
                self.entries.insert(candidate, value);
                return Ok(candidate);
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut V> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<V> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (u64, V)> + '_ {
        self.entries.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut table = IdTable::new("files");
        assert_eq!(table.insert("a").unwrap(), 1);
        assert_eq!(table.insert("b").unwrap(), 2);
        assert_eq!(table.insert("c").unwrap(), 3);
    }

    #[test]
    fn removed_ids_are_not_immediately_reused() {
        let mut table = IdTable::new("files");
        let first = table.insert("a").unwrap();
        table.insert("b").unwrap();
        table.remove(first);
        assert_eq!(table.insert("c").unwrap(), 3);
    }

    #[test]
    fn allocation_wraps_and_skips_live_ids() {
        let mut table = IdTable::bounded("trees", 5);
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        let c = table.insert("c").unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        table.remove(b);
        assert_eq!(table.insert("d").unwrap(), 4);
        // next wraps past the reserved top-of-range and the live ids
        assert_eq!(table.insert("e").unwrap(), 2);
    }

    #[test]
    fn zero_and_max_are_never_allocated() {
        let mut table = IdTable::bounded("trees", 4);
        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Ok(id) = table.insert(()) {
                seen.push(id);
            }
        }
        assert!(!seen.contains(&0));
        assert!(!seen.contains(&4));
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut table = IdTable::bounded("trees", 3);
        table.insert(()).unwrap();
        table.insert(()).unwrap();
        assert!(matches!(
            table.insert(()),
            Err(SMBError::ResourceExhausted { .. })
        ));
    }
}
