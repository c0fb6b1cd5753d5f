use crate::protocol::body::query_directory::DirectoryEntry;

/// Fixed per-entry overhead used when packing a scan chunk against the
/// caller's output buffer: sizes, attributes, and two timestamps.
const ENTRY_OVERHEAD: usize = 38;

/// An in-progress directory scan. The full listing is captured when the
/// scan starts; subsequent requests drain it in buffer-sized chunks.
#[derive(Debug, Clone)]
pub struct OpenSearch {
    pub pattern: String,
    entries: Vec<DirectoryEntry>,
    cursor: usize,
}

impl OpenSearch {
    pub fn new(pattern: impl Into<String>, entries: Vec<DirectoryEntry>) -> Self {
        Self {
            pattern: pattern.into(),
            entries,
            cursor: 0,
        }
    }

    pub fn restart(&mut self, entries: Vec<DirectoryEntry>) {
        self.entries = entries;
        self.cursor = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    /// Next chunk of entries that fits `output_buffer_length` bytes, always
    /// at least one entry when any remain.
    pub fn take_next(&mut self, output_buffer_length: u32) -> Vec<DirectoryEntry> {
        let mut chunk = Vec::new();
        let mut used = 0usize;
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            let cost = ENTRY_OVERHEAD + entry.file_name.len();
            if !chunk.is_empty() && used + cost > output_buffer_length as usize {
                break;
            }
            used += cost;
            chunk.push(entry.clone());
            self.cursor += 1;
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::create::FileAttributes;
    use crate::protocol::body::filetime::FileTime;

    fn entry(name: &str) -> DirectoryEntry {
        DirectoryEntry {
            file_name: name.to_string(),
            end_of_file: 10,
            file_attributes: FileAttributes::NORMAL,
            creation_time: FileTime::now(),
            last_write_time: FileTime::now(),
        }
    }

    #[test]
    fn drains_in_buffer_sized_chunks() {
        let mut search = OpenSearch::new("*", vec![entry("a"), entry("b"), entry("c")]);
        let first = search.take_next(90);
        assert_eq!(first.len(), 2);
        let second = search.take_next(90);
        assert_eq!(second.len(), 1);
        assert!(search.is_exhausted());
        assert!(search.take_next(90).is_empty());
    }

    #[test]
    fn tiny_buffer_still_yields_one_entry() {
        let mut search = OpenSearch::new("*", vec![entry("a-very-long-file-name.txt")]);
        assert_eq!(search.take_next(1).len(), 1);
    }

    #[test]
    fn restart_rewinds_the_cursor() {
        let mut search = OpenSearch::new("*", vec![entry("a")]);
        search.take_next(1024);
        assert!(search.is_exhausted());
        search.restart(vec![entry("a"), entry("b")]);
        assert_eq!(search.take_next(1024).len(), 2);
    }
}
