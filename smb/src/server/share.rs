use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use smb_dialog_core::SMBResult;
use tokio::sync::broadcast;

use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::change_notify::{CompletionFilter, FileNotifyInformation, NotifyAction};
use crate::protocol::body::create::{
    CreateAction, CreateDisposition, CreateOptions, FileAttributes, SMBCreateRequest,
};
use crate::protocol::body::filetime::FileTime;
use crate::protocol::body::query_directory::DirectoryEntry;
use crate::protocol::body::tree_connect::{SMBShareFlags, ShareType};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
}

/// Change broadcast by a file store, tagged with the directory it happened
/// in and the filter bits it satisfies.
#[derive(Debug, Clone)]
pub struct ShareEvent {
    pub parent: String,
    pub change: FileNotifyInformation,
    pub filter: CompletionFilter,
}

/// Storage collaborator behind a share. The dialog engine owns handles and
/// ids; the store owns bytes and metadata.
pub trait FileStore: Send + Sync {
    fn create(&self, request: &SMBCreateRequest) -> SMBResult<(CreateAction, FileMetadata)>;
    fn read(&self, path: &str, offset: u64, length: u32) -> SMBResult<Vec<u8>>;
    fn write(&self, path: &str, offset: u64, data: &[u8]) -> SMBResult<u32>;
    fn close(&self, path: &str, delete_on_close: bool) -> SMBResult<FileMetadata>;
    fn list(&self, path: &str, pattern: &str) -> SMBResult<Vec<DirectoryEntry>>;
    fn subscribe(&self) -> broadcast::Receiver<ShareEvent>;
}

/// A share the server exposes, pairing its wire attributes with the store
/// that backs it.
pub struct SharedResource {
    pub name: String,
    pub share_type: ShareType,
    pub flags: SMBShareFlags,
    pub maximal_access: AccessMask,
    pub store: Arc<dyn FileStore>,
}

impl SharedResource {
    pub fn disk(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            share_type: ShareType::Disk,
            flags: SMBShareFlags::empty(),
            maximal_access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            store: Arc::new(InMemoryFileStore::new()),
        }
    }

    /// Disk share whose traffic must be encrypted once a 3.x dialect is
    /// negotiated.
    pub fn encrypted_disk(name: impl Into<String>) -> Self {
        let mut share = Self::disk(name);
        share.flags |= SMBShareFlags::ENCRYPT_DATA;
        share
    }

    pub fn requires_encryption(&self) -> bool {
        self.flags.contains(SMBShareFlags::ENCRYPT_DATA)
    }
}

/// Normalizes a wire path: forward slashes become backslashes and the
/// surrounding separators are trimmed. The empty path is the share root.
pub fn normalize_path(path: &str) -> String {
    path.replace('/', "\\")
        .trim_matches('\\')
        .to_string()
}

fn parent_and_leaf(path: &str) -> (&str, &str) {
    match path.rsplit_once('\\') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}

/// `*` matches any run of characters; everything else is literal.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        None => name == pattern,
        Some((prefix, rest)) => {
            if !name.starts_with(prefix) {
                return false;
            }
            let mut remaining = &name[prefix.len()..];
            let mut segments = rest.split('*').peekable();
            while let Some(segment) = segments.next() {
                if segments.peek().is_none() {
                    return remaining.ends_with(segment);
                }
                match remaining.find(segment) {
                    Some(at) => remaining = &remaining[at + segment.len()..],
                    None => return false,
                }
            }
            true
        }
    }
}

#[derive(Debug, Clone)]
struct FileNode {
    data: Vec<u8>,
    is_directory: bool,
    creation_time: FileTime,
    last_write_time: FileTime,
}

impl FileNode {
    fn directory() -> Self {
        Self {
            data: Vec::new(),
            is_directory: true,
            creation_time: FileTime::now(),
            last_write_time: FileTime::now(),
        }
    }

    fn file() -> Self {
        Self {
            data: Vec::new(),
            is_directory: false,
            creation_time: FileTime::now(),
            last_write_time: FileTime::now(),
        }
    }

    fn metadata(&self) -> FileMetadata {
        let file_attributes = if self.is_directory {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        };
        FileMetadata {
            end_of_file: self.data.len() as u64,
            file_attributes,
            creation_time: self.creation_time,
            last_write_time: self.last_write_time,
        }
    }
}

/// Reference store keeping the whole tree in memory, mainly for tests and
/// demos. The root directory always exists under the empty path.
pub struct InMemoryFileStore {
    nodes: Mutex<BTreeMap<String, FileNode>>,
    events: broadcast::Sender<ShareEvent>,
}

impl Default for InMemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), FileNode::directory());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes: Mutex::new(nodes),
            events,
        }
    }

    fn emit(&self, path: &str, action: NotifyAction, filter: CompletionFilter) {
        let (parent, leaf) = parent_and_leaf(path);
        // nobody listening is fine
        let _ = self.events.send(ShareEvent {
            parent: parent.to_string(),
            change: FileNotifyInformation {
                action,
                file_name: leaf.to_string(),
            },
            filter,
        });
    }

    fn lock(&self) -> SMBResult<std::sync::MutexGuard<'_, BTreeMap<String, FileNode>>> {
        self.nodes
            .lock()
            .map_err(|_| SMBError::server_error("file store lock poisoned"))
    }
}

impl FileStore for InMemoryFileStore {
    fn create(&self, request: &SMBCreateRequest) -> SMBResult<(CreateAction, FileMetadata)> {
        let path = normalize_path(&request.name);
        let wants_directory = request.create_options.contains(CreateOptions::DIRECTORY_FILE);
        let mut created = false;
        let result = {
            let mut nodes = self.lock()?;
            let (parent, _) = parent_and_leaf(&path);
            if !nodes.get(parent).is_some_and(|node| node.is_directory) {
                return Err(SMBError::response_error(NTStatus::ObjectNameNotFound));
            }
            match nodes.get_mut(&path) {
                Some(node) => {
                    if request.create_options.contains(CreateOptions::NON_DIRECTORY_FILE)
                        && node.is_directory
                    {
                        return Err(SMBError::response_error(NTStatus::InvalidParameter));
                    }
                    match request.create_disposition {
                        CreateDisposition::Create => {
                            return Err(SMBError::response_error(NTStatus::ObjectNameCollision));
                        }
                        CreateDisposition::Open | CreateDisposition::OpenIf => {
                            (CreateAction::Opened, node.metadata())
                        }
                        CreateDisposition::Overwrite | CreateDisposition::OverwriteIf => {
                            node.data.clear();
                            node.last_write_time = FileTime::now();
                            (CreateAction::Overwritten, node.metadata())
                        }
                        CreateDisposition::Supersede => {
                            *node = if node.is_directory {
                                FileNode::directory()
                            } else {
                                FileNode::file()
                            };
                            (CreateAction::Superseded, node.metadata())
                        }
                    }
                }
                None => match request.create_disposition {
                    CreateDisposition::Open | CreateDisposition::Overwrite => {
                        return Err(SMBError::response_error(NTStatus::ObjectNameNotFound));
                    }
                    _ => {
                        let node = if wants_directory {
                            FileNode::directory()
                        } else {
                            FileNode::file()
                        };
                        let metadata = node.metadata();
                        nodes.insert(path.clone(), node);
                        created = true;
                        (CreateAction::Created, metadata)
                    }
                },
            }
        };
        if created {
            let filter = if wants_directory {
                CompletionFilter::DIR_NAME
            } else {
                CompletionFilter::FILE_NAME
            };
            self.emit(&path, NotifyAction::Added, filter);
        }
        Ok(result)
    }

    fn read(&self, path: &str, offset: u64, length: u32) -> SMBResult<Vec<u8>> {
        let nodes = self.lock()?;
        let node = nodes
            .get(path)
            .ok_or_else(|| SMBError::response_error(NTStatus::ObjectNameNotFound))?;
        if node.is_directory {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let start = offset as usize;
        if start >= node.data.len() {
            return Err(SMBError::response_error(NTStatus::EndOfFile));
        }
        let end = (start + length as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> SMBResult<u32> {
        {
            let mut nodes = self.lock()?;
            let node = nodes
                .get_mut(path)
                .ok_or_else(|| SMBError::response_error(NTStatus::ObjectNameNotFound))?;
            if node.is_directory {
                return Err(SMBError::response_error(NTStatus::InvalidParameter));
            }
            let end = offset as usize + data.len();
            if node.data.len() < end {
                node.data.resize(end, 0);
            }
            node.data[offset as usize..end].copy_from_slice(data);
            node.last_write_time = FileTime::now();
        }
        self.emit(
            path,
            NotifyAction::Modified,
            CompletionFilter::LAST_WRITE | CompletionFilter::SIZE,
        );
        Ok(data.len() as u32)
    }

    fn close(&self, path: &str, delete_on_close: bool) -> SMBResult<FileMetadata> {
        let (metadata, deleted) = {
            let mut nodes = self.lock()?;
            let node = nodes
                .get(path)
                .ok_or_else(|| SMBError::response_error(NTStatus::FileClosed))?;
            let metadata = node.metadata();
            // the root directory cannot be deleted
            if delete_on_close && !path.is_empty() {
                let prefix = format!("{path}\\");
                nodes.retain(|other, _| other != path && !other.starts_with(&prefix));
                (metadata, true)
            } else {
                (metadata, false)
            }
        };
        if deleted {
            let filter = if metadata.file_attributes.contains(FileAttributes::DIRECTORY) {
                CompletionFilter::DIR_NAME
            } else {
                CompletionFilter::FILE_NAME
            };
            self.emit(path, NotifyAction::Removed, filter);
        }
        Ok(metadata)
    }

    fn list(&self, path: &str, pattern: &str) -> SMBResult<Vec<DirectoryEntry>> {
        let nodes = self.lock()?;
        let directory = nodes
            .get(path)
            .ok_or_else(|| SMBError::response_error(NTStatus::ObjectNameNotFound))?;
        if !directory.is_directory {
            return Err(SMBError::response_error(NTStatus::InvalidParameter));
        }
        let mut entries = Vec::new();
        for (other, node) in nodes.iter() {
            let (parent, leaf) = parent_and_leaf(other);
            if other.is_empty() || parent != path || !matches_pattern(leaf, pattern) {
                continue;
            }
            let metadata = node.metadata();
            entries.push(DirectoryEntry {
                file_name: leaf.to_string(),
                end_of_file: metadata.end_of_file,
                file_attributes: metadata.file_attributes,
                creation_time: metadata.creation_time,
                last_write_time: metadata.last_write_time,
            });
        }
        Ok(entries)
    }

    fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::create::ShareAccess;

    fn create_request(name: &str, disposition: CreateDisposition, options: CreateOptions) -> SMBCreateRequest {
        SMBCreateRequest {
            desired_access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            share_access: ShareAccess::READ,
            create_disposition: disposition,
            create_options: options,
            name: name.to_string(),
        }
    }

    #[test]
    fn create_then_read_back() {
        let store = InMemoryFileStore::new();
        let (action, _) = store
            .create(&create_request("a.txt", CreateDisposition::Create, CreateOptions::empty()))
            .unwrap();
        assert_eq!(action, CreateAction::Created);
        store.write("a.txt", 0, b"hello").unwrap();
        assert_eq!(store.read("a.txt", 1, 3).unwrap(), b"ell");
    }

    #[test]
    fn create_collision_and_missing_open() {
        let store = InMemoryFileStore::new();
        store
            .create(&create_request("a.txt", CreateDisposition::Create, CreateOptions::empty()))
            .unwrap();
        assert!(matches!(
            store.create(&create_request("a.txt", CreateDisposition::Create, CreateOptions::empty())),
            Err(SMBError::Response(NTStatus::ObjectNameCollision))
        ));
        assert!(matches!(
            store.create(&create_request("b.txt", CreateDisposition::Open, CreateOptions::empty())),
            Err(SMBError::Response(NTStatus::ObjectNameNotFound))
        ));
    }

    #[test]
    fn read_past_the_end_reports_eof() {
        let store = InMemoryFileStore::new();
        store
            .create(&create_request("a.txt", CreateDisposition::Create, CreateOptions::empty()))
            .unwrap();
        store.write("a.txt", 0, b"xy").unwrap();
        assert!(matches!(
            store.read("a.txt", 5, 1),
            Err(SMBError::Response(NTStatus::EndOfFile))
        ));
    }

    #[test]
    fn listing_honors_patterns() {
        let store = InMemoryFileStore::new();
        for name in ["a.txt", "b.txt", "c.log"] {
            store
                .create(&create_request(name, CreateDisposition::Create, CreateOptions::empty()))
                .unwrap();
        }
        store
            .create(&create_request("sub", CreateDisposition::Create, CreateOptions::DIRECTORY_FILE))
            .unwrap();
        store
            .create(&create_request("sub\\nested.txt", CreateDisposition::Create, CreateOptions::empty()))
            .unwrap();

        let all = store.list("", "*").unwrap();
        assert_eq!(all.len(), 4);
        let txt = store.list("", "*.txt").unwrap();
        assert_eq!(txt.len(), 2);
        let nested = store.list("sub", "*").unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].file_name, "nested.txt");
    }

    #[test]
    fn delete_on_close_removes_subtree_and_notifies() {
        let store = InMemoryFileStore::new();
        store
            .create(&create_request("sub", CreateDisposition::Create, CreateOptions::DIRECTORY_FILE))
            .unwrap();
        store
            .create(&create_request("sub\\x.txt", CreateDisposition::Create, CreateOptions::empty()))
            .unwrap();
        let mut events = store.subscribe();
        store.close("sub", true).unwrap();
        assert!(store.list("sub", "*").is_err());
        let event = events.try_recv().unwrap();
        assert_eq!(event.change.action, NotifyAction::Removed);
        assert_eq!(event.change.file_name, "sub");
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches_pattern("name.txt", "*"));
        assert!(matches_pattern("name.txt", "*.txt"));
        assert!(matches_pattern("name.txt", "name.*"));
        assert!(matches_pattern("name.txt", "n*e.t*t"));
        assert!(!matches_pattern("name.log", "*.txt"));
        assert!(!matches_pattern("other", "name"));
    }
}
