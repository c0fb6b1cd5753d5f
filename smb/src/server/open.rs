use std::time::SystemTime;

use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::create::FileId;

/// A file or directory handle owned by a session. The path addresses the
/// share's backing store directly.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub file_id: FileId,
    pub tree_id: u32,
    pub share_name: String,
    pub path: String,
    pub access: AccessMask,
    pub is_directory: bool,
    pub delete_on_close: bool,
    pub opened_at: SystemTime,
    /// Directory scan attached to this handle, if one is in progress.
    pub search_id: Option<u64>,
}

impl OpenFile {
    pub fn new(
        file_id: FileId,
        tree_id: u32,
        share_name: impl Into<String>,
        path: impl Into<String>,
        access: AccessMask,
        is_directory: bool,
        delete_on_close: bool,
    ) -> Self {
        Self {
            file_id,
            tree_id,
            share_name: share_name.into(),
            path: path.into(),
            access,
            is_directory,
            delete_on_close,
            opened_at: SystemTime::now(),
            search_id: None,
        }
    }
}
