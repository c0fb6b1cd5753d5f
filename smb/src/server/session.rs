use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use smb_dialog_core::error::SMBError;
use smb_dialog_core::SMBResult;

use crate::protocol::body::access_mask::AccessMask;
use crate::protocol::body::create::FileId;
use crate::protocol::body::dialect::SMBDialect;
use crate::server::id_table::IdTable;
use crate::server::open::OpenFile;
use crate::server::search::OpenSearch;
use crate::server::share::SharedResource;
use crate::util::auth::SecurityContext;
use crate::util::crypto::smb2;

/// A share bound into a session, with the encryption decision made at
/// connect time.
pub struct TreeConnectEntry {
    pub share: Arc<SharedResource>,
    pub encrypt_data: bool,
}

/// An authenticated session and the three id spaces it owns: tree connects,
/// open files, and directory scans.
pub struct SMBSession {
    pub id: u64,
    pub context: SecurityContext,
    /// Remote endpoint of the connection that set the session up, when the
    /// transport knows one.
    pub peer: Option<SocketAddr>,
    pub created_at: SystemTime,
    pub dialect: SMBDialect,
    pub signing_key: [u8; smb2::SESSION_KEY_LENGTH],
    /// Key for traffic the client sends.
    pub inbound_key: Option<[u8; smb2::SESSION_KEY_LENGTH]>,
    /// Key for traffic the server sends.
    pub outbound_key: Option<[u8; smb2::SESSION_KEY_LENGTH]>,
    pub encrypt_data: bool,
    trees: IdTable<TreeConnectEntry>,
    open_files: IdTable<OpenFile>,
    searches: IdTable<OpenSearch>,
}

impl SMBSession {
    pub fn new(
        id: u64,
        context: SecurityContext,
        peer: Option<SocketAddr>,
        session_key: &[u8],
        dialect: SMBDialect,
        encrypt_data: bool,
    ) -> SMBResult<Self> {
        let signing_key = smb2::generate_signing_key(session_key, dialect)?;
        let (inbound_key, outbound_key) = if dialect.supports_encryption() {
            (
                Some(smb2::client_encryption_key(session_key)?),
                Some(smb2::server_encryption_key(session_key)?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            id,
            context,
            peer,
            created_at: SystemTime::now(),
            dialect,
            signing_key,
            inbound_key,
            outbound_key,
            encrypt_data: encrypt_data && dialect.supports_encryption(),
            trees: IdTable::bounded("tree connects", u32::MAX as u64),
            open_files: IdTable::new("open files"),
            searches: IdTable::new("directory scans"),
        })
    }

    pub fn connect_tree(&mut self, share: Arc<SharedResource>) -> SMBResult<u32> {
        let encrypt_data = share.requires_encryption() && self.dialect.supports_encryption();
        let id = self.trees.insert(TreeConnectEntry {
            share,
            encrypt_data,
        })?;
        Ok(id as u32)
    }

    pub fn tree(&self, tree_id: u32) -> SMBResult<&TreeConnectEntry> {
        self.trees
            .get(tree_id as u64)
            .ok_or_else(|| SMBError::not_found("tree", tree_id as u64))
    }

    /// Tears down a tree connect, closing every handle the session opened
    /// under it through the share's store.
    pub fn disconnect_tree(&mut self, tree_id: u32) -> SMBResult<()> {
        let entry = self
            .trees
            .remove(tree_id as u64)
            .ok_or_else(|| SMBError::not_found("tree", tree_id as u64))?;
        let owned: Vec<u64> = self
            .open_files
            .iter()
            .filter(|(_, open)| open.tree_id == tree_id)
            .map(|(id, _)| id)
            .collect();
        for id in owned {
            if let Some(open) = self.open_files.remove(id) {
                if let Some(search_id) = open.search_id {
                    self.searches.remove(search_id);
                }
                // best effort: the tree is going away either way
                let _ = entry.share.store.close(&open.path, open.delete_on_close);
            }
        }
        Ok(())
    }

    pub fn open_file(
        &mut self,
        tree_id: u32,
        path: impl Into<String>,
        access: AccessMask,
        is_directory: bool,
        delete_on_close: bool,
    ) -> SMBResult<FileId> {
        let share_name = self.tree(tree_id)?.share.name.clone();
        let placeholder = OpenFile::new(
            FileId::new(0),
            tree_id,
            share_name,
            path,
            access,
            is_directory,
            delete_on_close,
        );
        let id = self.open_files.insert(placeholder)?;
        let file_id = FileId::new(id);
        if let Some(open) = self.open_files.get_mut(id) {
            open.file_id = file_id;
        }
        Ok(file_id)
    }

    pub fn file(&self, file_id: &FileId) -> SMBResult<&OpenFile> {
        if file_id.persistent != file_id.volatile {
            return Err(SMBError::not_found("file", file_id.volatile));
        }
        self.open_files
            .get(file_id.volatile)
            .ok_or_else(|| SMBError::not_found("file", file_id.volatile))
    }

    pub fn close_file(&mut self, file_id: &FileId) -> SMBResult<OpenFile> {
        let open = self
            .open_files
            .remove(file_id.volatile)
            .ok_or_else(|| SMBError::not_found("file", file_id.volatile))?;
        if let Some(search_id) = open.search_id {
            self.searches.remove(search_id);
        }
        Ok(open)
    }

    /// Attaches a fresh scan to a directory handle, replacing any scan the
    /// handle already carried.
    pub fn attach_search(&mut self, file_id: &FileId, search: OpenSearch) -> SMBResult<u64> {
        let previous = self.file(file_id)?.search_id;
        if let Some(old) = previous {
            self.searches.remove(old);
        }
        let search_id = self.searches.insert(search)?;
        if let Some(open) = self.open_files.get_mut(file_id.volatile) {
            open.search_id = Some(search_id);
        }
        Ok(search_id)
    }

    pub fn search_for(&mut self, file_id: &FileId) -> SMBResult<Option<&mut OpenSearch>> {
        let search_id = self.file(file_id)?.search_id;
        Ok(search_id.and_then(|id| self.searches.get_mut(id)))
    }

    pub fn should_encrypt(&self, tree_id: u32) -> bool {
        if self.encrypt_data {
            return true;
        }
        self.trees
            .get(tree_id as u64)
            .map(|tree| tree.encrypt_data)
            .unwrap_or(false)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Full teardown at logoff or connection loss: every tree goes through
    /// the same path as an explicit disconnect.
    pub fn close(&mut self) {
        let tree_ids: Vec<u64> = self.trees.ids().collect();
        for id in tree_ids {
            let _ = self.disconnect_tree(id as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SMBSession {
        SMBSession::new(
            1,
            SecurityContext::for_user("alice"),
            None,
            &[7u8; 16],
            SMBDialect::V3_1_1,
            false,
        )
        .unwrap()
    }

    fn open_in(session: &mut SMBSession, tree_id: u32, path: &str) -> FileId {
        session
            .open_file(tree_id, path, AccessMask::GENERIC_READ, false, false)
            .unwrap()
    }

    #[test]
    fn smb3_sessions_carry_encryption_keys() {
        let session = session();
        assert!(session.inbound_key.is_some());
        assert!(session.outbound_key.is_some());
        assert_ne!(session.inbound_key, session.outbound_key);

        let smb2_session = SMBSession::new(
            2,
            SecurityContext::for_user("bob"),
            None,
            &[7u8; 16],
            SMBDialect::V2_1_0,
            false,
        )
        .unwrap();
        assert!(smb2_session.inbound_key.is_none());
    }

    #[test]
    fn sessions_and_opens_record_their_provenance() {
        let peer: SocketAddr = "10.0.0.9:50445".parse().unwrap();
        let mut session = SMBSession::new(
            3,
            SecurityContext::for_user("alice"),
            Some(peer),
            &[7u8; 16],
            SMBDialect::V3_1_1,
            false,
        )
        .unwrap();
        assert_eq!(session.context.user, "alice");
        assert_eq!(session.peer, Some(peer));
        assert!(session.created_at <= SystemTime::now());

        let tree_id = session
            .connect_tree(Arc::new(SharedResource::disk("docs")))
            .unwrap();
        let file_id = open_in(&mut session, tree_id, "a.txt");
        let open = session.file(&file_id).unwrap();
        assert_eq!(open.share_name, "docs");
        assert!(open.opened_at <= SystemTime::now());
    }

    #[test]
    fn file_ids_keep_their_halves_in_sync() {
        let mut session = session();
        let tree_id = session.connect_tree(Arc::new(SharedResource::disk("tmp"))).unwrap();
        let file_id = open_in(&mut session, tree_id, "a.txt");
        assert_eq!(file_id.persistent, file_id.volatile);
        assert!(session.file(&file_id).is_ok());

        let mismatched = FileId {
            persistent: file_id.persistent + 1,
            volatile: file_id.volatile,
        };
        assert!(session.file(&mismatched).is_err());
    }

    #[test]
    fn disconnect_tree_closes_owned_files_only() {
        let mut session = session();
        let first = session.connect_tree(Arc::new(SharedResource::disk("a"))).unwrap();
        let second = session.connect_tree(Arc::new(SharedResource::disk("b"))).unwrap();
        let in_first = open_in(&mut session, first, "x");
        let in_second = open_in(&mut session, second, "y");

        session.disconnect_tree(first).unwrap();
        assert!(session.file(&in_first).is_err());
        assert!(session.file(&in_second).is_ok());
        assert!(session.tree(first).is_err());
        assert!(session.tree(second).is_ok());
    }

    #[test]
    fn closing_a_handle_drops_its_search() {
        let mut session = session();
        let tree_id = session.connect_tree(Arc::new(SharedResource::disk("a"))).unwrap();
        let file_id = open_in(&mut session, tree_id, "dir");
        session
            .attach_search(&file_id, OpenSearch::new("*", Vec::new()))
            .unwrap();
        assert!(session.search_for(&file_id).unwrap().is_some());
        session.close_file(&file_id).unwrap();
        assert!(session.search_for(&file_id).is_err());
    }

    #[test]
    fn tree_level_encryption_flag() {
        let mut session = session();
        let plain = session.connect_tree(Arc::new(SharedResource::disk("plain"))).unwrap();
        let sealed = session
            .connect_tree(Arc::new(SharedResource::encrypted_disk("sealed")))
            .unwrap();
        assert!(!session.should_encrypt(plain));
        assert!(session.should_encrypt(sealed));
    }

    #[test]
    fn close_tears_down_everything() {
        let mut session = session();
        let tree_id = session.connect_tree(Arc::new(SharedResource::disk("a"))).unwrap();
        open_in(&mut session, tree_id, "x");
        open_in(&mut session, tree_id, "y");
        session.close();
        assert_eq!(session.tree_count(), 0);
        assert_eq!(session.open_file_count(), 0);
    }
}
