//! # SMB Dialog
//!
//! An async dialog engine for the **Server Message Block (SMB) Protocol
//! Versions 2 and 3** as specified in
//! [\[MS-SMB2\]](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-smb2/5606ad47-5ee0-437a-817e-70c366052962).
//!
//! This crate provides:
//! - **Protocol layer** ([`protocol`]): Wire-format types for SMB2/3 headers,
//!   bodies (Negotiate, Session Setup, Tree Connect, Create, Read, Write,
//!   Query Directory, Change Notify, etc.), the transform header, and credit
//!   arithmetic.
//! - **Server layer** ([`server`]): An async server engine with per-connection
//!   dialog state, session and tree tables, pluggable shares, and asynchronous
//!   change-notify completion.
//! - **Client layer** ([`client`]): A dialog core that assigns message ids,
//!   charges credits, correlates responses, and exposes file operations per
//!   connected tree.
//! - **Socket layer** ([`socket`]): NetBIOS session framing over TCP and the
//!   transport variants that share it.
//! - **Utilities** ([`util`]): The authentication seam and cryptographic
//!   primitives (SP800-108 KDF, HMAC-SHA256, AES-CMAC signing, AES-GCM
//!   sealing).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use smb_dialog::server::{SMBServer, SMBServerConfigBuilder, SharedResource};
//! use smb_dialog::util::auth::plain::PlainAuthProvider;
//! use smb_dialog::util::auth::User;
//! use smb_dialog_core::error::SMBError;
//!
//! #[tokio::main]
//! async fn main() -> smb_dialog_core::SMBResult<()> {
//!     let config = SMBServerConfigBuilder::default()
//!         .bind_address("127.0.0.1:445")
//!         .build()
//!         .map_err(|err| SMBError::server_error(err.to_string()))?;
//!     let provider = Arc::new(PlainAuthProvider::new(vec![User::new("user", "pass")]));
//!     let server = SMBServer::new(config, provider, [SharedResource::disk("public")]);
//!     server.run().await
//! }
//! ```

/// Client dialog engine: correlation, credit flow, and per-tree file access.
pub mod client;
/// SMB2/3 wire-format protocol types: headers, bodies, and credit arithmetic.
pub mod protocol;
/// SMB server engine: connections, sessions, trees, shares, and opens.
pub mod server;
/// Session framing and transport variants.
pub mod socket;
/// Authentication seam and cryptographic primitives.
pub mod util;

mod byte_helper;
