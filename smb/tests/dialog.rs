//! End-to-end dialogs between the client engine and an in-process server
//! over a duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use smb_dialog::client::{ClientConfig, ClientConfigBuilder, SMBClient};
use smb_dialog::protocol::body::access_mask::AccessMask;
use smb_dialog::protocol::body::change_notify::{CompletionFilter, NotifyAction};
use smb_dialog::protocol::body::dialect::SMBDialect;
use smb_dialog::protocol::body::tree_connect::SMBShareFlags;
use smb_dialog::server::{SMBServer, SMBServerConfig, SMBServerConfigBuilder, SharedResource};
use smb_dialog::util::auth::plain::{PlainAuthMechanism, PlainAuthProvider};
use smb_dialog::util::auth::User;
use smb_dialog_core::error::SMBError;
use smb_dialog_core::nt_status::NTStatus;
use tokio::io::DuplexStream;

const PIPE_CAPACITY: usize = 1 << 20;

fn server_config() -> SMBServerConfig {
    SMBServerConfigBuilder::default().build().unwrap()
}

fn start_server(config: SMBServerConfig, shares: Vec<SharedResource>) -> DuplexStream {
    let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
    let provider = Arc::new(PlainAuthProvider::new([User::new("alice", "hunter2")]));
    let server = SMBServer::new(config, provider, shares);
    tokio::spawn(async move {
        let _ = server.serve_stream(server_side).await;
    });
    client_side
}

fn connect(config: ClientConfig, shares: Vec<SharedResource>) -> SMBClient<DuplexStream> {
    let stream = start_server(server_config(), shares);
    SMBClient::over_stream(config, stream)
}

async fn established(shares: Vec<SharedResource>) -> SMBClient<DuplexStream> {
    let client = connect(ClientConfig::default(), shares);
    client.negotiate().await.unwrap();
    let mut mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
    client.authenticate(&mut mechanism).await.unwrap();
    client
}

#[tokio::test]
async fn negotiate_picks_the_highest_common_dialect() {
    let config = SMBServerConfigBuilder::default()
        .dialects(vec![
            SMBDialect::V2_0_2,
            SMBDialect::V2_1_0,
            SMBDialect::V3_0_0,
        ])
        .build()
        .unwrap();
    let stream = start_server(config, vec![SharedResource::disk("public")]);
    let client = SMBClient::over_stream(ClientConfig::default(), stream);
    assert_eq!(client.negotiate().await.unwrap(), SMBDialect::V3_0_0);
}

#[tokio::test]
async fn authentication_completes_after_the_challenge_leg() {
    let client = connect(ClientConfig::default(), vec![SharedResource::disk("public")]);
    client.negotiate().await.unwrap();
    let mut mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
    let session_id = client.authenticate(&mut mechanism).await.unwrap();
    assert_ne!(session_id, 0);

    // signed traffic on the established session
    client.echo().await.unwrap();
    client.logoff().await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_a_logon_failure() {
    let client = connect(ClientConfig::default(), vec![SharedResource::disk("public")]);
    client.negotiate().await.unwrap();
    let mut mechanism = PlainAuthMechanism::new(User::new("alice", "letmein"));
    let err = client.authenticate(&mut mechanism).await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::LogonFailure)));
}

#[tokio::test]
async fn unknown_share_reports_bad_network_name() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let err = client.tree_connect(r"\\server\missing").await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::BadNetworkName)));
}

#[tokio::test]
async fn file_round_trip_through_a_share() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect(r"\\server\public").await.unwrap();

    let access = AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE;
    let open = tree.create_file("notes.txt", access).await.unwrap();
    let written = tree
        .write(open.file_id, 0, b"hello dialog".to_vec())
        .await
        .unwrap();
    assert_eq!(written, 12);

    let data = tree.read(open.file_id, 6, 64).await.unwrap();
    assert_eq!(data, b"dialog");

    let closed = tree.close(open.file_id).await.unwrap();
    assert_eq!(closed.end_of_file, 12);

    // the handle is gone once closed
    let err = tree.read(open.file_id, 0, 8).await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::InvalidHandle)));

    tree.disconnect().await.unwrap();
}

#[tokio::test]
async fn reading_at_end_of_file_fails() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect("public").await.unwrap();
    let open = tree
        .create_file("tiny.txt", AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE)
        .await
        .unwrap();
    tree.write(open.file_id, 0, b"ab".to_vec()).await.unwrap();
    let err = tree.read(open.file_id, 2, 8).await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::EndOfFile)));
}

#[tokio::test]
async fn directory_listing_runs_to_exhaustion() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect("public").await.unwrap();
    let access = AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE;
    for name in ["a.txt", "b.txt", "c.log"] {
        let open = tree.create_file(name, access).await.unwrap();
        tree.close(open.file_id).await.unwrap();
    }

    let root = tree.open_directory("").await.unwrap();
    let all = tree.list(root.file_id, "*").await.unwrap();
    let names: Vec<&str> = all.iter().map(|entry| entry.file_name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.log"]);

    let filtered = tree.list(root.file_id, "*.txt").await.unwrap();
    assert_eq!(filtered.len(), 2);
}

#[tokio::test]
async fn change_notify_completes_on_a_matching_change() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect("public").await.unwrap();
    let root = tree.open_directory("").await.unwrap();

    let watch = tree
        .watch(root.file_id, CompletionFilter::FILE_NAME, false)
        .await
        .unwrap();

    // the watch request is processed before this create, so the event
    // cannot be missed
    let open = tree
        .create_file("fresh.txt", AccessMask::GENERIC_WRITE)
        .await
        .unwrap();
    tree.close(open.file_id).await.unwrap();

    let changes = watch.wait().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action, NotifyAction::Added);
    assert_eq!(changes[0].file_name, "fresh.txt");
}

#[tokio::test]
async fn armed_watch_leaves_credits_for_later_requests() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect("public").await.unwrap();
    let root = tree.open_directory("").await.unwrap();

    let watch = tree
        .watch(root.file_id, CompletionFilter::FILE_NAME, false)
        .await
        .unwrap();

    // the watch must not drain the credit window before its interim
    // response replenishes it
    for _ in 0..4 {
        client.echo().await.unwrap();
    }

    watch.cancel().await.unwrap();
    let err = watch.wait().await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::Cancelled)));
}

#[tokio::test]
async fn cancelled_watch_completes_with_status_cancelled() {
    let client = established(vec![SharedResource::disk("public")]).await;
    let tree = client.tree_connect("public").await.unwrap();
    let root = tree.open_directory("").await.unwrap();

    let watch = tree
        .watch(root.file_id, CompletionFilter::FILE_NAME, false)
        .await
        .unwrap();
    watch.cancel().await.unwrap();
    let err = watch.wait().await.unwrap_err();
    assert!(matches!(err, SMBError::Response(NTStatus::Cancelled)));
}

#[tokio::test]
async fn encrypted_share_round_trip() {
    let client = established(vec![SharedResource::encrypted_disk("secure")]).await;
    let tree = client.tree_connect("secure").await.unwrap();
    assert_eq!(
        client.negotiated_dialect().unwrap(),
        SMBDialect::V3_1_1
    );

    let open = tree
        .create_file("secret.txt", AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE)
        .await
        .unwrap();
    tree.write(open.file_id, 0, b"sealed".to_vec()).await.unwrap();
    assert_eq!(tree.read(open.file_id, 0, 16).await.unwrap(), b"sealed");
    tree.close(open.file_id).await.unwrap();
}

#[tokio::test]
async fn oversized_charge_is_rejected_before_sending() {
    let config = ClientConfigBuilder::default()
        .credit_watermark(0u16)
        .build()
        .unwrap();
    let stream = start_server(server_config(), vec![SharedResource::disk("public")]);
    let client = SMBClient::over_stream(config, stream);
    client.negotiate().await.unwrap();
    let mut mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
    client.authenticate(&mut mechanism).await.unwrap();
    let tree = client.tree_connect("public").await.unwrap();
    let open = tree
        .create_file("big.bin", AccessMask::GENERIC_READ)
        .await
        .unwrap();

    // a 128 KiB read charges two credits but only one is available
    let err = tree.read(open.file_id, 0, 128 * 1024).await.unwrap_err();
    assert!(matches!(err, SMBError::FlowControl { .. }));
}

#[tokio::test]
async fn unresponsive_peer_times_out() {
    let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
    let config = ClientConfigBuilder::default()
        .response_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let client = SMBClient::over_stream(config, client_side);
    let err = client.negotiate().await.unwrap_err();
    assert!(matches!(err, SMBError::CorrelationTimeout { .. }));
    drop(server_side);
}

#[tokio::test]
async fn netbios_transport_stays_single_credit() {
    let server = SMBServerConfigBuilder::default()
        .transport(smb_dialog::socket::TransportKind::NetBios)
        .build()
        .unwrap();
    let stream = start_server(server, vec![SharedResource::disk("public")]);
    let config = ClientConfigBuilder::default()
        .transport(smb_dialog::socket::TransportKind::NetBios)
        .build()
        .unwrap();
    let client = SMBClient::over_stream(config, stream);
    client.negotiate().await.unwrap();
    let mut mechanism = PlainAuthMechanism::new(User::new("alice", "hunter2"));
    client.authenticate(&mut mechanism).await.unwrap();

    let tree = client.tree_connect("public").await.unwrap();
    let open = tree
        .create_file("framed.txt", AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE)
        .await
        .unwrap();
    let payload = vec![0x5Au8; 10 * 1024];
    tree.write(open.file_id, 0, payload.clone()).await.unwrap();
    assert_eq!(
        tree.read(open.file_id, 0, 10 * 1024).await.unwrap(),
        payload
    );
    tree.close(open.file_id).await.unwrap();
}

#[tokio::test]
async fn tree_connect_reports_encryption_flag() {
    let client = established(vec![SharedResource::encrypted_disk("secure")]).await;
    let tree = client.tree_connect("secure").await.unwrap();
    assert!(tree.share_flags().contains(SMBShareFlags::ENCRYPT_DATA));
}
