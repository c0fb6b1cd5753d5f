use std::sync::Arc;

use smb_dialog::server::{SMBServer, SMBServerConfigBuilder, SharedResource};
use smb_dialog::util::auth::plain::PlainAuthProvider;
use smb_dialog::util::auth::User;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SMBServerConfigBuilder::default()
        .bind_address("127.0.0.1:50122")
        .build()?;
    let provider = Arc::new(PlainAuthProvider::new(vec![User::new(
        "smbuser", "password",
    )]));
    let shares = [
        SharedResource::disk("public"),
        SharedResource::encrypted_disk("secure"),
    ];
    let server = SMBServer::new(config, provider, shares);
    server.run().await?;
    Ok(())
}
