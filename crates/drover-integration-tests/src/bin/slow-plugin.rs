//! Fixture plugin that never answers the handshake.

use std::time::Duration;

#[tokio::main]
async fn main() {
    tokio::time::sleep(Duration::from_secs(300)).await;
}
