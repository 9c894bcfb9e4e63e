// Radio stand-in: UDP towards the ground segment. Transport-level retries
// are out of scope; retries above this layer are protocol-level (missing
// acks), never socket-level.
use crate::config::Config;
use anyhow::Result;
use tokio::net::UdpSocket;

pub async fn connect(cfg: &Config) -> Result<(UdpSocket, UdpSocket)> {
    let tx = UdpSocket::bind("0.0.0.0:0").await?;
    tx.connect(&cfg.gcs_addr).await?;
    let rx = UdpSocket::bind(&cfg.bind_addr).await?;
    Ok((tx, rx))
}
