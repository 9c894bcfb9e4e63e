// src/main.rs
mod config;
mod core;
mod crypto;
mod errors;
mod net;
mod session;
mod telemetry;
mod timing;
mod transfer;
mod uplink;

use anyhow::Result;
use comm_protocol::{HEADER_LEN, MAX_FRAME_SIZE};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("satellite_comms=info".parse().unwrap())
                .add_directive("comm_protocol=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .compact()
        .init();

    // -------- config + crypto ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let crypto = crypto::from_config(&cfg)?;
    info!(?cfg, "satellite comm core starting");

    // -------- core + sockets ----------
    // UpdateTime lands here; a flight build would call into the RTC driver
    let set_clock = Box::new(|epoch: u64| {
        info!(epoch, "wall clock set");
    });
    let core = Arc::new(core::CommCore::new(&cfg, crypto, set_clock));
    let (tx_sock_raw, rx_sock_raw) = net::udp::connect(&cfg).await?;
    let tx_sock = Arc::new(tx_sock_raw);
    let rx_sock = Arc::new(rx_sock_raw);

    // -------- receive task: uplink bytes → dispatcher ----------
    {
        let core = core.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match rx_sock.recv_from(&mut buf).await {
                    Ok((n, _from)) => match core.uplink_handle(Instant::now(), &buf[..n]) {
                        Ok(tag) => info!(?tag, "uplink command applied"),
                        Err(e) => warn!(%e, "uplink rejected"),
                    },
                    Err(e) => warn!(%e, "uplink recv error"),
                }
            }
        });
    }

    // -------- transmit task: fixed-cadence downlink poll ----------
    {
        let core = core.clone();
        let tx_sock = tx_sock.clone();
        let ack_timeout = Duration::from_millis(cfg.ack_timeout_ms);
        let poll_ms = cfg.poll_ms;
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(poll_ms));
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            let mut frame = vec![0u8; HEADER_LEN + MAX_FRAME_SIZE];
            let mut timer = timing::AckTimer::new(ack_timeout);

            loop {
                ticker.tick().await;
                let now = Instant::now();

                // the scheduler owns the ack timeout, not the core
                if !core.is_awaiting_ack() {
                    timer.acked();
                } else if timer.expired(now) {
                    core.ack_timeout(now);
                }

                match core.get_next_frame(now, &mut frame) {
                    Ok(0) => {}
                    Ok(n) => {
                        // retransmissions restart the window too
                        if core.is_awaiting_ack() {
                            timer.frame_sent(now);
                        }
                        if let Err(e) = tx_sock.send(&frame[..n]).await {
                            warn!(%e, "downlink send error");
                        }
                    }
                    Err(e) => warn!(%e, "downlink frame error"),
                }
            }
        });
    }

    // -------- housekeeping: pass deadlines + suspend windows ----------
    {
        let core = core.clone();
        let tick_ms = cfg.tick_ms;
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(tick_ms));
            loop {
                ticker.tick().await;
                core.tick(Instant::now());
            }
        });
    }

    // -------- telemetry producers ----------
    telemetry::spawn_producer(cfg.clone(), core.clone());

    info!("comm core running. Press Ctrl+C to stop…");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting.");
    Ok(())
}
