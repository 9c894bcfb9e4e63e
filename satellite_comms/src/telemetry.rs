// Telemetry producers: periodic batches pushed through the queueing entry
// point. Stands in for the power/attitude/payload subsystems that feed the
// downlink in flight.
use crate::config::Config;
use crate::core::CommCore;
use comm_protocol::{MessageTag, SensorKind, SensorReading, TelemetryBatch, encode_body};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{info, warn};

pub fn spawn_producer(cfg: Config, core: Arc<CommCore>) {
    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_millis(cfg.telemetry_ms));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut sequence = 0u64;

        loop {
            ticker.tick().await;
            if core.is_halted() {
                break;
            }
            sequence += 1;
            let batch = sample_batch(sequence);
            let body = match encode_body(&batch) {
                Ok(b) => b,
                Err(e) => {
                    warn!(%e, "telemetry encode failed");
                    continue;
                }
            };
            match core.add_message(MessageTag::TelemetryBatch, body) {
                Ok(()) => info!(sequence, readings = batch.readings.len(), "telemetry batch queued"),
                Err(e) => warn!(%e, sequence, "telemetry batch dropped"),
            }
        }
    });
}

fn sample_batch(sequence: u64) -> TelemetryBatch {
    let mut rng = rand::rng();
    let now_s = chrono::Utc::now().timestamp().max(0) as u64;
    let readings = vec![
        SensorReading {
            sensor_id: 1,
            kind: SensorKind::Thermal,
            timestamp_s: now_s,
            value: rng.random_range(-30.0..45.0),
        },
        SensorReading {
            sensor_id: 2,
            kind: SensorKind::Power,
            timestamp_s: now_s,
            value: rng.random_range(20.0..100.0),
        },
        SensorReading {
            sensor_id: 3,
            kind: SensorKind::Attitude,
            timestamp_s: now_s,
            value: rng.random_range(0.0..8.0),
        },
    ];
    TelemetryBatch { sequence, readings }
}
