//Command line interface
// runtime configuration (addresses, keys, link limits, cadences)
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub gcs_addr: String,
    pub bind_addr: String,
    pub key_id: u8,
    pub key_hex: String,
    pub encrypt: bool,
    pub max_chunk: usize,
    pub queue_depth: usize,
    pub retry_ceiling: u32,
    pub poll_ms: u64,
    pub tick_ms: u64,
    pub ack_timeout_ms: u64,
    pub telemetry_ms: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1:7891")] pub gcs_addr: String,
    #[arg(long, default_value = "0.0.0.0:7890")]   pub bind_addr: String,
    #[arg(long, default_value_t = 1)]              pub key_id: u8,
    #[arg(long, default_value = "0000000000000000000000000000000000000000000000000000000000000007")]
    pub key_hex: String,
    /// Disable payload encryption (bench links and flatsat testing only).
    #[arg(long)]                                   pub plaintext: bool,
    #[arg(long, default_value_t = 1024)]           pub max_chunk: usize,
    #[arg(long, default_value_t = 32)]             pub queue_depth: usize,
    #[arg(long, default_value_t = 8)]              pub retry_ceiling: u32,
    #[arg(long, default_value_t = 100)]            pub poll_ms: u64,
    #[arg(long, default_value_t = 250)]            pub tick_ms: u64,
    #[arg(long, default_value_t = 2000)]           pub ack_timeout_ms: u64,
    #[arg(long, default_value_t = 5000)]           pub telemetry_ms: u64,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let c = <Cli as Parser>::parse();
        Ok(Config {
            gcs_addr: c.gcs_addr,
            bind_addr: c.bind_addr,
            key_id: c.key_id,
            key_hex: c.key_hex,
            encrypt: !c.plaintext,
            max_chunk: c.max_chunk,
            queue_depth: c.queue_depth,
            retry_ceiling: c.retry_ceiling,
            poll_ms: c.poll_ms,
            tick_ms: c.tick_ms,
            ack_timeout_ms: c.ack_timeout_ms,
            telemetry_ms: c.telemetry_ms,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Small fixed config for unit tests; no sockets, no encryption.
    pub fn test_default() -> Self {
        Self {
            gcs_addr: "127.0.0.1:0".into(),
            bind_addr: "127.0.0.1:0".into(),
            key_id: 1,
            key_hex: String::new(),
            encrypt: false,
            max_chunk: 100,
            queue_depth: 4,
            retry_ceiling: 3,
            poll_ms: 10,
            tick_ms: 10,
            ack_timeout_ms: 100,
            telemetry_ms: 1000,
        }
    }
}
