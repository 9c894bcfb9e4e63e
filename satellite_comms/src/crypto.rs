// src/crypto.rs — key material from config
use crate::config::Config;
use anyhow::{Result, bail};
use comm_protocol::CryptoContext;

pub fn from_config(cfg: &Config) -> Result<Option<CryptoContext>> {
    if !cfg.encrypt {
        return Ok(None);
    }
    let bytes = hex::decode(&cfg.key_hex).map_err(|e| anyhow::anyhow!("invalid key_hex: {e}"))?;
    if bytes.len() != 32 {
        bail!("key_hex must be 64 hex chars");
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(Some(CryptoContext::new(cfg.key_id, key)))
}
