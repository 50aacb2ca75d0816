//! Daemon configuration.
//!
//! Loaded from TOML; unknown keys are rejected at startup so typos fail
//! loudly instead of silently running with defaults.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::args::Args;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Bitcoin node RPC endpoint.
    pub chain_rpc_endpoint: String,
    pub chain_rpc_user: String,
    pub chain_rpc_pass: String,

    /// Event broker push endpoint.
    pub broker_endpoint: String,

    /// Directory holding the indexer database.
    pub db_path: PathBuf,

    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,

    /// Versioned staking parameters (JSON).
    pub params_file_path: PathBuf,

    /// Operator-forced backfill height.
    pub start_height_override: Option<u64>,
}

impl Config {
    pub(crate) fn load(args: &Args) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("config {} unreadable: {e}", args.config.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("config {} invalid: {e}", args.config.display()))?;

        if let Some(datadir) = &args.datadir {
            config.db_path = datadir.clone();
        }
        if let Some(params) = &args.params {
            config.params_file_path = params.clone();
        }
        if let Some(start_height) = args.start_height {
            config.start_height_override = Some(start_height);
        }

        Ok(config)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        chain_rpc_endpoint = "http://127.0.0.1:18443"
        chain_rpc_user = "rpcuser"
        chain_rpc_pass = "rpcpass"
        broker_endpoint = "http://127.0.0.1:8080"
        db_path = "/var/lib/stakeidx"
        poll_interval_ms = 5000
        shutdown_timeout_ms = 10000
        params_file_path = "params.json"
    "#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(5000));
        assert!(config.start_height_override.is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw = format!("{SAMPLE}\nnot_a_key = 1\n");
        assert!(toml::from_str::<Config>(&raw).is_err());
    }
}
