// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bootstrap configuration.
//!
//! Loaded from environment variables prefixed with `QUORUM_`, merged over
//! built-in defaults:
//!
//! - `QUORUM_RELEASE_TIMEOUT_MS`: bound the release-phase wait on the peer
//!   free signal. Unset preserves the historical unbounded wait.
//! - `QUORUM_ESTIMATED_NUM_EPS`: override the estimated endpoint count
//!   passed to context creation (defaults to the world size).
//! - `QUORUM_COMMS_TRACE_DIR`: directory for flushed collective traces,
//!   overriding the date-stamped default under `/tmp`.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::{CommError, Result};

pub const ENV_PREFIX: &str = "QUORUM_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommConfig {
    /// Bound on the release-phase wait, in milliseconds. `None` waits
    /// indefinitely.
    pub release_timeout_ms: Option<u64>,

    /// Estimated endpoint count handed to context creation.
    pub estimated_num_eps: Option<usize>,

    /// Output directory for collective traces.
    pub comms_trace_dir: Option<PathBuf>,
}

impl CommConfig {
    /// Load from environment variables over defaults.
    pub fn from_settings() -> Result<Self> {
        Figment::from(Serialized::defaults(CommConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| CommError::Config(e.to_string()))
    }

    pub fn release_timeout(&self) -> Option<Duration> {
        self.release_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommConfig::default();
        assert!(config.release_timeout().is_none());
        assert!(config.estimated_num_eps.is_none());
        assert!(config.comms_trace_dir.is_none());
    }

    #[test]
    fn test_release_timeout_conversion() {
        let config = CommConfig {
            release_timeout_ms: Some(1500),
            ..Default::default()
        };
        assert_eq!(config.release_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("QUORUM_RELEASE_TIMEOUT_MS", "250");
            jail.set_env("QUORUM_ESTIMATED_NUM_EPS", "16");
            let config = CommConfig::from_settings().unwrap();
            assert_eq!(config.release_timeout_ms, Some(250));
            assert_eq!(config.estimated_num_eps, Some(16));
            Ok(())
        });
    }
}
