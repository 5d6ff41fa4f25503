//! Engine configuration, loaded from a JSON file.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! {
//!   "optimizer": { "maxTokens": 8000, "reservedTokens": 1000 },
//!   "recovery": { "maxRetries": 5 },
//!   "storeDir": "/var/lib/weft/threads"
//! }
//! ```

use crate::context::OptimizerConfig;
use crate::error::{Result, ThreadError};
use crate::recovery::RecoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default directory for [`FileThreadStore`](crate::storage::FileThreadStore).
pub const DEFAULT_STORE_DIR: &str = ".weft/threads";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub optimizer: OptimizerConfig,
    pub recovery: RecoveryConfig,
    pub store_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            recovery: RecoveryConfig::default(),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ThreadError::Storage(format!("failed to read config {}: {e}", path.display())))?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        config.check()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that leave no room for history.
    pub fn check(&self) -> Result<()> {
        let mut problems = Vec::new();
        let opt = &self.optimizer;
        if opt.reserved_tokens >= opt.max_tokens {
            problems.push(format!(
                "optimizer.reservedTokens ({}) must be below maxTokens ({})",
                opt.reserved_tokens, opt.max_tokens
            ));
        }
        if !(0.0..=1.0).contains(&opt.token_budget_ratio) {
            problems.push(format!(
                "optimizer.tokenBudgetRatio must be within 0..=1, got {}",
                opt.token_budget_ratio
            ));
        }
        if opt.estimator.chars_per_token == 0 {
            problems.push("optimizer.estimator.charsPerToken must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ThreadError::Validation(problems))
        }
    }
}
