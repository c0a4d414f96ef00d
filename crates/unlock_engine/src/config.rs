use std::collections::HashSet;

use core_types::{Address, PuzzleDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MINT: &str = "8YTwudT2oTGQHK6Kv1MZcpbuFYu12iYMDbSKcpREpump";
pub const DEFAULT_MINIMUM_BALANCE: f64 = 100_000.0;
/// The unlock progress bar reads 100% at this market cap.
pub const DEFAULT_PROGRESS_TARGET_USD: f64 = 500_000.0;

const DEFAULT_LADDER_USD: [f64; 8] = [
    10_000.0,
    25_000.0,
    50_000.0,
    100_000.0,
    250_000.0,
    500_000.0,
    750_000.0,
    1_000_000.0,
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("puzzle id must be >= 1")]
    ZeroPuzzleId,
    #[error("duplicate puzzle id {0}")]
    DuplicatePuzzleId(u32),
    #[error("puzzle {id} has invalid unlock threshold {value}")]
    InvalidThreshold { id: u32, value: f64 },
    #[error("minimum required balance {0} must be finite and >= 0")]
    InvalidMinimumBalance(f64),
    #[error("progress target {0} must be finite and > 0")]
    InvalidProgressTarget(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub mint: Address,
    pub minimum_required_balance: f64,
    pub puzzles: Vec<PuzzleDescriptor>,
    pub progress_target_usd: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mint: Address::from_static(DEFAULT_MINT),
            minimum_required_balance: DEFAULT_MINIMUM_BALANCE,
            puzzles: default_ladder(),
            progress_target_usd: DEFAULT_PROGRESS_TARGET_USD,
        }
    }
}

pub fn default_ladder() -> Vec<PuzzleDescriptor> {
    DEFAULT_LADDER_USD
        .iter()
        .enumerate()
        .map(|(i, cap)| PuzzleDescriptor {
            id: i as u32 + 1,
            unlock_threshold_usd: *cap,
        })
        .collect()
}

impl GateConfig {
    /// Hard errors reject the config; the returned strings are warnings the
    /// caller should log.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if !self.minimum_required_balance.is_finite() || self.minimum_required_balance < 0.0 {
            return Err(ConfigError::InvalidMinimumBalance(
                self.minimum_required_balance,
            ));
        }
        if !self.progress_target_usd.is_finite() || self.progress_target_usd <= 0.0 {
            return Err(ConfigError::InvalidProgressTarget(self.progress_target_usd));
        }

        let mut seen = HashSet::with_capacity(self.puzzles.len());
        for p in &self.puzzles {
            if p.id == 0 {
                return Err(ConfigError::ZeroPuzzleId);
            }
            if !seen.insert(p.id) {
                return Err(ConfigError::DuplicatePuzzleId(p.id));
            }
            if !p.unlock_threshold_usd.is_finite() || p.unlock_threshold_usd <= 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    id: p.id,
                    value: p.unlock_threshold_usd,
                });
            }
        }

        let mut warnings = Vec::new();
        if self.puzzles.is_empty() {
            warnings.push("puzzle ladder is empty; nothing can unlock".to_string());
        }
        let ladder = self.sorted_ladder();
        for pair in ladder.windows(2) {
            if pair[1].unlock_threshold_usd < pair[0].unlock_threshold_usd {
                warnings.push(format!(
                    "puzzle {} threshold {} is below puzzle {} threshold {}",
                    pair[1].id,
                    pair[1].unlock_threshold_usd,
                    pair[0].id,
                    pair[0].unlock_threshold_usd
                ));
            }
        }
        Ok(warnings)
    }

    pub fn sorted_ladder(&self) -> Vec<PuzzleDescriptor> {
        let mut ladder = self.puzzles.clone();
        ladder.sort_by_key(|p| p.id);
        ladder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_monotone() {
        let cfg = GateConfig::default();
        assert_eq!(Address::parse(DEFAULT_MINT).ok(), Some(cfg.mint.clone()));
        let warnings = cfg.validate().expect("valid");
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(cfg.puzzles.len(), 8);
        assert_eq!(cfg.puzzles[0].id, 1);
        assert_eq!(cfg.puzzles[7].unlock_threshold_usd, 1_000_000.0);
    }

    #[test]
    fn duplicate_and_zero_ids_are_rejected() {
        let mut cfg = GateConfig::default();
        cfg.puzzles.push(PuzzleDescriptor {
            id: 3,
            unlock_threshold_usd: 5.0,
        });
        assert_eq!(cfg.validate(), Err(ConfigError::DuplicatePuzzleId(3)));

        cfg.puzzles = vec![PuzzleDescriptor {
            id: 0,
            unlock_threshold_usd: 5.0,
        }];
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPuzzleId));
    }

    #[test]
    fn non_positive_threshold_is_rejected() {
        let cfg = GateConfig {
            puzzles: vec![PuzzleDescriptor {
                id: 1,
                unlock_threshold_usd: 0.0,
            }],
            ..GateConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidThreshold { id: 1, .. })
        ));
    }

    #[test]
    fn out_of_order_ladder_only_warns() {
        let cfg = GateConfig {
            puzzles: vec![
                PuzzleDescriptor {
                    id: 2,
                    unlock_threshold_usd: 5_000.0,
                },
                PuzzleDescriptor {
                    id: 1,
                    unlock_threshold_usd: 10_000.0,
                },
            ],
            ..GateConfig::default()
        };
        let warnings = cfg.validate().expect("tolerated");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("puzzle 2"));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: GateConfig = toml::from_str("minimum_required_balance = 5.0").expect("parse");
        assert_eq!(cfg.minimum_required_balance, 5.0);
        assert_eq!(cfg.puzzles, default_ladder());
    }
}
