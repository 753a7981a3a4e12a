//! Setup file
//!
//! JSON 描述两个域的初始登记：基础资产、组合权重、协议及其兑换率。
//!
//! ```json
//! {
//!   "base_asset": "USDC",
//!   "initial_balance": 1000000,
//!   "portfolios": [{ "name": "Balanced", "weights": [2000, 5000] }],
//!   "protocols": [{ "name": "Idle RA", "token": "IDLE-RA", "rate_bps": 10000 }]
//! }
//! ```

use crate::domain::validation::{RequestValidator, ValidationError};
use crate::shared::protocol::{BasisPoints, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to read setup file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse setup file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("setup needs at least one portfolio and one protocol")]
    Empty,

    #[error("protocol {name}: exchange rate must be positive")]
    ZeroRate { name: String },

    #[error("portfolio {name}: {source}")]
    Portfolio {
        name: String,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSetup {
    pub name: String,
    pub weights: Vec<BasisPoints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSetup {
    pub name: String,
    pub token: String,
    /// 每 10000 单位基础资产铸造的协议代币数量
    #[serde(default = "default_rate")]
    pub rate_bps: BasisPoints,
}

fn default_rate() -> BasisPoints {
    BPS_DENOMINATOR
}

fn default_balance() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub base_asset: String,
    /// 模拟用户的初始基础资产余额
    #[serde(default = "default_balance")]
    pub initial_balance: u64,
    pub portfolios: Vec<PortfolioSetup>,
    pub protocols: Vec<ProtocolSetup>,
}

impl Default for Setup {
    fn default() -> Self {
        let portfolio = |name: &str, weights: [BasisPoints; 2]| PortfolioSetup {
            name: name.to_string(),
            weights: weights.to_vec(),
        };
        let protocol = |name: &str, token: &str| ProtocolSetup {
            name: name.to_string(),
            token: token.to_string(),
            rate_bps: BPS_DENOMINATOR,
        };

        Self {
            base_asset: "USDC".to_string(),
            initial_balance: default_balance(),
            portfolios: vec![
                portfolio("Conservative", [1000, 2000]),
                portfolio("Balanced", [2000, 5000]),
                portfolio("Aggressive", [1000, 3000]),
            ],
            protocols: vec![
                protocol("Idle RA", "IDLE-RA"),
                protocol("Idle BY", "IDLE-BY"),
            ],
        }
    }
}

impl Setup {
    /// 读取并校验 JSON 配置文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let raw = std::fs::read_to_string(path)?;
        let setup: Setup = serde_json::from_str(&raw)?;
        setup.validate()?;
        Ok(setup)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.portfolios.is_empty() || self.protocols.is_empty() {
            return Err(SetupError::Empty);
        }

        if let Some(p) = self.protocols.iter().find(|p| p.rate_bps == 0) {
            return Err(SetupError::ZeroRate {
                name: p.name.clone(),
            });
        }

        let validator = RequestValidator::new();
        for (index, portfolio) in self.portfolios.iter().enumerate() {
            validator
                .validate_name(&portfolio.name)
                .and_then(|_| {
                    validator.validate_weights(
                        index,
                        &portfolio.weights,
                        self.portfolios.len(),
                        self.protocols.len(),
                    )
                })
                .map_err(|source| SetupError::Portfolio {
                    name: portfolio.name.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_setup_is_valid() {
        let setup = Setup::default();
        assert!(setup.validate().is_ok());
        assert_eq!(setup.portfolios.len(), 3);
        assert_eq!(setup.portfolios[1].weights, vec![2000, 5000]);
    }

    #[test]
    fn test_parse_with_defaults() {
        let json = r#"{
            "base_asset": "DAI",
            "portfolios": [{ "name": "Only", "weights": [10000] }],
            "protocols": [{ "name": "Vault", "token": "VLT" }]
        }"#;
        let setup: Setup = serde_json::from_str(json).unwrap();
        assert_eq!(setup.initial_balance, 1_000_000);
        assert_eq!(setup.protocols[0].rate_bps, BPS_DENOMINATOR);
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut setup = Setup::default();
        setup.portfolios[2].weights = vec![1000];
        assert!(matches!(
            setup.validate(),
            Err(SetupError::Portfolio {
                source: ValidationError::InvalidWeightsLength { expected: 2, actual: 1 },
                ..
            })
        ));

        // 超过 10000 bps 的权重和照常接受
        let mut setup = Setup::default();
        setup.portfolios[0].weights = vec![6000, 6000];
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_rate_and_empty() {
        let mut setup = Setup::default();
        setup.protocols[1].rate_bps = 0;
        assert!(matches!(setup.validate(), Err(SetupError::ZeroRate { .. })));

        let mut setup = Setup::default();
        setup.portfolios.clear();
        assert!(matches!(setup.validate(), Err(SetupError::Empty)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Setup::load("/nonexistent/setup.json").unwrap_err();
        assert!(matches!(err, SetupError::Io(_)));
    }
}
