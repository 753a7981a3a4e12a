//! Portfolio and protocol registries.
//!
//! Append-only. The root keeps weights in a `PortfolioBook`; the child only
//! needs names and protocol token ids since weights arrive with each deposit
//! response.

use crate::shared::protocol::{BasisPoints, TokenId, WeightMatrix};
use serde::{Deserialize, Serialize};

/// 投资组合（DETF）及其在各协议上的权重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub weights: Vec<BasisPoints>,
}

/// 子域登记的协议代币
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolToken {
    pub name: String,
    pub token: TokenId,
}

/// Root-side weight configuration.
///
/// Every portfolio always carries exactly one weight per registered protocol:
/// new portfolios start at zero weights, and registering a protocol appends a
/// zero weight to every portfolio.
#[derive(Debug, Clone, Default)]
pub struct PortfolioBook {
    portfolios: Vec<Portfolio>,
    protocol_count: usize,
}

impl PortfolioBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_portfolio(&mut self, name: impl Into<String>) -> usize {
        self.portfolios.push(Portfolio {
            name: name.into(),
            weights: vec![0; self.protocol_count],
        });
        self.portfolios.len() - 1
    }

    /// Registers one more protocol column. Returns the new protocol index.
    pub fn add_protocol_column(&mut self) -> usize {
        for portfolio in &mut self.portfolios {
            portfolio.weights.push(0);
        }
        self.protocol_count += 1;
        self.protocol_count - 1
    }

    /// Replaces a portfolio's weights. Index and length are validated by the caller.
    pub(crate) fn set_weights(&mut self, index: usize, weights: Vec<BasisPoints>) {
        debug_assert_eq!(weights.len(), self.protocol_count);
        self.portfolios[index].weights = weights;
    }

    pub fn portfolio_count(&self) -> usize {
        self.portfolios.len()
    }

    pub fn protocol_count(&self) -> usize {
        self.protocol_count
    }

    pub fn portfolios(&self) -> &[Portfolio] {
        &self.portfolios
    }

    pub fn weight_matrix(&self) -> WeightMatrix {
        self.portfolios.iter().map(|p| p.weights.clone()).collect()
    }
}

/// Child-side registry: portfolio names and protocol tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    portfolios: Vec<String>,
    tokens: Vec<ProtocolToken>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_portfolio(&mut self, name: impl Into<String>) -> usize {
        self.portfolios.push(name.into());
        self.portfolios.len() - 1
    }

    pub fn add_token(&mut self, name: impl Into<String>, token: TokenId) -> usize {
        self.tokens.push(ProtocolToken {
            name: name.into(),
            token,
        });
        self.tokens.len() - 1
    }

    pub fn portfolios(&self) -> &[String] {
        &self.portfolios
    }

    pub fn tokens(&self) -> &[ProtocolToken] {
        &self.tokens
    }

    pub fn portfolio_count(&self) -> usize {
        self.portfolios.len()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
