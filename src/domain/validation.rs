/// Request Validator - Input Rule Validation
///
/// Validates caller input before any state is touched, so a rejected request
/// never leaves a partial effect behind.
///
/// ## Validation Rules
/// - Deposit amount must be positive and within the configured bounds
/// - Portfolio index must reference a registered portfolio
/// - One sell percentage per protocol token, each at most 10 000 bps
/// - Weight vector length must equal the registered protocol count
/// - Registry names must not be empty
///
/// ## Usage
/// ```rust
/// use transaction_batcher::domain::validation::RequestValidator;
///
/// let validator = RequestValidator::new();
/// assert!(validator.validate_deposit(100, 1, 3).is_ok());
/// assert!(validator.validate_deposit(0, 1, 3).is_err());
/// ```

use crate::shared::protocol::{Amount, BasisPoints, BPS_DENOMINATOR};

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Deposit amount is zero or outside configured bounds
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Portfolio index does not reference a registered portfolio
    #[error("Invalid detf index: {index} (registered: {count})")]
    InvalidPortfolioIndex { index: usize, count: usize },

    /// Weight vector length differs from the protocol count
    #[error("Invalid weights length: expected {expected}, got {actual}")]
    InvalidWeightsLength { expected: usize, actual: usize },

    /// Sell percentage vector length differs from the protocol token count
    #[error("Invalid percentages length: expected {expected}, got {actual}")]
    InvalidPercentagesLength { expected: usize, actual: usize },

    /// A sell percentage exceeds 100%
    #[error("Sell percentage too large: {bps} bps for token {index}")]
    SellPercentageTooLarge { index: usize, bps: BasisPoints },

    /// Sell request would move nothing
    #[error("Sell amount is zero")]
    EmptySell,

    /// Registry name is empty
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Inbound message does not match the registered shape
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Validation bounds
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Minimum deposit (inclusive)
    pub min_deposit: Amount,

    /// Maximum deposit (inclusive)
    pub max_deposit: Amount,

    /// Maximum registry name length in bytes
    pub max_name_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_deposit: 1,
            max_deposit: Amount::MAX,
            max_name_len: 64,
        }
    }
}

/// Request validator
pub struct RequestValidator {
    config: ValidationConfig,
}

impl RequestValidator {
    /// Creates a new validator with default bounds
    pub fn new() -> Self {
        Self {
            config: ValidationConfig::default(),
        }
    }

    /// Creates a new validator with custom bounds
    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validates a deposit request
    ///
    /// # Arguments
    /// * `amount` - base asset amount to deposit
    /// * `portfolio_index` - target portfolio
    /// * `portfolio_count` - number of registered portfolios
    pub fn validate_deposit(
        &self,
        amount: Amount,
        portfolio_index: usize,
        portfolio_count: usize,
    ) -> Result<(), ValidationError> {
        if amount == 0 {
            return Err(ValidationError::InvalidAmount(
                "Amount must be greater than zero".to_string(),
            ));
        }

        if amount < self.config.min_deposit {
            return Err(ValidationError::InvalidAmount(format!(
                "Amount {} is below minimum {}",
                amount, self.config.min_deposit
            )));
        }

        if amount > self.config.max_deposit {
            return Err(ValidationError::InvalidAmount(format!(
                "Amount {} exceeds maximum {}",
                amount, self.config.max_deposit
            )));
        }

        self.validate_portfolio_index(portfolio_index, portfolio_count)
    }

    /// Validates a portfolio index
    pub fn validate_portfolio_index(
        &self,
        index: usize,
        count: usize,
    ) -> Result<(), ValidationError> {
        if index >= count {
            return Err(ValidationError::InvalidPortfolioIndex { index, count });
        }
        Ok(())
    }

    /// Validates sell percentages, one per registered protocol token
    pub fn validate_sell_percentages(
        &self,
        percentages: &[BasisPoints],
        token_count: usize,
    ) -> Result<(), ValidationError> {
        if percentages.len() != token_count {
            return Err(ValidationError::InvalidPercentagesLength {
                expected: token_count,
                actual: percentages.len(),
            });
        }

        if let Some((index, &bps)) = percentages
            .iter()
            .enumerate()
            .find(|(_, &bps)| bps > BPS_DENOMINATOR)
        {
            return Err(ValidationError::SellPercentageTooLarge { index, bps });
        }

        Ok(())
    }

    /// Validates a portfolio weight vector
    pub fn validate_weights(
        &self,
        portfolio_index: usize,
        weights: &[BasisPoints],
        portfolio_count: usize,
        protocol_count: usize,
    ) -> Result<(), ValidationError> {
        self.validate_portfolio_index(portfolio_index, portfolio_count)?;

        if weights.len() != protocol_count {
            return Err(ValidationError::InvalidWeightsLength {
                expected: protocol_count,
                actual: weights.len(),
            });
        }

        Ok(())
    }

    /// Validates a registry name
    pub fn validate_name(&self, name: &str) -> Result<(), ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidName(
                "Name cannot be empty".to_string(),
            ));
        }

        if name.len() > self.config.max_name_len {
            return Err(ValidationError::InvalidName(format!(
                "Name exceeds {} bytes",
                self.config.max_name_len
            )));
        }

        Ok(())
    }

    /// Validates that an inbound amounts vector matches the registered count
    pub fn validate_amounts_len(
        &self,
        what: &str,
        expected: usize,
        actual: usize,
    ) -> Result<(), ValidationError> {
        if expected != actual {
            return Err(ValidationError::MalformedMessage(format!(
                "{} amounts length {} does not match {} registered entries",
                what, actual, expected
            )));
        }
        Ok(())
    }
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}
