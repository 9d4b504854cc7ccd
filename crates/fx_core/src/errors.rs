use thiserror::Error;

/// Input rejected before any provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be a positive number")]
    InvalidAmount,
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
    #[error("currency is not in the provider catalog: {0}")]
    UnknownCurrency(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("malformed number '{0}'")]
    MalformedNumber(String),
    #[error("expected a number at position {0}")]
    ExpectedOperand(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Debug, Error)]
pub enum FxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// Any network, status or decode failure from the rate service.
    #[error("exchange rate provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl FxError {
    pub fn provider(error: impl std::fmt::Display) -> Self {
        Self::ProviderUnavailable(error.to_string())
    }

    pub fn storage(error: impl std::fmt::Display) -> Self {
        // anyhow chains carry the file path in their context
        Self::Storage(format!("{error:#}"))
    }

    /// Stable code surfaced to the shell in invoke responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidAmount) => "invalid_amount",
            Self::Validation(ValidationError::InvalidCurrency(_)) => "invalid_currency",
            Self::Validation(ValidationError::UnknownCurrency(_)) => "unknown_currency",
            Self::Expression(_) => "invalid_expression",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Storage(_) => "storage_failure",
            Self::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T, E = FxError> = std::result::Result<T, E>;
