//! Failure classification
//!
//! Maps every failure the system can raise onto one of three actionable
//! outcomes. Classification is total: anything not explicitly mapped is
//! treated as Critical, never silently retried.

use crate::ArbitrageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Handling category for a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Expected to succeed on retry with unchanged parameters
    Transient,
    /// Informative reject; surfaced to the caller, no retry, execution continues
    Operational,
    /// The venue connection or local wallet is unusable; triggers shutdown
    Critical,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Operational => write!(f, "operational"),
            ErrorClass::Critical => write!(f, "critical"),
        }
    }
}

impl ArbitrageError {
    /// Classify this failure into its handling category
    pub fn class(&self) -> ErrorClass {
        match self {
            ArbitrageError::RpcTimeout { .. }
            | ArbitrageError::RpcConnection(_)
            | ArbitrageError::VenueBusy(_) => ErrorClass::Transient,

            ArbitrageError::Config(_)
            | ArbitrageError::InsufficientBalance { .. }
            | ArbitrageError::OrderRejected(_)
            | ArbitrageError::RpcError { .. }
            | ArbitrageError::SwapQuote(_)
            | ArbitrageError::SwapPathHalted { .. }
            | ArbitrageError::SwapRefunded { .. }
            | ArbitrageError::Wallet(_) => ErrorClass::Operational,

            ArbitrageError::Authentication(_)
            | ArbitrageError::MalformedResponse { .. }
            | ArbitrageError::Persistence(_)
            | ArbitrageError::IllegalTransition { .. }
            | ArbitrageError::RetriesExhausted { .. } => ErrorClass::Critical,
        }
    }
}

/// Classify any failure arriving at the recovery boundary.
///
/// Errors that are not an [`ArbitrageError`] have no mapping and default to
/// Critical.
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    match error.downcast_ref::<ArbitrageError>() {
        Some(err) => err.class(),
        None => ErrorClass::Critical,
    }
}

/// A classified failure with the context the retry engine needs
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Handling category
    pub class: ErrorClass,
    /// Name of the operation that failed
    pub operation: String,
    /// 1-based attempt number on which the failure occurred
    pub attempt: u32,
    /// Rendered failure message
    pub message: String,
    /// Free-form context (venue, request parameters, identifiers)
    pub context: HashMap<String, String>,
}

impl ErrorRecord {
    /// Build a record from a failure raised by `operation` on `attempt`
    pub fn new(error: &anyhow::Error, operation: &str, attempt: u32) -> Self {
        Self {
            class: classify(error),
            operation: operation.to_string(),
            attempt,
            message: error.to_string(),
            context: HashMap::new(),
        }
    }

    /// Attach a context key/value pair
    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (attempt {}): {}",
            self.class, self.operation, self.attempt, self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " | context: {:?}", self.context)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let errors = [
            ArbitrageError::RpcTimeout {
                method: "dxGetOrder".to_string(),
            },
            ArbitrageError::RpcConnection("connection refused".to_string()),
            ArbitrageError::VenueBusy("too many requests".to_string()),
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Transient, "{err}");
        }
    }

    #[test]
    fn test_operational_classification() {
        let errors = [
            ArbitrageError::InsufficientBalance {
                token: "BLOCK".to_string(),
                needed: 1.0,
                available: 0.0,
            },
            ArbitrageError::OrderRejected("already taken".to_string()),
            ArbitrageError::SwapPathHalted {
                from_chain: "LTC".to_string(),
                to_chain: "BTC".to_string(),
                reason: "trading halted".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Operational, "{err}");
        }
    }

    #[test]
    fn test_critical_classification() {
        let errors = [
            ArbitrageError::Authentication("bad rpc credentials".to_string()),
            ArbitrageError::MalformedResponse {
                method: "dxGetOrder".to_string(),
                detail: "missing status field".to_string(),
            },
            ArbitrageError::RetriesExhausted {
                operation: "order_status".to_string(),
                attempts: 3,
            },
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Critical, "{err}");
        }
    }

    #[test]
    fn test_unknown_error_defaults_to_critical() {
        let err = anyhow::anyhow!("something nobody mapped");
        assert_eq!(classify(&err), ErrorClass::Critical);
    }

    #[test]
    fn test_error_record_context() {
        let err: anyhow::Error = ArbitrageError::RpcTimeout {
            method: "dxTakeOrder".to_string(),
        }
        .into();
        let record = ErrorRecord::new(&err, "take_order", 2)
            .with_context("pair", "LTC/BTC")
            .with_context("order_id", "abc123");

        assert_eq!(record.class, ErrorClass::Transient);
        assert_eq!(record.attempt, 2);
        assert_eq!(record.context.get("pair").unwrap(), "LTC/BTC");
        assert!(record.to_string().contains("take_order"));
    }
}
