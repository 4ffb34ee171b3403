//! Settings management utilities

use crate::{ArbitrageError, Result};
use std::env;

/// Environment variable expansion utility
pub struct EnvExpander;

impl EnvExpander {
    /// Expand environment variables in a string
    /// Supports the ${VAR_NAME} pattern
    pub fn expand(input: &str) -> Result<String> {
        let mut result = input.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let var_value = env::var(var_name).map_err(|_| {
                    ArbitrageError::Config(format!(
                        "Environment variable '{}' not found",
                        var_name
                    ))
                })?;

                result.replace_range(start..start + end + 1, &var_value);
            } else {
                return Err(ArbitrageError::Config(
                    "Unclosed environment variable reference".to_string(),
                )
                .into());
            }
        }

        Ok(result)
    }

    /// Expand like [`expand`](Self::expand), substituting an empty string for
    /// unset variables. Lets a config file load before credentials exist;
    /// validation at connect time catches the empty value.
    pub fn expand_with_default(input: &str) -> Result<String> {
        let mut result = input.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let var_value = env::var(var_name).unwrap_or_default();

                result.replace_range(start..start + end + 1, &var_value);
            } else {
                return Err(ArbitrageError::Config(
                    "Unclosed environment variable reference".to_string(),
                )
                .into());
            }
        }

        Ok(result)
    }
}

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a token symbol format
    pub fn validate_symbol(symbol: &str) -> Result<()> {
        if symbol.is_empty() {
            return Err(ArbitrageError::Config("Symbol cannot be empty".to_string()).into());
        }

        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ArbitrageError::Config(
                "Symbol must contain only alphanumeric characters".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validate a percentage value (0.0 to 1.0)
    pub fn validate_percentage(value: f64, name: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ArbitrageError::Config(format!(
                "{} must be between 0.0 and 1.0",
                name
            ))
            .into());
        }
        Ok(())
    }

    /// Validate a positive value
    pub fn validate_positive(value: f64, name: &str) -> Result<()> {
        if value <= 0.0 {
            return Err(ArbitrageError::Config(format!("{} must be positive", name)).into());
        }
        Ok(())
    }

    /// Validate a URL format
    pub fn validate_url(url: &str, name: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ArbitrageError::Config(format!("{} cannot be empty", name)).into());
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ArbitrageError::Config(format!("{} must be a valid URL", name)).into());
        }

        Ok(())
    }
}
