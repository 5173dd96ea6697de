//! Ledger configuration, read from the process environment.

use core::fmt::Display;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::Money;
use stockledger_payments::PaymentMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Runtime settings for the ledger engine and its store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Slack allowed above the pending amount when recording a payment.
    pub overpayment_tolerance: Money,
    /// Mode recorded on a sale when the request names none.
    pub default_payment_mode: PaymentMode,
    pub default_reorder_level: i64,
    pub default_max_stock: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            overpayment_tolerance: Money::ZERO,
            default_payment_mode: PaymentMode::Cash,
            default_reorder_level: 10,
            default_max_stock: 1000,
        }
    }
}

impl LedgerConfig {
    pub const DATABASE_URL: &'static str = "DATABASE_URL";
    pub const DB_MAX_CONNECTIONS: &'static str = "LEDGER_DB_MAX_CONNECTIONS";
    pub const OVERPAYMENT_TOLERANCE_CENTS: &'static str = "LEDGER_OVERPAYMENT_TOLERANCE_CENTS";
    pub const DEFAULT_PAYMENT_MODE: &'static str = "LEDGER_DEFAULT_PAYMENT_MODE";
    pub const DEFAULT_REORDER_LEVEL: &'static str = "LEDGER_LOW_STOCK_DEFAULT_REORDER_LEVEL";
    pub const DEFAULT_MAX_STOCK: &'static str = "LEDGER_DEFAULT_MAX_STOCK";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tolerance_cents: i64 = parse(&lookup, Self::OVERPAYMENT_TOLERANCE_CENTS)?
            .unwrap_or(defaults.overpayment_tolerance.cents());
        if tolerance_cents < 0 {
            return Err(invalid(Self::OVERPAYMENT_TOLERANCE_CENTS, "must not be negative"));
        }

        let config = Self {
            database_url: lookup(Self::DATABASE_URL),
            db_max_connections: parse(&lookup, Self::DB_MAX_CONNECTIONS)?
                .unwrap_or(defaults.db_max_connections),
            overpayment_tolerance: Money::from_cents(tolerance_cents),
            default_payment_mode: parse(&lookup, Self::DEFAULT_PAYMENT_MODE)?
                .unwrap_or(defaults.default_payment_mode),
            default_reorder_level: parse(&lookup, Self::DEFAULT_REORDER_LEVEL)?
                .unwrap_or(defaults.default_reorder_level),
            default_max_stock: parse(&lookup, Self::DEFAULT_MAX_STOCK)?
                .unwrap_or(defaults.default_max_stock),
        };

        if config.db_max_connections == 0 {
            return Err(invalid(Self::DB_MAX_CONNECTIONS, "must be at least 1"));
        }
        if config.default_reorder_level < 0 {
            return Err(invalid(Self::DEFAULT_REORDER_LEVEL, "must not be negative"));
        }
        if config.default_max_stock < 0 {
            return Err(invalid(Self::DEFAULT_MAX_STOCK, "must not be negative"));
        }
        Ok(config)
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid(key, format!("{raw:?}: {e}")))
        })
        .transpose()
}
