//! Unified error types for the lot ledger.
//!
//! Every quantity-affecting operation returns `Result<T>`; a failed operation
//! never leaves partial state because the surrounding database transaction
//! rolls back on drop. `TransactionConflict` is the only variant callers are
//! expected to retry (see [`crate::core::with_retry`]); everything else
//! propagates uninterpreted.

use thiserror::Error;

/// All errors the ledger can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file or value problem
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of what is wrong
        message: String,
    },

    /// Underlying SeaORM/SQLx failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error (config file reads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// A quantity that must be strictly positive was zero or negative
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity {
        /// The offending quantity
        quantity: i64,
    },

    /// Referenced product does not exist in the product master
    #[error("Product {product_id} not found")]
    ProductNotFound {
        /// The missing product id
        product_id: i64,
    },

    /// Referenced lot does not exist
    #[error("Lot {lot_id} not found")]
    LotNotFound {
        /// The missing lot id
        lot_id: i64,
    },

    /// Referenced trade line does not exist
    #[error("Trade line {line_id} not found")]
    LineNotFound {
        /// The missing line id
        line_id: i64,
    },

    /// Referenced trade master does not exist
    #[error("Trade {trade_id} not found")]
    TradeNotFound {
        /// The missing trade id
        trade_id: i64,
    },

    /// Referenced production record does not exist
    #[error("Production record {production_id} not found")]
    ProductionNotFound {
        /// The missing production record id
        production_id: i64,
    },

    /// A lot adjustment would drive `remaining_quantity` below zero
    #[error("Lot {lot_id} has {remaining} remaining, {requested} requested")]
    InsufficientLotQuantity {
        /// The lot that was short
        lot_id: i64,
        /// Remaining quantity at the time of the attempt
        remaining: i64,
        /// Quantity the operation tried to consume
        requested: i64,
    },

    /// Strict allocation found less total stock than the sale requires
    #[error("Product {product_id} has {available} available, {requested} requested")]
    InsufficientStock {
        /// Product being allocated
        product_id: i64,
        /// Total remaining across available lots
        available: i64,
        /// Quantity the allocation still requires
        requested: i64,
    },

    /// Lot deletion blocked: matches or production records reference it
    #[error("Lot {lot_id} is referenced by matches or production records")]
    LotInUse {
        /// The lot that cannot be deleted
        lot_id: i64,
    },

    /// Re-allocating a line that is already fully matched
    #[error("Line {line_id} is already matched; reverse it first")]
    AlreadyMatched {
        /// The already-matched line
        line_id: i64,
    },

    /// Reversing a sale line that still has linked returns
    #[error("Line {line_id} has linked returns; reverse those first")]
    LineHasLinkedReturns {
        /// The sale line that cannot be reversed yet
        line_id: i64,
    },

    /// Return/candidate pair fails the linking preconditions
    #[error("Invalid return link: {message}")]
    InvalidReturnLink {
        /// Which precondition failed
        message: String,
    },

    /// Linking this return would push total returns past the parent sale
    #[error("Returns against line {parent_line_id} would exceed it by {excess}")]
    OverReturnDetected {
        /// The parent sale line
        parent_line_id: i64,
        /// Units by which the ceiling would be exceeded
        excess: i64,
    },

    /// Auto-link found multiple equally valid parent candidates
    #[error("Return line {return_line_id} has multiple link candidates")]
    AmbiguousReturnCandidate {
        /// The return line that needs manual resolution
        return_line_id: i64,
    },

    /// Aggregate cache disagrees with the lot ledger (advisory)
    #[error("Aggregate cache drift detected on {products} product(s)")]
    DriftDetected {
        /// Number of products whose cached quantity is wrong
        products: usize,
    },

    /// Contention retries exhausted; safe to retry the whole operation
    #[error("Transaction conflict persisted after {attempts} attempt(s)")]
    TransactionConflict {
        /// How many attempts were made before giving up
        attempts: u32,
    },
}

impl Error {
    /// Whether the error is a transient contention signal worth retrying.
    ///
    /// SQLite reports writer contention as "database is locked" / "busy";
    /// SeaORM surfaces that through `DbErr`. Anything else is permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransactionConflict { .. } => true,
            Error::Database(db_err) => {
                let text = db_err.to_string();
                text.contains("database is locked") || text.contains("database table is locked")
            }
            _ => false,
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
