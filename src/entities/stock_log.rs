//! Stock log entity - append-only audit trail of quantity movements.
//!
//! Entries are never mutated. They are deleted only as a cascade of deleting
//! their originating line; the audit trail follows the line's lifecycle.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock log database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_logs")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `"in"`, `"out"`, or `"adjust"`
    pub entry_type: String,
    /// Product whose aggregate quantity moved
    pub product_id: i64,
    /// Signed quantity change
    pub quantity_delta: i64,
    /// Aggregate quantity before the change
    pub quantity_before: i64,
    /// Aggregate quantity after the change
    pub quantity_after: i64,
    /// Originating trade line, when one exists
    pub line_id: Option<i64>,
    /// Who caused the movement (audit attribution)
    pub actor: String,
    /// Free-text context for auditors
    pub note: String,
    /// When the entry was appended
    pub logged_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Direction of a logged movement, stored as a string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Stock entering (purchase, production output, return receipt)
    In,
    /// Stock leaving (sale allocation, production consumption)
    Out,
    /// Correction or reversal of an earlier movement
    Adjust,
}

impl EntryType {
    /// The string the column stores for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntryType::In => "in",
            EntryType::Out => "out",
            EntryType::Adjust => "adjust",
        }
    }
}
