//! Trade line entity - a single quantity movement inside a trade.
//!
//! Quantity is signed: positive means purchase or regular sale, negative (on
//! a sale trade) means a return. Returns carry `parent_line_id` pointing at
//! the sale line they reduce.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Trade line database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trade_lines")]
pub struct Model {
    /// Unique identifier for the line
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Parent trade master
    pub trade_id: i64,
    /// Product being moved
    pub product_id: i64,
    /// Signed quantity; negative only for returns
    pub quantity: i64,
    /// Agreed price per unit
    pub unit_price: f64,
    /// For returns: the sale line this return reduces
    pub parent_line_id: Option<i64>,
    /// `"pending"`, `"partial"`, or `"matched"`
    pub matching_status: String,
    /// Realized weighted-average cost per unit; None until computable
    pub cost_basis: Option<f64>,
    /// When the line row was created
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each line belongs to one trade
    #[sea_orm(
        belongs_to = "super::trade::Entity",
        from = "Column::TradeId",
        to = "super::trade::Column::Id"
    )]
    Trade,
    /// Matches this line holds against lots
    #[sea_orm(has_many = "super::lot_match::Entity")]
    LotMatch,
}

impl Related<super::trade::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trade.def()
    }
}

impl Related<super::lot_match::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LotMatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// How much of a line's requested quantity has been allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchingStatus {
    /// Nothing allocated yet
    Pending,
    /// Some, but not all, of the quantity is allocated
    Partial,
    /// Fully allocated (purchases are implicitly matched to themselves)
    Matched,
}

impl MatchingStatus {
    /// The string the column stores for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchingStatus::Pending => "pending",
            MatchingStatus::Partial => "partial",
            MatchingStatus::Matched => "matched",
        }
    }

    /// Parses the stored column value; unknown strings yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MatchingStatus::Pending),
            "partial" => Some(MatchingStatus::Partial),
            "matched" => Some(MatchingStatus::Matched),
            _ => None,
        }
    }
}
