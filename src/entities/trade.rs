//! Trade entity - the parent master for trade lines.
//!
//! Reversal logic for a line depends on its parent's `trade_type` and
//! `traded_on`, so whole-trade deletion snapshots this row before touching
//! any child state.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Trade master database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trades")]
pub struct Model {
    /// Unique identifier for the trade
    #[sea_orm(primary_key)]
    pub id: i64,
    /// `"purchase"`, `"sale"`, or `"production"`
    pub trade_type: String,
    /// Business date of the trade
    pub traded_on: Date,
    /// Counterparty company, if any
    pub company_id: Option<i64>,
    /// Who entered the trade (audit attribution)
    pub actor: String,
    /// When the trade row was created
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A trade has many lines
    #[sea_orm(has_many = "super::trade_line::Entity")]
    TradeLine,
}

impl Related<super::trade_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TradeLine.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Kind of trade, stored as a string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    /// Acquisition: each line creates a lot
    Purchase,
    /// Disposal: positive lines allocate against lots, negative lines are returns
    Sale,
    /// Transformation: the output line's lot came from consumed inputs
    Production,
}

impl TradeType {
    /// The string the column stores for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TradeType::Purchase => "purchase",
            TradeType::Sale => "sale",
            TradeType::Production => "production",
        }
    }

    /// Parses the stored column value; unknown strings yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TradeType::Purchase),
            "sale" => Some(TradeType::Sale),
            "production" => Some(TradeType::Production),
            _ => None,
        }
    }
}
