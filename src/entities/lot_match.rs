//! Lot match entity - the join between a trade line and a lot it consumed
//! (or, for returns, restored). Matched quantity is always positive; the
//! owning line's sign determines direction.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lot match database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lot_matches")]
pub struct Model {
    /// Unique identifier for the match
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The sale or return line this match belongs to
    pub line_id: i64,
    /// The lot quantity moved against
    pub lot_id: i64,
    /// Matched quantity, strictly positive
    pub quantity: i64,
    /// When the match was recorded
    pub matched_at: DateTimeUtc,
    /// Who triggered the allocation (audit attribution)
    pub actor: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each match belongs to one trade line
    #[sea_orm(
        belongs_to = "super::trade_line::Entity",
        from = "Column::LineId",
        to = "super::trade_line::Column::Id"
    )]
    TradeLine,
    /// Each match references one lot
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::LotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
}

impl Related<super::trade_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TradeLine.def()
    }
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
