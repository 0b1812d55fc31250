//! Lot entity - one discrete acquisition of a product.
//!
//! A lot is created exactly once, when a purchase or production output
//! registers it. It is mutated only by matching, reversal, or adjustment, and
//! deleted only when nothing references it. The invariant
//! `0 <= remaining_quantity <= original_quantity` is enforced by
//! [`crate::core::lot::adjust_remaining`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lot database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lots")]
pub struct Model {
    /// Unique identifier for the lot
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Product this lot holds
    pub product_id: i64,
    /// Acquisition date (primary FIFO key)
    pub acquired_on: Date,
    /// Quantity the lot was created with; never changes afterwards
    pub original_quantity: i64,
    /// Quantity still on hand; `0 <= remaining <= original`
    pub remaining_quantity: i64,
    /// Acquisition cost per unit
    pub unit_cost: f64,
    /// Weight of a single unit, copied from the product master at creation
    pub unit_weight: f64,
    /// Unit the weight is expressed in
    pub weight_unit: String,
    /// `"available"`, `"depleted"`, or `"cancelled"`
    pub status: String,
    /// Insertion-order tiebreak for FIFO (max existing + 1 at creation)
    pub display_order: i64,
    /// Company the stock came from, if known
    pub source_company_id: Option<i64>,
    /// Free-text shipment metadata
    pub shipment_note: Option<String>,
    /// The purchase or production-output line that registered this lot
    pub source_line_id: Option<i64>,
    /// When the lot row was created
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each lot belongs to one product
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    /// Matches that consumed quantity from this lot
    #[sea_orm(has_many = "super::lot_match::Entity")]
    LotMatch,
    /// Production inputs that consumed quantity from this lot
    #[sea_orm(has_many = "super::production_input::Entity")]
    ProductionInput,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::lot_match::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LotMatch.def()
    }
}

impl Related<super::production_input::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionInput.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lot lifecycle status, stored as a string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    /// Has remaining quantity and can be allocated
    Available,
    /// Remaining quantity hit zero through matching or production
    Depleted,
    /// Taken out of circulation; never auto-reopened
    Cancelled,
}

impl LotStatus {
    /// The string the column stores for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LotStatus::Available => "available",
            LotStatus::Depleted => "depleted",
            LotStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stored column value; unknown strings yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(LotStatus::Available),
            "depleted" => Some(LotStatus::Depleted),
            "cancelled" => Some(LotStatus::Cancelled),
            _ => None,
        }
    }
}
