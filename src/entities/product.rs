//! Product entity - master data consumed by the ledger.
//!
//! Products are owned by an external master-data layer; the ledger only reads
//! them for existence checks and for `unit_weight` when it maintains the
//! aggregate weight alongside the aggregate quantity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Weight of a single unit, in `weight_unit`
    pub unit_weight: f64,
    /// Unit the weight is expressed in (e.g. `"kg"`)
    pub weight_unit: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A product has many acquisition lots
    #[sea_orm(has_many = "super::lot::Entity")]
    Lot,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
