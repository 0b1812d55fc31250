//! Production input entity - one (input lot, consumed quantity) pair of a
//! production run. An input lot referenced here cannot be deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Production input database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_inputs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The production run this input belongs to
    pub production_id: i64,
    /// The lot quantity was consumed from
    pub input_lot_id: i64,
    /// Consumed quantity, strictly positive
    pub quantity: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each input belongs to one production run
    #[sea_orm(
        belongs_to = "super::production_record::Entity",
        from = "Column::ProductionId",
        to = "super::production_record::Column::Id"
    )]
    ProductionRecord,
    /// The lot consumed from
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::InputLotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
}

impl Related<super::production_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionRecord.def()
    }
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
