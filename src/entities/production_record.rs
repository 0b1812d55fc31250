//! Production record entity - links an output lot to the inputs it consumed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Production record database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_records")]
pub struct Model {
    /// Unique identifier for the production run
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The lot this run created
    pub output_lot_id: i64,
    /// Cost added on top of the consumed inputs (labor, packaging, ...)
    pub additional_cost: f64,
    /// When the run was recorded
    pub produced_at: DateTimeUtc,
    /// Who triggered the run
    pub actor: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The lot this run created
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::OutputLotId",
        to = "super::lot::Column::Id"
    )]
    OutputLot,
    /// The inputs this run consumed
    #[sea_orm(has_many = "super::production_input::Entity")]
    ProductionInput,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutputLot.def()
    }
}

impl Related<super::production_input::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionInput.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
