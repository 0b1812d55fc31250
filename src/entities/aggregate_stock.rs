//! Aggregate stock entity - per-product running totals.
//!
//! This is a denormalized read cache, not a source of truth: it must equal
//! the sum of `remaining_quantity` across the product's non-cancelled lots
//! and is entirely rebuildable from them (see [`crate::core::reconcile`]).
//! Correctness-sensitive reads (allocation) always consult the lots directly.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Aggregate stock database model, one row per product
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "aggregate_stock")]
pub struct Model {
    /// Product this row caches totals for
    #[sea_orm(primary_key, auto_increment = false)]
    pub product_id: i64,
    /// Cached total remaining quantity
    pub quantity: i64,
    /// Cached total remaining weight
    pub weight: f64,
    /// Unit cost of the most recent acquisition
    pub last_unit_cost: f64,
    /// When this row last changed
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
