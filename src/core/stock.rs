//! Aggregate cache and stock log maintenance.
//!
//! The aggregate row is a denormalized read cache over the lots; it is only
//! ever written here (and rebuilt by [`crate::core::reconcile`]). Every cache
//! update is coupled to exactly one appended stock-log entry recording the
//! quantity before and after, so the audit trail and the cache cannot drift
//! from each other within a committed transaction.

use crate::{
    entities::{AggregateStock, EntryType, StockLog, aggregate_stock, stock_log},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{Set, prelude::*};

/// Context for one logged stock movement.
#[derive(Debug, Clone, Copy)]
pub struct Movement<'a> {
    /// Direction of the movement
    pub entry_type: EntryType,
    /// Originating trade line, when one exists
    pub line_id: Option<i64>,
    /// Who caused the movement
    pub actor: &'a str,
    /// Free-text context for auditors
    pub note: &'a str,
}

/// Retrieves a product's aggregate row, returning None if it has never moved.
pub async fn get_aggregate<C>(db: &C, product_id: i64) -> Result<Option<aggregate_stock::Model>>
where
    C: ConnectionTrait,
{
    AggregateStock::find_by_id(product_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Fetches the aggregate row for a product, inserting a zeroed row first if
/// none exists yet.
async fn ensure_aggregate<C>(db: &C, product_id: i64) -> Result<aggregate_stock::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = get_aggregate(db, product_id).await? {
        return Ok(existing);
    }

    let zeroed = aggregate_stock::ActiveModel {
        product_id: Set(product_id),
        quantity: Set(0),
        weight: Set(0.0),
        last_unit_cost: Set(0.0),
        updated_at: Set(Utc::now()),
    };
    zeroed.insert(db).await.map_err(Into::into)
}

/// Applies a signed quantity/weight delta to a product's aggregate row and
/// appends the corresponding stock-log entry.
///
/// The quantity column is updated with an atomic database-level add
/// (`quantity = quantity + delta`) rather than read-modify-write, so
/// concurrent movements inside separate transactions cannot lose updates.
/// Must be called inside the same transaction as the lot changes it mirrors.
pub async fn apply_stock_delta<C>(
    db: &C,
    product_id: i64,
    quantity_delta: i64,
    weight_delta: f64,
    movement: Movement<'_>,
) -> Result<aggregate_stock::Model>
where
    C: ConnectionTrait,
{
    use sea_orm::sea_query::Expr;

    let before = ensure_aggregate(db, product_id).await?;

    AggregateStock::update_many()
        .col_expr(
            aggregate_stock::Column::Quantity,
            Expr::col(aggregate_stock::Column::Quantity).add(quantity_delta),
        )
        .col_expr(
            aggregate_stock::Column::Weight,
            Expr::col(aggregate_stock::Column::Weight).add(weight_delta),
        )
        .col_expr(
            aggregate_stock::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(aggregate_stock::Column::ProductId.eq(product_id))
        .exec(db)
        .await?;

    let entry = stock_log::ActiveModel {
        entry_type: Set(movement.entry_type.as_str().to_string()),
        product_id: Set(product_id),
        quantity_delta: Set(quantity_delta),
        quantity_before: Set(before.quantity),
        quantity_after: Set(before.quantity + quantity_delta),
        line_id: Set(movement.line_id),
        actor: Set(movement.actor.to_string()),
        note: Set(movement.note.to_string()),
        logged_at: Set(Utc::now()),
        ..Default::default()
    };
    entry.insert(db).await?;

    ensure_aggregate(db, product_id).await
}

/// Records the unit cost of the most recent acquisition on the aggregate row.
pub async fn set_last_unit_cost<C>(db: &C, product_id: i64, unit_cost: f64) -> Result<()>
where
    C: ConnectionTrait,
{
    let current = ensure_aggregate(db, product_id).await?;
    let mut active: aggregate_stock::ActiveModel = current.into();
    active.last_unit_cost = Set(unit_cost);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}

/// Deletes the log entries that originated from a line.
///
/// The audit trail follows the line's lifecycle: this is only called as part
/// of reversing and deleting that line, never on its own.
pub async fn delete_logs_for_line<C>(db: &C, line_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = StockLog::delete_many()
        .filter(stock_log::Column::LineId.eq(line_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Retrieves the full log for a product, oldest entry first.
pub async fn get_logs_for_product<C>(db: &C, product_id: i64) -> Result<Vec<stock_log::Model>>
where
    C: ConnectionTrait,
{
    use sea_orm::QueryOrder;

    StockLog::find()
        .filter(stock_log::Column::ProductId.eq(product_id))
        .order_by_asc(stock_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
