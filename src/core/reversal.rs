//! Reversal engine - undoes a line's effect on lots, cache, and log.
//!
//! Reversal runs when a line is deleted or a trade is edited (modeled as
//! delete-then-recreate). What "undo" means depends on the parent trade's
//! type, so the parent context is resolved and snapshotted *before* any child
//! state is removed and passed explicitly into the per-line reversal; a naive
//! cascade would have to re-derive it from rows it already deleted.
//!
//! Every reversal emits one ADJUST log entry carrying no line reference (the
//! originating line's own entries cascade away with it) and naming the
//! reversed line in the note.

use crate::{
    core::{lot, stock, trade, with_retry},
    entities::{
        EntryType, LotMatch, ProductionInput, ProductionRecord, TradeLine, TradeType, lot_match,
        production_input, production_record, trade_line,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, PaginatorTrait, QueryOrder, TransactionTrait, prelude::*};

/// Parent-trade fields a line reversal depends on, snapshotted before any
/// deletion happens.
#[derive(Debug, Clone, Copy)]
pub struct TradeContext {
    /// Kind of the parent trade; selects the reversal path
    pub trade_type: TradeType,
    /// Business date of the parent trade
    pub traded_on: NaiveDate,
}

/// Resolves the reversal context for a trade.
///
/// # Errors
/// `TradeNotFound` for a dangling reference; `Config` if the stored trade
/// type string is not one the engine knows.
pub async fn resolve_context<C>(db: &C, trade_id: i64) -> Result<TradeContext>
where
    C: ConnectionTrait,
{
    let parent = trade::require_trade(db, trade_id).await?;
    let trade_type = TradeType::parse(&parent.trade_type).ok_or_else(|| Error::Config {
        message: format!("trade {trade_id} has unknown type {:?}", parent.trade_type),
    })?;
    Ok(TradeContext {
        trade_type,
        traded_on: parent.traded_on,
    })
}

/// Reverses one line and deletes it, inside its own transaction.
///
/// * Purchase line: the lot it created is deleted; `LotInUse` if any match or
///   production input references it.
/// * Sale line: every matched quantity is restored to its source lot
///   (reopening depleted lots) and the matches are deleted. A sale line that
///   still has linked returns cannot be reversed (`LineHasLinkedReturns`).
/// * Return line: its restorations are re-consumed from the lots; a lot that
///   no longer has the quantity aborts the whole reversal.
/// * Production output line: the output lot must be unmatched (`LotInUse`).
///   The production record goes with the lot, but the consumed input
///   quantities stay consumed; restoring them is
///   [`crate::core::production::reverse_production`]'s job, which must run
///   instead of this reversal when the inputs should come back.
///
/// The line's own log entries are cascade-deleted with it. Runs in its own
/// transaction and is retried on transient writer contention.
pub async fn reverse_line(db: &DatabaseConnection, line_id: i64, actor: &str) -> Result<()> {
    with_retry(|| reverse_line_once(db, line_id, actor)).await
}

async fn reverse_line_once(db: &DatabaseConnection, line_id: i64, actor: &str) -> Result<()> {
    let line = trade::require_line(db, line_id).await?;
    let context = resolve_context(db, line.trade_id).await?;

    let txn = db.begin().await?;
    reverse_line_in_txn(&txn, &line, context, actor).await?;
    txn.commit().await?;

    tracing::info!(line_id, trade_type = context.trade_type.as_str(), "line reversed");
    Ok(())
}

/// Deletes a trade master and reverses all of its lines atomically: either
/// every child reverses or none does.
///
/// Context and children are snapshotted up front; return lines are reversed
/// before positive lines so a sale and its own returns can leave together.
pub async fn delete_trade(db: &DatabaseConnection, trade_id: i64, actor: &str) -> Result<()> {
    with_retry(|| delete_trade_once(db, trade_id, actor)).await
}

async fn delete_trade_once(db: &DatabaseConnection, trade_id: i64, actor: &str) -> Result<()> {
    let parent = trade::require_trade(db, trade_id).await?;
    let context = resolve_context(db, trade_id).await?;
    let mut lines = trade::get_lines_for_trade(db, trade_id).await?;
    lines.sort_by_key(|l| (l.quantity >= 0, l.id));

    let txn = db.begin().await?;
    for line in &lines {
        reverse_line_in_txn(&txn, line, context, actor).await?;
    }
    let active: crate::entities::trade::ActiveModel = parent.into();
    active.delete(&txn).await?;
    txn.commit().await?;

    tracing::info!(trade_id, line_count = lines.len(), "trade deleted");
    Ok(())
}

/// Reversal body shared by [`reverse_line`] and [`delete_trade`]; composes
/// inside the caller's transaction.
async fn reverse_line_in_txn<C>(
    txn: &C,
    line: &trade_line::Model,
    context: TradeContext,
    actor: &str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let (quantity_delta, weight_delta) = match context.trade_type {
        TradeType::Purchase => reverse_purchase_effects(txn, line).await?,
        TradeType::Sale if line.quantity < 0 => reverse_return_effects(txn, line).await?,
        TradeType::Sale => reverse_sale_effects(txn, line).await?,
        TradeType::Production => reverse_production_output_effects(txn, line).await?,
    };

    if quantity_delta != 0 {
        let note = format!(
            "reversal of {} line {}",
            context.trade_type.as_str(),
            line.id
        );
        stock::apply_stock_delta(
            txn,
            line.product_id,
            quantity_delta,
            weight_delta,
            stock::Movement {
                entry_type: EntryType::Adjust,
                line_id: None,
                actor,
                note: &note,
            },
        )
        .await?;
    }

    stock::delete_logs_for_line(txn, line.id).await?;
    let active: trade_line::ActiveModel = line.clone().into();
    active.delete(txn).await?;
    Ok(())
}

/// Deletes the lot a purchase line created, reversing its IN.
async fn reverse_purchase_effects<C>(txn: &C, line: &trade_line::Model) -> Result<(i64, f64)>
where
    C: ConnectionTrait,
{
    let Some(created) = find_lot_for_line(txn, line.id).await? else {
        // Legacy data: the line's lot is already gone, nothing to undo
        tracing::warn!(line_id = line.id, "purchase line has no lot to reverse");
        return Ok((0, 0.0));
    };

    let quantity = created.remaining_quantity;
    let weight = quantity as f64 * created.unit_weight;
    lot::delete_lot(txn, created.id).await?;
    Ok((-quantity, -weight))
}

/// Restores every matched quantity to its source lot and deletes the matches,
/// reversing the sale's OUT.
async fn reverse_sale_effects<C>(txn: &C, line: &trade_line::Model) -> Result<(i64, f64)>
where
    C: ConnectionTrait,
{
    let linked_returns = TradeLine::find()
        .filter(trade_line::Column::ParentLineId.eq(line.id))
        .count(txn)
        .await?;
    if linked_returns > 0 {
        return Err(Error::LineHasLinkedReturns { line_id: line.id });
    }

    let matches = matches_for_line(txn, line.id).await?;
    let mut restored = 0;
    let mut restored_weight = 0.0;
    for entry in &matches {
        let restored_lot = lot::adjust_remaining(txn, entry.lot_id, entry.quantity).await?;
        restored += entry.quantity;
        restored_weight += entry.quantity as f64 * restored_lot.unit_weight;
    }
    delete_matches_for_line(txn, line.id).await?;
    Ok((restored, restored_weight))
}

/// Re-consumes the quantities a return line restored and deletes its matches.
async fn reverse_return_effects<C>(txn: &C, line: &trade_line::Model) -> Result<(i64, f64)>
where
    C: ConnectionTrait,
{
    let matches = matches_for_line(txn, line.id).await?;
    let mut consumed = 0;
    let mut consumed_weight = 0.0;
    for entry in &matches {
        // InsufficientLotQuantity here aborts the whole reversal
        let consumed_lot = lot::adjust_remaining(txn, entry.lot_id, -entry.quantity).await?;
        consumed += entry.quantity;
        consumed_weight += entry.quantity as f64 * consumed_lot.unit_weight;
    }
    delete_matches_for_line(txn, line.id).await?;
    Ok((-consumed, -consumed_weight))
}

/// Deletes the output lot of a production line and its production record
/// without restoring the consumed inputs.
async fn reverse_production_output_effects<C>(
    txn: &C,
    line: &trade_line::Model,
) -> Result<(i64, f64)>
where
    C: ConnectionTrait,
{
    let Some(output) = find_lot_for_line(txn, line.id).await? else {
        tracing::warn!(line_id = line.id, "production line has no output lot to reverse");
        return Ok((0, 0.0));
    };

    let match_refs = LotMatch::find()
        .filter(lot_match::Column::LotId.eq(output.id))
        .count(txn)
        .await?;
    if match_refs > 0 {
        return Err(Error::LotInUse { lot_id: output.id });
    }

    if let Some(record) = ProductionRecord::find()
        .filter(production_record::Column::OutputLotId.eq(output.id))
        .one(txn)
        .await?
    {
        ProductionInput::delete_many()
            .filter(production_input::Column::ProductionId.eq(record.id))
            .exec(txn)
            .await?;
        let active: production_record::ActiveModel = record.into();
        active.delete(txn).await?;
    }

    let quantity = output.remaining_quantity;
    let weight = quantity as f64 * output.unit_weight;
    lot::delete_lot(txn, output.id).await?;
    Ok((-quantity, -weight))
}

/// The lot a purchase or production line registered, if it still exists.
async fn find_lot_for_line<C>(
    txn: &C,
    line_id: i64,
) -> Result<Option<crate::entities::lot::Model>>
where
    C: ConnectionTrait,
{
    crate::entities::Lot::find()
        .filter(crate::entities::LotColumn::SourceLineId.eq(line_id))
        .one(txn)
        .await
        .map_err(Into::into)
}

async fn matches_for_line<C>(txn: &C, line_id: i64) -> Result<Vec<lot_match::Model>>
where
    C: ConnectionTrait,
{
    LotMatch::find()
        .filter(lot_match::Column::LineId.eq(line_id))
        .order_by_asc(lot_match::Column::Id)
        .all(txn)
        .await
        .map_err(Into::into)
}

async fn delete_matches_for_line<C>(txn: &C, line_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    LotMatch::delete_many()
        .filter(lot_match::Column::LineId.eq(line_id))
        .exec(txn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::lot::{get_lot, require_lot};
    use crate::core::matching::{AllocationMode, allocate};
    use crate::core::production;
    use crate::core::returns::link_return;
    use crate::core::stock::{get_aggregate, get_logs_for_product};
    use crate::entities::LotStatus;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_reverse_purchase_line_deletes_lot() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let (line, created) =
            create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;

        reverse_line(&db, line.id, "test_user").await?;

        assert!(get_lot(&db, created.id).await?.is_none());
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 0);

        // The line, and its IN entry, are gone; one ADJUST entry remains
        let result = trade::require_line(&db, line.id).await;
        assert!(matches!(result.unwrap_err(), Error::LineNotFound { .. }));
        let logs = get_logs_for_product(&db, product.id).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].entry_type, EntryType::Adjust.as_str());
        assert_eq!(logs[0].quantity_delta, -100);
        assert_eq!(logs[0].line_id, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_matched_purchase_line_is_blocked() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let (purchase_line, created) =
            create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        let sale = create_sale(&db, product.id, date(2024, 2, 1), 10, 20.0).await?;
        allocate(&db, sale.id, AllocationMode::Strict, "test_user").await?;

        let result = reverse_line(&db, purchase_line.id, "test_user").await;
        assert!(matches!(result.unwrap_err(), Error::LotInUse { .. }));

        // Nothing was touched: line, lot, and cache all survive
        assert!(get_lot(&db, created.id).await?.is_some());
        trade::require_line(&db, purchase_line.id).await?;
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 90);

        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_sale_line_round_trips_lots() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let (_, lot_a) = create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        let (_, lot_b) = create_purchase(&db, product.id, date(2024, 2, 1), 50, 12.0).await?;

        let line = create_sale(&db, product.id, date(2024, 3, 1), 120, 20.0).await?;
        allocate(&db, line.id, AllocationMode::Strict, "test_user").await?;
        assert_eq!(require_lot(&db, lot_a.id).await?.remaining_quantity, 0);

        reverse_line(&db, line.id, "test_user").await?;

        // Every touched lot is back at its pre-allocation value
        let restored_a = require_lot(&db, lot_a.id).await?;
        assert_eq!(restored_a.remaining_quantity, 100);
        assert_eq!(restored_a.status, LotStatus::Available.as_str());
        assert_eq!(require_lot(&db, lot_b.id).await?.remaining_quantity, 50);

        // All matches for the line are gone
        let leftover = LotMatch::find()
            .filter(lot_match::Column::LineId.eq(line.id))
            .count(&db)
            .await?;
        assert_eq!(leftover, 0);

        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 150);

        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_sale_line_with_linked_return_is_blocked() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let sale_line = create_allocated_sale(&db, product.id, 100, 40).await?;

        let ret_trade =
            create_test_trade(&db, TradeType::Sale, date(2024, 3, 1)).await?;
        let ret = trade::create_sale_line(&db, ret_trade.id, product.id, -10, 20.0).await?;
        link_return(&db, ret.id, sale_line.id, "test_user").await?;

        let result = reverse_line(&db, sale_line.id, "test_user").await;
        assert!(matches!(
            result.unwrap_err(),
            Error::LineHasLinkedReturns { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_return_line_reconsumes_stock() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let sale_line = create_allocated_sale(&db, product.id, 100, 40).await?;

        let ret_trade =
            create_test_trade(&db, TradeType::Sale, date(2024, 3, 1)).await?;
        let ret = trade::create_sale_line(&db, ret_trade.id, product.id, -15, 20.0).await?;
        link_return(&db, ret.id, sale_line.id, "test_user").await?;
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 75);

        reverse_line(&db, ret.id, "test_user").await?;

        // The restored 15 units are consumed again
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 60);

        // And the parent sale can now be reversed
        reverse_line(&db, sale_line.id, "test_user").await?;
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 100);

        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_production_output_line_keeps_consumption() -> Result<()> {
        let (db, raw) = setup_with_product().await?;
        let packaged = create_test_product(&db, "Packaged").await?;
        let (_, input_lot) = create_purchase(&db, raw.id, date(2024, 1, 1), 50, 10.0).await?;

        let prod_trade =
            create_test_trade(&db, TradeType::Production, date(2024, 2, 1)).await?;
        let output_line =
            trade::create_sale_line(&db, prod_trade.id, packaged.id, 8, 0.0).await?;
        production::produce(
            &db,
            &production::ProductionOrder {
                inputs: vec![(input_lot.id, 5)],
                output_product_id: packaged.id,
                output_quantity: 8,
                additional_cost: 4.0,
                output_line_id: Some(output_line.id),
            },
            "test_user",
        )
        .await?;

        reverse_line(&db, output_line.id, "test_user").await?;

        // Output lot and record are gone, but the input stays consumed
        assert_eq!(get_aggregate(&db, packaged.id).await?.unwrap().quantity, 0);
        assert_eq!(require_lot(&db, input_lot.id).await?.remaining_quantity, 45);
        assert_eq!(ProductionRecord::find().count(&db).await?, 0);
        assert_eq!(ProductionInput::find().count(&db).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_trade_reverses_all_lines_atomically() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;

        let sale = create_test_trade(&db, TradeType::Sale, date(2024, 2, 1)).await?;
        let line_a = trade::create_sale_line(&db, sale.id, product.id, 30, 20.0).await?;
        allocate(&db, line_a.id, AllocationMode::Strict, "test_user").await?;
        let line_b = trade::create_sale_line(&db, sale.id, product.id, 20, 20.0).await?;
        allocate(&db, line_b.id, AllocationMode::Strict, "test_user").await?;

        delete_trade(&db, sale.id, "test_user").await?;

        assert!(trade::get_lines_for_trade(&db, sale.id).await?.is_empty());
        let result = trade::require_trade(&db, sale.id).await;
        assert!(matches!(result.unwrap_err(), Error::TradeNotFound { .. }));
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 100);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_trade_reverses_returns_before_their_sale() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;

        // Sale and its return live on the same trade; a fixed id-order
        // cascade would hit the linked-return guard
        let sale = create_test_trade(&db, TradeType::Sale, date(2024, 2, 1)).await?;
        let sale_line = trade::create_sale_line(&db, sale.id, product.id, 40, 20.0).await?;
        allocate(&db, sale_line.id, AllocationMode::Strict, "test_user").await?;
        let ret = trade::create_sale_line(&db, sale.id, product.id, -10, 20.0).await?;
        link_return(&db, ret.id, sale_line.id, "test_user").await?;

        delete_trade(&db, sale.id, "test_user").await?;
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 100);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_trade_rolls_back_when_one_line_is_blocked() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let packaged = create_test_product(&db, "Packaged").await?;
        let purchase =
            create_test_trade(&db, TradeType::Purchase, date(2024, 1, 1)).await?;
        let (_, free_lot) = trade::register_purchase_line(
            &db, purchase.id, product.id, 50, 10.0, None, "test_user",
        )
        .await?;
        let (_, used_lot) = trade::register_purchase_line(
            &db, purchase.id, product.id, 50, 11.0, None, "test_user",
        )
        .await?;

        // Consume from the second lot only: the first line reverses fine,
        // the second is blocked, so the whole trade deletion must roll back
        production::produce(
            &db,
            &production::ProductionOrder {
                inputs: vec![(used_lot.id, 5)],
                output_product_id: packaged.id,
                output_quantity: 5,
                additional_cost: 0.0,
                output_line_id: None,
            },
            "test_user",
        )
        .await?;

        let result = delete_trade(&db, purchase.id, "test_user").await;
        assert!(matches!(result.unwrap_err(), Error::LotInUse { .. }));

        trade::require_trade(&db, purchase.id).await?;
        assert!(get_lot(&db, free_lot.id).await?.is_some());
        assert!(get_lot(&db, used_lot.id).await?.is_some());
        assert_eq!(trade::get_lines_for_trade(&db, purchase.id).await?.len(), 2);
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 95);

        Ok(())
    }
}
