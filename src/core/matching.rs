//! Matching engine - allocates sale lines against acquisition lots.
//!
//! Allocation walks the product's available lots in FIFO order, consuming the
//! oldest stock first and recording one match per touched lot. The whole
//! walk, the lot decrements, the aggregate update, and the OUT log entry
//! share one transaction: a failure at any point rolls everything back.
//!
//! Strict mode is the default and rejects any allocation the stock cannot
//! fully cover. The lenient partial mode replicates legacy behavior (the
//! line is left PARTIAL with whatever matched standing) and must be asked
//! for explicitly; even then no lot ever goes below zero. A PARTIAL line may
//! be allocated again once stock arrives: the existing matches stand and
//! only the shortfall is walked, so the matched total never exceeds the
//! line's requested quantity.

use crate::{
    core::{lot, stock, trade, with_retry},
    entities::{EntryType, LotMatch, MatchingStatus, lot_match, trade_line},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, Set, TransactionTrait, prelude::*};

/// How allocation behaves when stock cannot fully cover the sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// Reject the whole operation with `InsufficientStock`; nothing changes
    #[default]
    Strict,
    /// Match what is available and leave the line PARTIAL (legacy behavior)
    AllowPartial,
}

/// Result of allocating one sale line.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// The matches created by this call, in the order lots were consumed;
    /// matches from an earlier partial allocation are not repeated here
    pub matches: Vec<lot_match::Model>,
    /// Weighted-average unit cost over the line's full matched quantity;
    /// None when nothing matched (flagged, never defaulted to zero)
    pub cost_basis: Option<f64>,
    /// Resulting matching status of the line
    pub status: MatchingStatus,
    /// Whether the line was left short of its requested quantity
    pub partial: bool,
}

/// Allocates a sale line's required quantity against available lots.
///
/// Runs in its own transaction and is retried on transient writer
/// contention. Re-allocating a PARTIAL line covers only its shortfall.
///
/// # Errors
/// * `LineNotFound` if the line does not exist
/// * `InvalidQuantity` if the line is not a positive-quantity sale line
/// * `AlreadyMatched` if the line was already fully allocated; reverse first
/// * `ProductNotFound` if the product master has no such product
/// * `InsufficientStock` in strict mode when lots cannot cover the quantity
pub async fn allocate(
    db: &DatabaseConnection,
    line_id: i64,
    mode: AllocationMode,
    actor: &str,
) -> Result<Allocation> {
    with_retry(|| allocate_once(db, line_id, mode, actor)).await
}

async fn allocate_once(
    db: &DatabaseConnection,
    line_id: i64,
    mode: AllocationMode,
    actor: &str,
) -> Result<Allocation> {
    let txn = db.begin().await?;
    let line = trade::require_line(&txn, line_id).await?;
    let allocation = allocate_line(&txn, &line, mode, actor).await?;
    txn.commit().await?;
    Ok(allocation)
}

/// Allocation body; composes inside the caller's transaction.
async fn allocate_line<C>(
    txn: &C,
    line: &trade_line::Model,
    mode: AllocationMode,
    actor: &str,
) -> Result<Allocation>
where
    C: ConnectionTrait,
{
    if line.quantity <= 0 {
        return Err(Error::InvalidQuantity {
            quantity: line.quantity,
        });
    }
    if line.matching_status == MatchingStatus::Matched.as_str() {
        return Err(Error::AlreadyMatched { line_id: line.id });
    }

    trade::require_product(txn, line.product_id).await?;

    // Matches from an earlier partial allocation stand; only the shortfall
    // is allocated, keeping the matched total at or below the requested
    // quantity. Their cost feeds the recomputed weighted average.
    let existing = LotMatch::find()
        .filter(lot_match::Column::LineId.eq(line.id))
        .all(txn)
        .await?;
    let mut already_matched = 0;
    let mut matched_cost = 0.0;
    for entry in &existing {
        let source = lot::require_lot(txn, entry.lot_id).await?;
        already_matched += entry.quantity;
        matched_cost += entry.quantity as f64 * source.unit_cost;
    }

    // The listing outside a transaction is display-only; this fetch is the
    // authoritative one because it shares the allocation's transaction.
    let lots = lot::get_available_lots(txn, line.product_id).await?;
    let requested = line.quantity - already_matched;

    if mode == AllocationMode::Strict {
        let available: i64 = lots.iter().map(|l| l.remaining_quantity).sum();
        if available < requested {
            return Err(Error::InsufficientStock {
                product_id: line.product_id,
                available,
                requested,
            });
        }
    }

    let mut still_needed = requested;
    let mut matches = Vec::new();
    let mut matched_weight = 0.0;

    for candidate in lots {
        if still_needed == 0 {
            break;
        }
        let take = candidate.remaining_quantity.min(still_needed);

        lot::adjust_remaining(txn, candidate.id, -take).await?;

        let entry = lot_match::ActiveModel {
            line_id: Set(line.id),
            lot_id: Set(candidate.id),
            quantity: Set(take),
            matched_at: Set(Utc::now()),
            actor: Set(actor.to_string()),
            ..Default::default()
        };
        matches.push(entry.insert(txn).await?);

        matched_cost += take as f64 * candidate.unit_cost;
        matched_weight += take as f64 * candidate.unit_weight;
        still_needed -= take;
    }

    let newly_matched = requested - still_needed;
    let matched_total = already_matched + newly_matched;
    let cost_basis = if matched_total > 0 {
        Some(matched_cost / matched_total as f64)
    } else {
        None
    };
    let status = if still_needed == 0 {
        MatchingStatus::Matched
    } else if matched_total > 0 {
        MatchingStatus::Partial
    } else {
        MatchingStatus::Pending
    };

    let mut active: trade_line::ActiveModel = line.clone().into();
    active.matching_status = Set(status.as_str().to_string());
    active.cost_basis = Set(cost_basis);
    active.update(txn).await?;

    if newly_matched > 0 {
        stock::apply_stock_delta(
            txn,
            line.product_id,
            -newly_matched,
            -matched_weight,
            stock::Movement {
                entry_type: EntryType::Out,
                line_id: Some(line.id),
                actor,
                note: "sale allocation",
            },
        )
        .await?;
    }

    if status == MatchingStatus::Partial {
        tracing::warn!(
            line_id = line.id,
            matched_total,
            requested = line.quantity,
            "stock shortage: sale line left partially matched"
        );
    }

    Ok(Allocation {
        matches,
        cost_basis,
        status,
        partial: status == MatchingStatus::Partial,
    })
}

/// Registers a sale line and immediately allocates it when positive, all in
/// one transaction: a failed allocation leaves no orphaned line behind.
///
/// Negative-quantity lines (returns) are registered but not allocated; they
/// stay PENDING until [`crate::core::returns::link_return`] runs.
pub async fn register_sale_line(
    db: &DatabaseConnection,
    trade_id: i64,
    product_id: i64,
    quantity: i64,
    unit_price: f64,
    mode: AllocationMode,
    actor: &str,
) -> Result<(trade_line::Model, Option<Allocation>)> {
    with_retry(|| {
        register_sale_line_once(db, trade_id, product_id, quantity, unit_price, mode, actor)
    })
    .await
}

async fn register_sale_line_once(
    db: &DatabaseConnection,
    trade_id: i64,
    product_id: i64,
    quantity: i64,
    unit_price: f64,
    mode: AllocationMode,
    actor: &str,
) -> Result<(trade_line::Model, Option<Allocation>)> {
    let txn = db.begin().await?;

    let line = trade::create_sale_line(&txn, trade_id, product_id, quantity, unit_price).await?;
    let allocation = if quantity < 0 {
        None
    } else {
        Some(allocate_line(&txn, &line, mode, actor).await?)
    };

    txn.commit().await?;

    let line = trade::require_line(db, line.id).await?;
    Ok((line, allocation))
}
