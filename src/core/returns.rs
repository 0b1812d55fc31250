//! Return linker - associates return lines with the sales they reduce.
//!
//! A return is a negative-quantity line on a sale trade. Linking it to its
//! parent sale enforces the return ceiling at write time (total returns can
//! never exceed the parent's quantity) and puts the returned stock back into
//! the lots the parent consumed, so traceability survives the round trip.
//!
//! Legacy data contains unlinked returns whose stock already moved; those are
//! repaired by `repair_unlinked_returns`, which only sets the parent pointer
//! and never guesses when several parents are equally plausible.

use crate::{
    core::{lot, stock, trade, with_retry},
    entities::{
        EntryType, LotMatch, MatchingStatus, TradeLine, lot_match, trade_line,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, QueryOrder, Set, TransactionTrait, prelude::*};

/// Result of the bulk repair pass over legacy unlinked returns.
#[derive(Debug, Clone, Default)]
pub struct ReturnRepairReport {
    /// (return line, parent sale line) pairs that were linked
    pub linked: Vec<(i64, i64)>,
    /// Returns with multiple equally valid candidates, left for manual resolution
    pub ambiguous: Vec<i64>,
    /// Returns for which no candidate was found
    pub unmatched: Vec<i64>,
}

/// Sum of |quantity| over all returns linked to a sale line.
async fn linked_return_total<C>(db: &C, parent_line_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let returns = TradeLine::find()
        .filter(trade_line::Column::ParentLineId.eq(parent_line_id))
        .all(db)
        .await?;
    Ok(returns.iter().map(|r| r.quantity.abs()).sum())
}

/// Computes how far returns against a sale line exceed it.
///
/// Returns Σ|quantity| of linked returns minus the parent's quantity. A
/// positive result is an over-return anomaly to surface, never to clamp;
/// legacy data can contain these even though new links are rejected.
pub async fn compute_return_excess<C>(db: &C, sale_line_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let parent = trade::require_line(db, sale_line_id).await?;
    let total = linked_return_total(db, sale_line_id).await?;
    Ok(total - parent.quantity)
}

/// Links a return line to the sale line it reduces and restores the returned
/// quantity into the lots the parent consumed.
///
/// Restoration walks the parent's matches in match order, capped per lot by
/// the matched quantity minus what sibling returns already put back, which
/// keeps every lot's remaining at or below its original quantity. The return
/// line records its own matches against those lots so it can be reversed
/// symmetrically. Its cost basis is inherited from the parent: the return
/// reverses stock at the parent's realized cost.
///
/// # Errors
/// * `InvalidReturnLink` when the pair fails the sign/product/role checks
/// * `OverReturnDetected` when the ceiling would be exceeded
pub async fn link_return(
    db: &DatabaseConnection,
    return_line_id: i64,
    candidate_line_id: i64,
    actor: &str,
) -> Result<trade_line::Model> {
    with_retry(|| link_return_once(db, return_line_id, candidate_line_id, actor)).await
}

async fn link_return_once(
    db: &DatabaseConnection,
    return_line_id: i64,
    candidate_line_id: i64,
    actor: &str,
) -> Result<trade_line::Model> {
    let txn = db.begin().await?;

    let ret = trade::require_line(&txn, return_line_id).await?;
    let candidate = trade::require_line(&txn, candidate_line_id).await?;

    if ret.quantity >= 0 {
        return Err(Error::InvalidReturnLink {
            message: format!("line {return_line_id} is not a return (quantity must be negative)"),
        });
    }
    if ret.parent_line_id.is_some() {
        return Err(Error::InvalidReturnLink {
            message: format!("return line {return_line_id} is already linked"),
        });
    }
    if candidate.quantity <= 0 {
        return Err(Error::InvalidReturnLink {
            message: format!("candidate line {candidate_line_id} is not a positive sale line"),
        });
    }
    if candidate.parent_line_id.is_some() {
        return Err(Error::InvalidReturnLink {
            message: format!("candidate line {candidate_line_id} is itself a return"),
        });
    }
    if ret.product_id != candidate.product_id {
        return Err(Error::InvalidReturnLink {
            message: format!(
                "product mismatch: return carries {}, candidate carries {}",
                ret.product_id, candidate.product_id
            ),
        });
    }

    // Write-time ceiling: this return plus everything already linked must
    // fit inside the parent's quantity.
    let prior = linked_return_total(&txn, candidate.id).await?;
    let new_total = prior + ret.quantity.abs();
    if new_total > candidate.quantity {
        return Err(Error::OverReturnDetected {
            parent_line_id: candidate.id,
            excess: new_total - candidate.quantity,
        });
    }

    // Quantities sibling returns already restored, per lot.
    let sibling_ids: Vec<i64> = TradeLine::find()
        .filter(trade_line::Column::ParentLineId.eq(candidate.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|l| l.id)
        .collect();
    let mut already_restored = std::collections::HashMap::new();
    if !sibling_ids.is_empty() {
        let sibling_matches = LotMatch::find()
            .filter(lot_match::Column::LineId.is_in(sibling_ids))
            .all(&txn)
            .await?;
        for m in sibling_matches {
            *already_restored.entry(m.lot_id).or_insert(0) += m.quantity;
        }
    }

    let parent_matches = LotMatch::find()
        .filter(lot_match::Column::LineId.eq(candidate.id))
        .order_by_asc(lot_match::Column::Id)
        .all(&txn)
        .await?;

    let mut still_to_restore = ret.quantity.abs();
    let mut restored_total = 0;
    let mut restored_weight = 0.0;

    for parent_match in parent_matches {
        if still_to_restore == 0 {
            break;
        }
        let headroom =
            parent_match.quantity - already_restored.get(&parent_match.lot_id).copied().unwrap_or(0);
        let put_back = headroom.min(still_to_restore);
        if put_back <= 0 {
            continue;
        }

        let restored_lot = lot::adjust_remaining(&txn, parent_match.lot_id, put_back).await?;

        let entry = lot_match::ActiveModel {
            line_id: Set(ret.id),
            lot_id: Set(parent_match.lot_id),
            quantity: Set(put_back),
            matched_at: Set(Utc::now()),
            actor: Set(actor.to_string()),
            ..Default::default()
        };
        entry.insert(&txn).await?;

        restored_total += put_back;
        restored_weight += put_back as f64 * restored_lot.unit_weight;
        still_to_restore -= put_back;
    }

    let mut active: trade_line::ActiveModel = ret.into();
    active.parent_line_id = Set(Some(candidate.id));
    active.matching_status = Set(MatchingStatus::Matched.as_str().to_string());
    active.cost_basis = Set(candidate.cost_basis);
    let updated = active.update(&txn).await?;

    if restored_total > 0 {
        stock::apply_stock_delta(
            &txn,
            updated.product_id,
            restored_total,
            restored_weight,
            stock::Movement {
                entry_type: EntryType::In,
                line_id: Some(updated.id),
                actor,
                note: "customer return",
            },
        )
        .await?;
    }

    txn.commit().await?;
    Ok(updated)
}

/// Attempts to find the unique parent for a legacy unlinked return.
///
/// Candidates are positive, non-return sale lines on the same product that
/// share a matched lot with the return's existing matches (the legacy data
/// recorded the return's lots even when the parent pointer was lost). Sets
/// only the parent pointer; the stock already moved when the legacy system
/// processed the return.
///
/// # Errors
/// `AmbiguousReturnCandidate` when several parents are equally valid; this
/// repair surfaces those for manual resolution, never picks one.
pub async fn auto_link_return(
    db: &DatabaseConnection,
    return_line_id: i64,
) -> Result<Option<i64>> {
    let ret = trade::require_line(db, return_line_id).await?;
    if ret.quantity >= 0 || ret.parent_line_id.is_some() {
        return Err(Error::InvalidReturnLink {
            message: format!("line {return_line_id} is not an unlinked return"),
        });
    }

    let own_matches = LotMatch::find()
        .filter(lot_match::Column::LineId.eq(ret.id))
        .all(db)
        .await?;
    if own_matches.is_empty() {
        return Ok(None);
    }
    let lot_ids: Vec<i64> = own_matches.iter().map(|m| m.lot_id).collect();

    let sharing_matches = LotMatch::find()
        .filter(lot_match::Column::LotId.is_in(lot_ids))
        .filter(lot_match::Column::LineId.ne(ret.id))
        .all(db)
        .await?;
    let mut candidate_ids: Vec<i64> = sharing_matches.iter().map(|m| m.line_id).collect();
    candidate_ids.sort_unstable();
    candidate_ids.dedup();

    let mut candidates = Vec::new();
    for line_id in candidate_ids {
        let line = trade::require_line(db, line_id).await?;
        if line.quantity > 0 && line.parent_line_id.is_none() && line.product_id == ret.product_id
        {
            candidates.push(line);
        }
    }

    match candidates.len() {
        0 => Ok(None),
        1 => {
            let parent_id = candidates[0].id;
            let mut active: trade_line::ActiveModel = ret.into();
            active.parent_line_id = Set(Some(parent_id));
            active.update(db).await?;
            Ok(Some(parent_id))
        }
        _ => Err(Error::AmbiguousReturnCandidate { return_line_id }),
    }
}

/// Bulk repair pass over all unlinked returns.
///
/// Ambiguous returns are collected rather than linked; the totals are logged
/// so an operator can follow up.
pub async fn repair_unlinked_returns(db: &DatabaseConnection) -> Result<ReturnRepairReport> {
    let unlinked = TradeLine::find()
        .filter(trade_line::Column::Quantity.lt(0))
        .filter(trade_line::Column::ParentLineId.is_null())
        .order_by_asc(trade_line::Column::Id)
        .all(db)
        .await?;

    let mut report = ReturnRepairReport::default();
    for ret in unlinked {
        match auto_link_return(db, ret.id).await {
            Ok(Some(parent_id)) => report.linked.push((ret.id, parent_id)),
            Ok(None) => report.unmatched.push(ret.id),
            Err(Error::AmbiguousReturnCandidate { .. }) => report.ambiguous.push(ret.id),
            Err(other) => return Err(other),
        }
    }

    tracing::info!(
        linked = report.linked.len(),
        ambiguous = report.ambiguous.len(),
        unmatched = report.unmatched.len(),
        "return repair pass finished"
    );
    Ok(report)
}
