//! Lot store business logic - Handles all acquisition-lot operations.
//!
//! Lots are the source of truth for inventory: every purchase or production
//! output creates one, every sale allocation consumes from them, and the
//! aggregate cache is derived from their remaining quantities. Functions that
//! participate in larger transactions are generic over `ConnectionTrait` so
//! the matching, reversal, and production engines can compose them.

use crate::{
    entities::{Lot, LotMatch, LotStatus, ProductionInput, lot, lot_match, production_input},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Set, prelude::*};

/// Parameters for creating a lot.
///
/// `remaining_quantity` always starts equal to `quantity`; status starts
/// available; the display order is assigned by [`create_lot`].
#[derive(Debug, Clone)]
pub struct NewLot {
    /// Product the lot holds
    pub product_id: i64,
    /// Acquisition date (primary FIFO key)
    pub acquired_on: NaiveDate,
    /// Original quantity, strictly positive
    pub quantity: i64,
    /// Acquisition cost per unit
    pub unit_cost: f64,
    /// Weight of a single unit
    pub unit_weight: f64,
    /// Unit the weight is expressed in
    pub weight_unit: String,
    /// Company the stock came from, if known
    pub source_company_id: Option<i64>,
    /// Free-text shipment metadata
    pub shipment_note: Option<String>,
    /// The line that registered this lot
    pub source_line_id: Option<i64>,
}

/// Creates a new acquisition lot.
///
/// The display order is the current maximum plus one, giving stable
/// insertion-order FIFO tiebreaks for lots acquired on the same date.
///
/// # Errors
/// `InvalidQuantity` if the quantity is not strictly positive.
pub async fn create_lot<C>(db: &C, new: NewLot) -> Result<lot::Model>
where
    C: ConnectionTrait,
{
    if new.quantity <= 0 {
        return Err(Error::InvalidQuantity {
            quantity: new.quantity,
        });
    }

    let next_order = Lot::find()
        .order_by_desc(lot::Column::DisplayOrder)
        .one(db)
        .await?
        .map_or(1, |last| last.display_order + 1);

    let model = lot::ActiveModel {
        product_id: Set(new.product_id),
        acquired_on: Set(new.acquired_on),
        original_quantity: Set(new.quantity),
        remaining_quantity: Set(new.quantity),
        unit_cost: Set(new.unit_cost),
        unit_weight: Set(new.unit_weight),
        weight_unit: Set(new.weight_unit),
        status: Set(LotStatus::Available.as_str().to_string()),
        display_order: Set(next_order),
        source_company_id: Set(new.source_company_id),
        shipment_note: Set(new.shipment_note),
        source_line_id: Set(new.source_line_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    let result = model.insert(db).await?;
    Ok(result)
}

/// Retrieves a lot by id, returning None if it does not exist.
pub async fn get_lot<C>(db: &C, lot_id: i64) -> Result<Option<lot::Model>>
where
    C: ConnectionTrait,
{
    Lot::find_by_id(lot_id).one(db).await.map_err(Into::into)
}

/// Retrieves a lot by id or fails with `LotNotFound`.
pub async fn require_lot<C>(db: &C, lot_id: i64) -> Result<lot::Model>
where
    C: ConnectionTrait,
{
    get_lot(db, lot_id)
        .await?
        .ok_or(Error::LotNotFound { lot_id })
}

/// Retrieves the available lots for a product in stable FIFO order:
/// acquisition date ascending, then display order, then lot id.
///
/// Only lots with status available and remaining quantity above zero are
/// returned. This listing is not a reservation: allocation re-validates
/// remaining quantities inside its own transaction.
pub async fn get_available_lots<C>(db: &C, product_id: i64) -> Result<Vec<lot::Model>>
where
    C: ConnectionTrait,
{
    Lot::find()
        .filter(lot::Column::ProductId.eq(product_id))
        .filter(lot::Column::Status.eq(LotStatus::Available.as_str()))
        .filter(lot::Column::RemainingQuantity.gt(0))
        .order_by_asc(lot::Column::AcquiredOn)
        .order_by_asc(lot::Column::DisplayOrder)
        .order_by_asc(lot::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Adjusts a lot's remaining quantity by a signed delta.
///
/// Negative deltas consume, positive deltas restore. Status is recomputed:
/// a lot that hits zero becomes depleted, a depleted lot that rises above
/// zero reopens as available. A cancelled lot keeps its status regardless of
/// the delta; cancellation is never undone here.
///
/// # Errors
/// * `InsufficientLotQuantity` if the resulting remaining would be negative
/// * `InvalidQuantity` if the restoration would exceed the original quantity
pub async fn adjust_remaining<C>(db: &C, lot_id: i64, delta: i64) -> Result<lot::Model>
where
    C: ConnectionTrait,
{
    let current = require_lot(db, lot_id).await?;

    let new_remaining = current.remaining_quantity + delta;
    if new_remaining < 0 {
        return Err(Error::InsufficientLotQuantity {
            lot_id,
            remaining: current.remaining_quantity,
            requested: -delta,
        });
    }
    if new_remaining > current.original_quantity {
        return Err(Error::InvalidQuantity { quantity: delta });
    }

    let new_status = match LotStatus::parse(&current.status) {
        Some(LotStatus::Cancelled) => LotStatus::Cancelled,
        _ if new_remaining == 0 => LotStatus::Depleted,
        _ => LotStatus::Available,
    };

    let mut active: lot::ActiveModel = current.into();
    active.remaining_quantity = Set(new_remaining);
    active.status = Set(new_status.as_str().to_string());
    active.update(db).await.map_err(Into::into)
}

/// Deletes a lot.
///
/// # Errors
/// `LotInUse` if any match references the lot or any production record
/// consumed from it. A referenced lot documents history and must be reversed
/// through its owning line or production record instead.
pub async fn delete_lot<C>(db: &C, lot_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let lot = require_lot(db, lot_id).await?;

    let match_refs = LotMatch::find()
        .filter(lot_match::Column::LotId.eq(lot_id))
        .count(db)
        .await?;
    let production_refs = ProductionInput::find()
        .filter(production_input::Column::InputLotId.eq(lot_id))
        .count(db)
        .await?;

    if match_refs > 0 || production_refs > 0 {
        return Err(Error::LotInUse { lot_id });
    }

    let active: lot::ActiveModel = lot.into();
    active.delete(db).await?;
    Ok(())
}
