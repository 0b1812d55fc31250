//! Production transformer - consumes input lots, emits one output lot.
//!
//! A production run turns quantities from one or more existing lots (raw
//! material) into a single new lot of the output product (packaged goods).
//! The consumed cost plus any additional cost (labor, packaging) is rolled
//! into the output lot's unit cost. The run, all input decrements, the output
//! lot, and the cache movements share one transaction.

use crate::{
    core::{lot, stock, trade, with_retry},
    entities::{
        EntryType, LotMatch, ProductionInput, ProductionRecord, lot_match, production_input,
        production_record,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, PaginatorTrait, Set, TransactionTrait, prelude::*};

/// Parameters for one production run.
#[derive(Debug, Clone)]
pub struct ProductionOrder {
    /// (input lot id, consumed quantity) pairs; every quantity > 0
    pub inputs: Vec<(i64, i64)>,
    /// Product the run creates
    pub output_product_id: i64,
    /// Quantity of the output lot, strictly positive
    pub output_quantity: i64,
    /// Cost added on top of the consumed inputs
    pub additional_cost: f64,
    /// The production trade line registering the output, when one exists;
    /// stamped onto the output lot so the line can be reversed later
    pub output_line_id: Option<i64>,
}

/// Result of a production run.
#[derive(Debug, Clone)]
pub struct ProductionOutcome {
    /// The persisted production record
    pub record: production_record::Model,
    /// The lot the run created
    pub output_lot: crate::entities::lot::Model,
    /// Computed unit cost of the output
    pub unit_cost: f64,
}

/// Runs a production transformation in one transaction.
///
/// Every input is consumed via the lot store; any shortage rolls the whole
/// run back. The output lot is dated today and costs
/// `(Σ input_qty × input_unit_cost + additional_cost) / output_quantity`.
///
/// # Errors
/// * `InvalidQuantity` for an empty input list, a non-positive input
///   quantity, or a non-positive output quantity
/// * `ProductNotFound` if the output product is unknown
/// * `LotNotFound` / `InsufficientLotQuantity` from the input decrements
pub async fn produce(
    db: &DatabaseConnection,
    order: &ProductionOrder,
    actor: &str,
) -> Result<ProductionOutcome> {
    with_retry(|| produce_once(db, order, actor)).await
}

async fn produce_once(
    db: &DatabaseConnection,
    order: &ProductionOrder,
    actor: &str,
) -> Result<ProductionOutcome> {
    if order.output_quantity <= 0 {
        return Err(Error::InvalidQuantity {
            quantity: order.output_quantity,
        });
    }
    if order.inputs.is_empty() {
        return Err(Error::InvalidQuantity { quantity: 0 });
    }

    let txn = db.begin().await?;

    let output_product = trade::require_product(&txn, order.output_product_id).await?;

    let mut consumed_cost = 0.0;
    let mut consumed_by_product: Vec<(i64, i64, f64)> = Vec::new();
    for &(lot_id, quantity) in &order.inputs {
        if quantity <= 0 {
            return Err(Error::InvalidQuantity { quantity });
        }
        let input = lot::require_lot(&txn, lot_id).await?;
        lot::adjust_remaining(&txn, lot_id, -quantity).await?;

        consumed_cost += quantity as f64 * input.unit_cost;
        let weight = quantity as f64 * input.unit_weight;
        match consumed_by_product
            .iter_mut()
            .find(|(product_id, ..)| *product_id == input.product_id)
        {
            Some((_, qty, wt)) => {
                *qty += quantity;
                *wt += weight;
            }
            None => consumed_by_product.push((input.product_id, quantity, weight)),
        }
    }

    let unit_cost = (consumed_cost + order.additional_cost) / order.output_quantity as f64;

    let output_lot = lot::create_lot(
        &txn,
        lot::NewLot {
            product_id: order.output_product_id,
            acquired_on: Utc::now().date_naive(),
            quantity: order.output_quantity,
            unit_cost,
            unit_weight: output_product.unit_weight,
            weight_unit: output_product.weight_unit.clone(),
            source_company_id: None,
            shipment_note: None,
            source_line_id: order.output_line_id,
        },
    )
    .await?;

    let record = production_record::ActiveModel {
        output_lot_id: Set(output_lot.id),
        additional_cost: Set(order.additional_cost),
        produced_at: Set(Utc::now()),
        actor: Set(actor.to_string()),
        ..Default::default()
    };
    let record = record.insert(&txn).await?;

    for &(lot_id, quantity) in &order.inputs {
        let input_row = production_input::ActiveModel {
            production_id: Set(record.id),
            input_lot_id: Set(lot_id),
            quantity: Set(quantity),
            ..Default::default()
        };
        input_row.insert(&txn).await?;
    }

    for &(product_id, quantity, weight) in &consumed_by_product {
        stock::apply_stock_delta(
            &txn,
            product_id,
            -quantity,
            -weight,
            stock::Movement {
                entry_type: EntryType::Out,
                line_id: order.output_line_id,
                actor,
                note: "production consumption",
            },
        )
        .await?;
    }
    stock::apply_stock_delta(
        &txn,
        order.output_product_id,
        order.output_quantity,
        order.output_quantity as f64 * output_product.unit_weight,
        stock::Movement {
            entry_type: EntryType::In,
            line_id: order.output_line_id,
            actor,
            note: "production output",
        },
    )
    .await?;
    stock::set_last_unit_cost(&txn, order.output_product_id, unit_cost).await?;

    txn.commit().await?;

    tracing::info!(
        production_id = record.id,
        output_lot_id = output_lot.id,
        unit_cost,
        "production run recorded"
    );
    Ok(ProductionOutcome {
        record,
        output_lot,
        unit_cost,
    })
}

/// Reverses a production run: restores every consumed input lot's remaining
/// quantity and deletes the output lot, the record, and its input rows.
///
/// # Errors
/// * `ProductionNotFound` if the record does not exist
/// * `LotInUse` if the output lot has already been matched to a sale
pub async fn reverse_production(
    db: &DatabaseConnection,
    production_id: i64,
    actor: &str,
) -> Result<()> {
    with_retry(|| reverse_production_once(db, production_id, actor)).await
}

async fn reverse_production_once(
    db: &DatabaseConnection,
    production_id: i64,
    actor: &str,
) -> Result<()> {
    let txn = db.begin().await?;

    let record = ProductionRecord::find_by_id(production_id)
        .one(&txn)
        .await?
        .ok_or(Error::ProductionNotFound { production_id })?;

    let match_refs = LotMatch::find()
        .filter(lot_match::Column::LotId.eq(record.output_lot_id))
        .count(&txn)
        .await?;
    if match_refs > 0 {
        return Err(Error::LotInUse {
            lot_id: record.output_lot_id,
        });
    }

    let inputs = ProductionInput::find()
        .filter(production_input::Column::ProductionId.eq(record.id))
        .all(&txn)
        .await?;

    let note = format!("reversal of production run {}", record.id);
    for input in &inputs {
        let restored = lot::adjust_remaining(&txn, input.input_lot_id, input.quantity).await?;
        stock::apply_stock_delta(
            &txn,
            restored.product_id,
            input.quantity,
            input.quantity as f64 * restored.unit_weight,
            stock::Movement {
                entry_type: EntryType::Adjust,
                line_id: None,
                actor,
                note: &note,
            },
        )
        .await?;
    }

    let output = lot::require_lot(&txn, record.output_lot_id).await?;
    let output_quantity = output.remaining_quantity;
    let output_weight = output_quantity as f64 * output.unit_weight;

    ProductionInput::delete_many()
        .filter(production_input::Column::ProductionId.eq(record.id))
        .exec(&txn)
        .await?;
    let record_id = record.id;
    let active: production_record::ActiveModel = record.into();
    active.delete(&txn).await?;
    lot::delete_lot(&txn, output.id).await?;

    stock::apply_stock_delta(
        &txn,
        output.product_id,
        -output_quantity,
        -output_weight,
        stock::Movement {
            entry_type: EntryType::Adjust,
            line_id: None,
            actor,
            note: &note,
        },
    )
    .await?;

    txn.commit().await?;

    tracing::info!(production_id = record_id, "production run reversed");
    Ok(())
}
