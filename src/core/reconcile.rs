//! Reconciliation job - detects and repairs aggregate-cache drift.
//!
//! The aggregate rows are a cache over the lot ledger; the ledger is the
//! truth. `reconcile` recomputes what every cached quantity should be and
//! reports mismatches without touching anything. `repair` rebuilds the cache
//! from the lot sums in one write transaction (`SQLite` gives a write
//! transaction the exclusive writer role, so no allocation can read a
//! half-rebuilt cache) and is safe to run repeatedly. It is a recovery path,
//! not a fix for whatever desynchronized the cache in the first place.

use crate::{
    core::with_retry,
    entities::{AggregateStock, EntryType, Lot, LotStatus, aggregate_stock, lot, stock_log},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, QueryOrder, Set, TransactionTrait, prelude::*};

/// One product whose cached quantity disagrees with the lot ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftEntry {
    /// The product that drifted
    pub product_id: i64,
    /// Quantity the aggregate cache holds
    pub cached: i64,
    /// Quantity the lot ledger says it should hold
    pub expected: i64,
    /// `expected - cached`
    pub delta: i64,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    /// Products whose cache disagrees with the ledger
    pub entries: Vec<DriftEntry>,
    /// How many products were compared
    pub products_checked: usize,
}

impl DriftReport {
    /// Whether the cache agreed with the ledger everywhere.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Products in scope: the union of everything seen in lots and in aggregate
/// rows, or just the requested one.
async fn products_in_scope<C>(db: &C, product: Option<i64>) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    if let Some(product_id) = product {
        return Ok(vec![product_id]);
    }

    let mut ids: Vec<i64> = Lot::find()
        .all(db)
        .await?
        .into_iter()
        .map(|l| l.product_id)
        .collect();
    ids.extend(
        AggregateStock::find()
            .all(db)
            .await?
            .into_iter()
            .map(|a| a.product_id),
    );
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Sum of remaining quantity and weight over a product's non-cancelled lots.
async fn expected_totals<C>(db: &C, product_id: i64) -> Result<(i64, f64)>
where
    C: ConnectionTrait,
{
    let lots = Lot::find()
        .filter(lot::Column::ProductId.eq(product_id))
        .filter(lot::Column::Status.ne(LotStatus::Cancelled.as_str()))
        .all(db)
        .await?;

    let quantity = lots.iter().map(|l| l.remaining_quantity).sum();
    let weight = lots
        .iter()
        .map(|l| l.remaining_quantity as f64 * l.unit_weight)
        .sum();
    Ok((quantity, weight))
}

/// Compares the aggregate cache against the lot ledger.
///
/// Read-only: drift is reported (and logged at warn level), never corrected
/// here. Pass a product id to limit the scope.
pub async fn reconcile(db: &DatabaseConnection, product: Option<i64>) -> Result<DriftReport> {
    let scope = products_in_scope(db, product).await?;

    let mut report = DriftReport {
        products_checked: scope.len(),
        ..DriftReport::default()
    };
    for product_id in scope {
        let (expected, _) = expected_totals(db, product_id).await?;
        let cached = crate::core::stock::get_aggregate(db, product_id)
            .await?
            .map_or(0, |a| a.quantity);

        if cached != expected {
            tracing::warn!(
                product_id,
                cached,
                expected,
                delta = expected - cached,
                "aggregate cache drift"
            );
            report.entries.push(DriftEntry {
                product_id,
                cached,
                expected,
                delta: expected - cached,
            });
        }
    }

    Ok(report)
}

/// Startup check: fails with `DriftDetected` if any product drifted.
///
/// # Errors
/// `DriftDetected` with the number of drifted products.
pub async fn verify(db: &DatabaseConnection) -> Result<()> {
    let report = reconcile(db, None).await?;
    if report.is_clean() {
        Ok(())
    } else {
        Err(Error::DriftDetected {
            products: report.entries.len(),
        })
    }
}

/// Rebuilds the aggregate cache from the lot ledger.
///
/// One write transaction covers the whole rebuild: each in-scope row is reset
/// to the lot sums (quantity, weight) and the newest non-cancelled lot's unit
/// cost. Each drifted product gets one ADJUST log entry recording the
/// correction. Idempotent: running it again right away finds nothing to fix
/// and writes nothing.
pub async fn repair(
    db: &DatabaseConnection,
    product: Option<i64>,
    actor: &str,
) -> Result<DriftReport> {
    with_retry(|| repair_once(db, product, actor)).await
}

async fn repair_once(
    db: &DatabaseConnection,
    product: Option<i64>,
    actor: &str,
) -> Result<DriftReport> {
    let txn = db.begin().await?;

    let scope = products_in_scope(&txn, product).await?;
    let mut report = DriftReport {
        products_checked: scope.len(),
        ..DriftReport::default()
    };

    for product_id in scope {
        let (expected, expected_weight) = expected_totals(&txn, product_id).await?;
        let current = crate::core::stock::get_aggregate(&txn, product_id).await?;
        let cached = current.as_ref().map_or(0, |a| a.quantity);

        if cached == expected {
            continue;
        }
        report.entries.push(DriftEntry {
            product_id,
            cached,
            expected,
            delta: expected - cached,
        });

        let last_unit_cost = newest_lot_cost(&txn, product_id)
            .await?
            .or(current.as_ref().map(|a| a.last_unit_cost))
            .unwrap_or(0.0);

        let rebuilt = aggregate_stock::ActiveModel {
            product_id: Set(product_id),
            quantity: Set(expected),
            weight: Set(expected_weight),
            last_unit_cost: Set(last_unit_cost),
            updated_at: Set(Utc::now()),
        };
        match current {
            Some(_) => {
                rebuilt.update(&txn).await?;
            }
            None => {
                rebuilt.insert(&txn).await?;
            }
        }

        let entry = stock_log::ActiveModel {
            entry_type: Set(EntryType::Adjust.as_str().to_string()),
            product_id: Set(product_id),
            quantity_delta: Set(expected - cached),
            quantity_before: Set(cached),
            quantity_after: Set(expected),
            line_id: Set(None),
            actor: Set(actor.to_string()),
            note: Set("reconciliation repair".to_string()),
            logged_at: Set(Utc::now()),
            ..Default::default()
        };
        entry.insert(&txn).await?;
    }

    txn.commit().await?;

    if report.is_clean() {
        tracing::info!(products = report.products_checked, "cache already consistent");
    } else {
        tracing::info!(repaired = report.entries.len(), "aggregate cache rebuilt");
    }
    Ok(report)
}

/// Unit cost of the newest non-cancelled lot, if the product has any.
async fn newest_lot_cost<C>(db: &C, product_id: i64) -> Result<Option<f64>>
where
    C: ConnectionTrait,
{
    let newest = Lot::find()
        .filter(lot::Column::ProductId.eq(product_id))
        .filter(lot::Column::Status.ne(LotStatus::Cancelled.as_str()))
        .order_by_desc(lot::Column::AcquiredOn)
        .order_by_desc(lot::Column::Id)
        .one(db)
        .await?;
    Ok(newest.map(|l| l.unit_cost))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::matching::{AllocationMode, allocate};
    use crate::core::returns::link_return;
    use crate::core::reversal::reverse_line;
    use crate::core::stock::get_aggregate;
    use crate::core::trade;
    use crate::entities::TradeType;
    use crate::test_utils::*;

    /// Forces a wrong cached quantity, simulating the bugs repair exists for.
    async fn corrupt_cache(db: &DatabaseConnection, product_id: i64, quantity: i64) -> Result<()> {
        let current = get_aggregate(db, product_id).await?.unwrap();
        let mut active: aggregate_stock::ActiveModel = current.into();
        active.quantity = Set(quantity);
        active.update(db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_conservation_after_mixed_operations() -> Result<()> {
        // Purchases, a sale, a return, and a reversal; the cache must still
        // equal the lot sums without any repair
        let (db, product) = setup_with_product().await?;
        create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        create_purchase(&db, product.id, date(2024, 1, 10), 50, 12.0).await?;

        let sale = create_sale(&db, product.id, date(2024, 2, 1), 120, 20.0).await?;
        allocate(&db, sale.id, AllocationMode::Strict, "test_user").await?;
        let sale = trade::require_line(&db, sale.id).await?;

        let ret_trade = create_test_trade(&db, TradeType::Sale, date(2024, 2, 10)).await?;
        let ret = trade::create_sale_line(&db, ret_trade.id, product.id, -15, 20.0).await?;
        link_return(&db, ret.id, sale.id, "test_user").await?;

        let second = create_sale(&db, product.id, date(2024, 3, 1), 20, 20.0).await?;
        allocate(&db, second.id, AllocationMode::Strict, "test_user").await?;
        reverse_line(&db, second.id, "test_user").await?;

        let report = reconcile(&db, None).await?;
        assert!(report.is_clean());
        assert_eq!(report.products_checked, 1);
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 45);

        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_reports_drift_without_fixing() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        corrupt_cache(&db, product.id, 80).await?;

        let report = reconcile(&db, Some(product.id)).await?;
        assert_eq!(
            report.entries,
            vec![DriftEntry {
                product_id: product.id,
                cached: 80,
                expected: 100,
                delta: 20,
            }]
        );

        // Still wrong: reconcile never repairs
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 80);
        let result = verify(&db).await;
        assert!(matches!(result.unwrap_err(), Error::DriftDetected { products: 1 }));

        Ok(())
    }

    #[tokio::test]
    async fn test_repair_rebuilds_and_is_idempotent() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        create_purchase(&db, product.id, date(2024, 2, 1), 50, 12.0).await?;
        corrupt_cache(&db, product.id, 7).await?;

        let first = repair(&db, None, "test_user").await?;
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].delta, 143);

        let rebuilt = get_aggregate(&db, product.id).await?.unwrap();
        assert_eq!(rebuilt.quantity, 150);
        assert_eq!(rebuilt.weight, 150.0);
        assert_eq!(rebuilt.last_unit_cost, 12.0);

        // Second run finds nothing and changes nothing
        let second = repair(&db, None, "test_user").await?;
        assert!(second.is_clean());
        let unchanged = get_aggregate(&db, product.id).await?.unwrap();
        assert_eq!(unchanged.quantity, rebuilt.quantity);
        assert_eq!(unchanged.weight, rebuilt.weight);
        assert_eq!(unchanged.last_unit_cost, rebuilt.last_unit_cost);

        verify(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_repair_excludes_cancelled_lots() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        let (_, keep) = create_purchase(&db, product.id, date(2024, 1, 1), 100, 10.0).await?;
        let (_, cancel) = create_purchase(&db, product.id, date(2024, 2, 1), 50, 12.0).await?;

        let mut active: lot::ActiveModel =
            crate::core::lot::require_lot(&db, cancel.id).await?.into();
        active.status = Set(crate::entities::LotStatus::Cancelled.as_str().to_string());
        active.update(&db).await?;

        // Cancelling out of band leaves the cache at 150; repair pulls it
        // down to the 100 still in circulation
        let report = repair(&db, Some(product.id), "test_user").await?;
        assert_eq!(report.entries[0].expected, 100);
        assert_eq!(get_aggregate(&db, product.id).await?.unwrap().quantity, 100);
        assert_eq!(
            crate::core::lot::require_lot(&db, keep.id).await?.remaining_quantity,
            100
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_repair_creates_missing_aggregate_row() -> Result<()> {
        let (db, product) = setup_with_product().await?;
        // A lot without any cache row (as if the row was lost)
        crate::core::lot::create_lot(
            &db,
            crate::core::lot::NewLot {
                product_id: product.id,
                acquired_on: date(2024, 1, 1),
                quantity: 25,
                unit_cost: 9.0,
                unit_weight: 1.0,
                weight_unit: "kg".to_string(),
                source_company_id: None,
                shipment_note: None,
                source_line_id: None,
            },
        )
        .await?;

        let report = repair(&db, None, "test_user").await?;
        assert_eq!(report.entries[0].cached, 0);
        assert_eq!(report.entries[0].expected, 25);

        let created = get_aggregate(&db, product.id).await?.unwrap();
        assert_eq!(created.quantity, 25);
        assert_eq!(created.last_unit_cost, 9.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_empty_database() -> Result<()> {
        let db = setup_test_db().await?;
        let report = reconcile(&db, None).await?;
        assert!(report.is_clean());
        assert_eq!(report.products_checked, 0);
        Ok(())
    }
}
