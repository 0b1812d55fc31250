//! Shared test utilities for `lotbook`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults. Every test runs against
//! its own in-memory `SQLite` database with the full schema created.

use crate::{
    core::{matching, trade},
    entities::{TradeType, lot, product, trade as trade_entity, trade_line},
    errors::Result,
};
use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Sets up a test database together with one product, the common starting
/// point for ledger tests.
pub async fn setup_with_product() -> Result<(DatabaseConnection, product::Model)> {
    let db = setup_test_db().await?;
    let product = create_test_product(&db, "Test Product").await?;
    Ok((db, product))
}

/// Builds a `NaiveDate` from literals; test dates are always valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Creates a test product with sensible defaults.
///
/// # Defaults
/// * `unit_weight`: 1.0
/// * `weight_unit`: "kg"
pub async fn create_test_product(
    db: &DatabaseConnection,
    name: &str,
) -> Result<product::Model> {
    let model = product::ActiveModel {
        name: Set(name.to_string()),
        unit_weight: Set(1.0),
        weight_unit: Set("kg".to_string()),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Creates a trade master with no counterparty, attributed to `test_user`.
pub async fn create_test_trade(
    db: &DatabaseConnection,
    trade_type: TradeType,
    traded_on: NaiveDate,
) -> Result<trade_entity::Model> {
    trade::create_trade(db, trade_type, traded_on, None, "test_user").await
}

/// Registers a purchase of `quantity` units at `unit_cost`, creating the
/// trade master, the line, and the lot in one go.
pub async fn create_purchase(
    db: &DatabaseConnection,
    product_id: i64,
    traded_on: NaiveDate,
    quantity: i64,
    unit_cost: f64,
) -> Result<(trade_line::Model, lot::Model)> {
    let purchase = create_test_trade(db, TradeType::Purchase, traded_on).await?;
    trade::register_purchase_line(
        db,
        purchase.id,
        product_id,
        quantity,
        unit_cost,
        None,
        "test_user",
    )
    .await
}

/// Creates an unallocated sale line (or a return line, for negative
/// quantities) on a fresh sale trade.
pub async fn create_sale(
    db: &DatabaseConnection,
    product_id: i64,
    traded_on: NaiveDate,
    quantity: i64,
    unit_price: f64,
) -> Result<trade_line::Model> {
    let sale = create_test_trade(db, TradeType::Sale, traded_on).await?;
    trade::create_sale_line(db, sale.id, product_id, quantity, unit_price).await
}

/// Purchases stock and sells part of it, returning the allocated sale line.
/// The standard fixture for reversal and return tests.
pub async fn create_allocated_sale(
    db: &DatabaseConnection,
    product_id: i64,
    purchased: i64,
    sold: i64,
) -> Result<trade_line::Model> {
    create_purchase(db, product_id, date(2024, 1, 1), purchased, 10.0).await?;
    let line = create_sale(db, product_id, date(2024, 2, 1), sold, 20.0).await?;
    matching::allocate(db, line.id, matching::AllocationMode::Strict, "test_user").await?;
    trade::require_line(db, line.id).await
}
