//! Trade master and line registration.
//!
//! A trade is the parent of one or more lines; each line is a quantity
//! movement. Registering a purchase line creates its lot, updates the
//! aggregate cache, and appends the IN log entry in one transaction, so a
//! committed purchase is always fully reflected everywhere or nowhere.

use crate::{
    core::{lot, stock},
    entities::{
        EntryType, MatchingStatus, Product, Trade, TradeLine, TradeType, product, trade,
        trade_line,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{DatabaseConnection, QueryOrder, Set, TransactionTrait, prelude::*};

/// Creates a trade master row.
pub async fn create_trade<C>(
    db: &C,
    trade_type: TradeType,
    traded_on: NaiveDate,
    company_id: Option<i64>,
    actor: &str,
) -> Result<trade::Model>
where
    C: ConnectionTrait,
{
    let model = trade::ActiveModel {
        trade_type: Set(trade_type.as_str().to_string()),
        traded_on: Set(traded_on),
        company_id: Set(company_id),
        actor: Set(actor.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Retrieves a trade by id or fails with `TradeNotFound`.
pub async fn require_trade<C>(db: &C, trade_id: i64) -> Result<trade::Model>
where
    C: ConnectionTrait,
{
    Trade::find_by_id(trade_id)
        .one(db)
        .await?
        .ok_or(Error::TradeNotFound { trade_id })
}

/// Retrieves a line by id or fails with `LineNotFound`.
pub async fn require_line<C>(db: &C, line_id: i64) -> Result<trade_line::Model>
where
    C: ConnectionTrait,
{
    TradeLine::find_by_id(line_id)
        .one(db)
        .await?
        .ok_or(Error::LineNotFound { line_id })
}

/// Retrieves all lines of a trade, oldest first.
pub async fn get_lines_for_trade<C>(db: &C, trade_id: i64) -> Result<Vec<trade_line::Model>>
where
    C: ConnectionTrait,
{
    TradeLine::find()
        .filter(trade_line::Column::TradeId.eq(trade_id))
        .order_by_asc(trade_line::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a product by id or fails with `ProductNotFound`.
pub async fn require_product<C>(db: &C, product_id: i64) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or(Error::ProductNotFound { product_id })
}

/// Registers a purchase line: inserts the line, creates its lot dated on the
/// parent trade's date, and applies the IN movement to the aggregate cache.
///
/// Purchase lines are implicitly matched to themselves, so the line is
/// created with status matched and its cost basis set to the unit price.
///
/// # Errors
/// * `InvalidQuantity` for a non-positive quantity
/// * `TradeNotFound` / `ProductNotFound` for dangling references
pub async fn register_purchase_line(
    db: &DatabaseConnection,
    trade_id: i64,
    product_id: i64,
    quantity: i64,
    unit_price: f64,
    shipment_note: Option<String>,
    actor: &str,
) -> Result<(trade_line::Model, crate::entities::lot::Model)> {
    if quantity <= 0 {
        return Err(Error::InvalidQuantity { quantity });
    }

    let txn = db.begin().await?;

    let parent = require_trade(&txn, trade_id).await?;
    let product = require_product(&txn, product_id).await?;

    let line = trade_line::ActiveModel {
        trade_id: Set(trade_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        parent_line_id: Set(None),
        matching_status: Set(MatchingStatus::Matched.as_str().to_string()),
        cost_basis: Set(Some(unit_price)),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let line = line.insert(&txn).await?;

    let new_lot = lot::NewLot {
        product_id,
        acquired_on: parent.traded_on,
        quantity,
        unit_cost: unit_price,
        unit_weight: product.unit_weight,
        weight_unit: product.weight_unit.clone(),
        source_company_id: parent.company_id,
        shipment_note,
        source_line_id: Some(line.id),
    };
    let created = lot::create_lot(&txn, new_lot).await?;

    let weight_delta = quantity as f64 * product.unit_weight;
    stock::apply_stock_delta(
        &txn,
        product_id,
        quantity,
        weight_delta,
        stock::Movement {
            entry_type: EntryType::In,
            line_id: Some(line.id),
            actor,
            note: "purchase receipt",
        },
    )
    .await?;
    stock::set_last_unit_cost(&txn, product_id, unit_price).await?;

    txn.commit().await?;
    Ok((line, created))
}

/// Inserts a sale line without allocating it.
///
/// Positive quantities are regular sales and stay PENDING until
/// [`crate::core::matching::allocate`] runs; negative quantities are returns
/// and stay PENDING until [`crate::core::returns::link_return`] attaches them
/// to the sale they reduce.
pub async fn create_sale_line<C>(
    db: &C,
    trade_id: i64,
    product_id: i64,
    quantity: i64,
    unit_price: f64,
) -> Result<trade_line::Model>
where
    C: ConnectionTrait,
{
    if quantity == 0 {
        return Err(Error::InvalidQuantity { quantity });
    }

    require_trade(db, trade_id).await?;
    require_product(db, product_id).await?;

    let line = trade_line::ActiveModel {
        trade_id: Set(trade_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        parent_line_id: Set(None),
        matching_status: Set(MatchingStatus::Pending.as_str().to_string()),
        cost_basis: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    line.insert(db).await.map_err(Into::into)
}
