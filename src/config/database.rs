//! Database configuration module.
//!
//! Handles `SQLite` connection setup and table creation using `SeaORM`. Table
//! creation uses `Schema::create_table_from_entity` so the schema always
//! matches the entity definitions without hand-written SQL. Connections carry
//! bounded timeouts: a contended operation fails with a retryable error
//! instead of blocking indefinitely.

use crate::entities::{
    AggregateStock, Lot, LotMatch, Product, ProductionInput, ProductionRecord, StockLog, Trade,
    TradeLine,
};
use crate::errors::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;

/// Gets the database URL from environment variable or returns default `SQLite` path.
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/lotbook.sqlite".to_string())
}

/// Establishes a connection to the `SQLite` database.
///
/// Acquire and statement timeouts are bounded so that writer contention
/// surfaces as an error the retry layer can handle rather than a hang.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(get_database_url());
    options
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(60));

    Database::connect(options).await.map_err(Into::into)
}

/// Creates all ledger tables from the entity definitions.
///
/// Existing tables are left alone, so the binary can run this on every
/// startup; tests run it against a fresh in-memory database.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = [
        schema.create_table_from_entity(Product),
        schema.create_table_from_entity(Trade),
        schema.create_table_from_entity(TradeLine),
        schema.create_table_from_entity(Lot),
        schema.create_table_from_entity(LotMatch),
        schema.create_table_from_entity(AggregateStock),
        schema.create_table_from_entity(ProductionRecord),
        schema.create_table_from_entity(ProductionInput),
        schema.create_table_from_entity(StockLog),
    ];
    for statement in &mut statements {
        db.execute(builder.build(statement.if_not_exists())).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{LotModel, ProductModel, StockLogModel, TradeLineModel};
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Tables exist if querying them succeeds
        let _: Vec<ProductModel> = Product::find().limit(1).all(&db).await?;
        let _: Vec<LotModel> = Lot::find().limit(1).all(&db).await?;
        let _: Vec<TradeLineModel> = TradeLine::find().limit(1).all(&db).await?;
        let _: Vec<StockLogModel> = StockLog::find().limit(1).all(&db).await?;

        Ok(())
    }
}
