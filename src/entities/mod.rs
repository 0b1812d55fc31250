//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod aggregate_stock;
pub mod lot;
pub mod lot_match;
pub mod product;
pub mod production_input;
pub mod production_record;
pub mod stock_log;
pub mod trade;
pub mod trade_line;

// Re-export specific types to avoid conflicts
pub use aggregate_stock::{
    Column as AggregateStockColumn, Entity as AggregateStock, Model as AggregateStockModel,
};
pub use lot::{Column as LotColumn, Entity as Lot, LotStatus, Model as LotModel};
pub use lot_match::{Column as LotMatchColumn, Entity as LotMatch, Model as LotMatchModel};
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use production_input::{
    Column as ProductionInputColumn, Entity as ProductionInput, Model as ProductionInputModel,
};
pub use production_record::{
    Column as ProductionRecordColumn, Entity as ProductionRecord, Model as ProductionRecordModel,
};
pub use stock_log::{Column as StockLogColumn, Entity as StockLog, EntryType, Model as StockLogModel};
pub use trade::{Column as TradeColumn, Entity as Trade, Model as TradeModel, TradeType};
pub use trade_line::{
    Column as TradeLineColumn, Entity as TradeLine, MatchingStatus, Model as TradeLineModel,
};
