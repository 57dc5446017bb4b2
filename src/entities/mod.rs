//! Database entities for the build order engine.
//!
//! `part` and `bom_item` form the catalog, `stock_location`, `stock_item` and
//! `stock_item_tracking` the stock ledger, and `build`, `build_line` and
//! `build_item` the build orders with their allocations.

pub mod bom_item;
pub mod build;
pub mod build_item;
pub mod build_line;
pub mod part;
pub mod stock_item;
pub mod stock_item_tracking;
pub mod stock_location;

pub use build::BuildStatus;
pub use stock_item_tracking::TrackingType;
