//! Build order allocation and completion engine
//!
//! Reserves stock items against the bill of materials of a build order and,
//! on completion, converts the reserved stock into the produced outputs in a
//! single transaction.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod serials;
pub mod services;

pub use errors::{ErrorKind, ServiceError};
pub use services::BuildEngine;
