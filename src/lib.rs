//! Comanda
//!
//! Order, stock and delivery back office for a small food-service business.
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
pub mod services;

pub use config::{load_config, AppConfig};
pub use db::DbPool;
pub use errors::ServiceError;
pub use events::{Event, EventSender};
pub use services::AppServices;
