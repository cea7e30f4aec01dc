//! Generic table-driven CRUD over a relational store, an HTTP boundary that
//! exposes it, and a cached client with invalidating writes.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod store;

pub use error::{Error, Result};
