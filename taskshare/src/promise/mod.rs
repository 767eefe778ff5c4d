//! Single-assignment asynchronous results.
//!
//! This module provides:
//! - AsyncResult, a result produced once and observed many times
//! - Resolver, the producing side that settles it

mod async_result;

pub use async_result::{AsyncResult, Resolver};
