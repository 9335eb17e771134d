// src/lib.rs

//! Offerwatch Library
//!
//! Watches a housing offers page and notifies chat subscribers about newly
//! listed offers.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
