//! # pmkv Configuration Module
//!
//! Centralizes the tunable constants for the engine and the derived layout
//! values of the pool file. Interdependent values are co-located and enforced
//! through compile-time assertions so a change to one cannot silently
//! invalidate another.

pub mod constants;
pub use constants::*;
