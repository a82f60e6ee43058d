//! Pairing engine
//!
//! Classifies images into eligibility pools and chooses the next pair to
//! show. CPU-only: callers supply posteriors, recency state, and the RNG;
//! nothing here touches the database or the clock.

pub mod pools;
pub mod selector;

pub use pools::{classify, PoolSet};
pub use selector::{pair_key, select_pair, RecencyView};
