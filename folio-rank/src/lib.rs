//! # folio-rank
//!
//! Pairwise ranking engine over a content-addressed image catalog. A
//! human repeatedly judges two images (LEFT, RIGHT, or SKIP); the engine
//! maintains Elo+sigma posteriors per image, schedules the most
//! informative next comparison, and reports when a stable top-K set has
//! emerged.
//!
//! The [`session::SessionCoordinator`] is the only entry point intended
//! for outer layers; everything else is engine internals exposed for
//! composition and testing.

pub mod catalog;
pub mod convergence;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod pairing;
pub mod rating;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{EngineError, EngineResult};
pub use models::{
    ChoiceReceipt, ChoiceRecord, EngineStats, ImageRecord, Outcome, Pair, ProgressReport, Quality,
};
pub use session::SessionCoordinator;
