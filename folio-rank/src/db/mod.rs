//! Persistence operations for the ranking engine
//!
//! All posterior mutations go through this module; the catalog never
//! writes here and the pairing/convergence engines never read the
//! database directly.

pub mod app_state;
pub mod choices;
pub mod images;
pub mod retry;

pub use retry::retry_on_lock;
