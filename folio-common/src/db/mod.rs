//! Database bootstrap shared by the folio crates

pub mod init;

pub use init::{init_database, init_memory_database};
