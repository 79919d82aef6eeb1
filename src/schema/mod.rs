//! Input schema for course platform logs
//!
//! This module defines the typed records of the two raw event streams, the
//! merged interaction record, the static step metadata table, and the CSV
//! adapter that reads them from platform exports.

mod adapter;
mod records;
mod step_meta;

pub use adapter::*;
pub use records::*;
pub use step_meta::*;
