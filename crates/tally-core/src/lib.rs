//! # tally-core
//! Foundation types, errors and collaborator traits for the Tally fee pool.

pub mod clock;
pub mod constants;
pub mod error;
pub mod math;
pub mod traits;
pub mod types;
