//! End-to-end and adversarial test suite for the Tally fee pool.
//!
//! The integration tests drive a [`tally_node_lib::FeePoolService`] wired to
//! simulated collaborators and a manual clock, the same way a deployment
//! would drive it, and check the accounting invariants from the outside.

pub mod helpers;
