//! Policy iteration for a two-location car rental problem.
//!
//! Each night up to `max_transfer` cars may be moved between two lots.
//! Rental requests and returns at each lot follow independent Poisson
//! distributions. [`solver::PolicyIteration`] finds the transfer policy that
//! maximizes the expected discounted rental income.

pub mod cars;
pub mod config;
pub mod error;
pub mod export;
pub mod poisson;
pub mod policy;
pub mod solver;
