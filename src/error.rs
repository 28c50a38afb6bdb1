use thiserror::Error;

use crate::policy::Action;
use crate::solver::State;

/// Problems found in a configuration before any solving starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive, finite rate (got {value})")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("discount must lie strictly between 0 and 1 (got {0})")]
    InvalidDiscount(f64),
    #[error("max_count must be at least 1")]
    EmptyGrid,
    #[error("max_transfer ({max_transfer}) exceeds max_count ({max_count})")]
    TransferTooLarge { max_transfer: u8, max_count: u8 },
    #[error("max_transfer must be at most 127 (got {0})")]
    TransferOutOfRange(u8),
    #[error("poisson_bound must be at least 1")]
    ZeroPoissonBound,
    #[error("threshold must be positive and finite (got {0})")]
    InvalidThreshold(f64),
    #[error("{name} must be non-negative and finite (got {value})")]
    InvalidAmount { name: &'static str, value: f64 },
    #[error("{0} must be at least 1")]
    ZeroCap(&'static str),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("unable to read configuration file: {0}")]
    ConfigFile(#[from] config_file::ConfigFileError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("starting table is {rows}x{cols}, expected {expected}x{expected}")]
    GridMismatch { expected: usize, rows: usize, cols: usize },
    #[error("starting policy moves {action} cars in state {state}, which is not feasible")]
    InfeasibleStart { state: State, action: Action },
    #[error("policy evaluation did not settle within {sweeps} sweeps")]
    EvaluationDiverged { sweeps: usize },
    #[error("policy still changing after {iterations} improvement rounds")]
    NotConverged { iterations: usize },
}
