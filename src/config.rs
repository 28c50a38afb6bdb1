use std::path::Path;

use config_file::FromConfigFile;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ConfigError, Error};
use crate::policy::Action;

/// How cars returned at the end of the day are modelled.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReturnsMode {
    /// Each location gets back exactly its (rounded) mean number of cars.
    #[default]
    Deterministic,
    /// Returns are Poisson distributed and enumerated like rental requests.
    Stochastic,
}

/// Hold information read from the TOML configuration file.
///
/// Every field has a default, so a configuration file only needs to name
/// the constants it changes.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CarConfig {
    /// Maximum number of cars that can be stored at either location
    pub max_count: u8,
    /// Maximum number of cars that can be moved overnight
    pub max_transfer: u8,
    /// Expected rental requests per day at location #1
    pub rent_mean1: f64,
    /// Expected rental requests per day at location #2
    pub rent_mean2: f64,
    /// Expected returns per day at location #1
    pub return_mean1: f64,
    /// Expected returns per day at location #2
    pub return_mean2: f64,
    /// Discount rate
    pub discount: f64,
    /// Credit earned for every car rented
    pub rental_credit: f64,
    /// Cost of moving one car between locations
    pub transfer_cost: f64,
    /// Request and return counts at or above this bound have zero probability
    pub poisson_bound: u8,
    /// Evaluation stops once the summed absolute change drops below this
    pub threshold: f64,
    pub returns: ReturnsMode,
    /// Safety cap on improvement rounds
    pub max_iterations: usize,
    /// Safety cap on evaluation sweeps per round
    pub max_sweeps: usize,
    /// Rayon worker threads. Uses the rayon default when absent.
    pub threads: Option<usize>,
}

impl Default for CarConfig {
    fn default() -> Self {
        CarConfig {
            max_count: 20,
            max_transfer: 5,
            rent_mean1: 3.0,
            rent_mean2: 4.0,
            return_mean1: 3.0,
            return_mean2: 2.0,
            discount: 0.9,
            rental_credit: 10.0,
            transfer_cost: 2.0,
            poisson_bound: 11,
            threshold: 1e-4,
            returns: ReturnsMode::Deterministic,
            max_iterations: 100,
            max_sweeps: 10_000,
            threads: None,
        }
    }
}

impl CarConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<CarConfig, Error> {
        info!(path = %path.display(), "reading config file");
        let config = CarConfig::from_config_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constants before any iteration begins.
    ///
    /// Returns the non-fatal warnings, which are also logged: a rate at or
    /// above half the Poisson bound loses a noticeable share of its
    /// probability mass to truncation.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.max_count == 0 {
            return Err(ConfigError::EmptyGrid);
        }
        if self.max_transfer > self.max_count {
            return Err(ConfigError::TransferTooLarge {
                max_transfer: self.max_transfer,
                max_count: self.max_count,
            });
        }
        if self.max_transfer > Action::MAX.unsigned_abs() {
            return Err(ConfigError::TransferOutOfRange(self.max_transfer));
        }
        for (name, value) in self.rates() {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidRate { name, value });
            }
        }
        if !(self.discount > 0.0 && self.discount < 1.0) {
            return Err(ConfigError::InvalidDiscount(self.discount));
        }
        for (name, value) in [
            ("rental_credit", self.rental_credit),
            ("transfer_cost", self.transfer_cost),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidAmount { name, value });
            }
        }
        if self.poisson_bound == 0 {
            return Err(ConfigError::ZeroPoissonBound);
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroCap("max_iterations"));
        }
        if self.max_sweeps == 0 {
            return Err(ConfigError::ZeroCap("max_sweeps"));
        }

        let half_bound = f64::from(self.poisson_bound) / 2.0;
        let warnings: Vec<String> = self
            .rates()
            .into_iter()
            .filter(|(_, value)| *value >= half_bound)
            .map(|(name, value)| {
                format!(
                    "{name} = {value} is at least half of poisson_bound = {}; \
                     truncated tail mass may bias results",
                    self.poisson_bound
                )
            })
            .collect();
        for w in &warnings {
            warn!("{w}");
        }
        Ok(warnings)
    }

    fn rates(&self) -> [(&'static str, f64); 4] {
        [
            ("rent_mean1", self.rent_mean1),
            ("rent_mean2", self.rent_mean2),
            ("return_mean1", self.return_mean1),
            ("return_mean2", self.return_mean2),
        ]
    }

    /// Cars returned per location when returns are deterministic.
    pub fn fixed_returns(&self) -> (u8, u8) {
        (round_count(self.return_mean1), round_count(self.return_mean2))
    }
}

fn round_count(mean: f64) -> u8 {
    mean.round().clamp(0.0, f64::from(u8::MAX)) as u8
}
