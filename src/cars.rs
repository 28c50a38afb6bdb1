use std::cmp;
use std::sync::Arc;

use crate::config::{CarConfig, ReturnsMode};
use crate::error::ConfigError;
use crate::poisson::PoissonCache;
use crate::policy::{Action, ValueTable};
use crate::solver::State;

/// One-step model of the two rental locations.
///
/// Holds the truncated Poisson rows for rental requests and returns at both
/// locations, taken from the solve's [`PoissonCache`] when the model is
/// built. Index `n` of a row is the probability of exactly `n` requests
/// (or returns); counts at or past the row length have zero probability.
pub struct CarModel {
    /// Maximum number of cars that can be stored at either location
    pub max_count: u8,
    /// Maximum number of cars that can be moved between locations
    pub max_transfer: u8,
    pub rental_credit: f64,
    pub transfer_cost: f64,
    /// Discount rate
    pub discount: f64,
    /// Cars returned per location when returns are deterministic
    pub fixed_returns: (u8, u8),
    /// Loc 1 rental request probs
    rent1: Arc<[f64]>,
    /// Loc 2 rental request probs
    rent2: Arc<[f64]>,
    /// Loc 1 return probs
    return1: Arc<[f64]>,
    /// Loc 2 return probs
    return2: Arc<[f64]>,
}

impl CarModel {
    /// Build the model, warming the cache for all four rates.
    ///
    /// Fails if any rate cannot parameterize a Poisson distribution.
    pub fn new(config: &CarConfig, cache: &PoissonCache) -> Result<CarModel, ConfigError> {
        let row = |name: &'static str, rate: f64| {
            cache
                .row(rate)
                .map_err(|_| ConfigError::InvalidRate { name, value: rate })
        };
        Ok(CarModel {
            max_count: config.max_count,
            max_transfer: config.max_transfer,
            rental_credit: config.rental_credit,
            transfer_cost: config.transfer_cost,
            discount: config.discount,
            fixed_returns: config.fixed_returns(),
            rent1: row("rent_mean1", config.rent_mean1)?,
            rent2: row("rent_mean2", config.rent_mean2)?,
            return1: row("return_mean1", config.return_mean1)?,
            return2: row("return_mean2", config.return_mean2)?,
        })
    }

    /// An action is feasible when it stays within the transfer limit and the
    /// source location has enough cars to send.
    pub fn is_feasible(&self, s: &State, a: Action) -> bool {
        if a.unsigned_abs() > self.max_transfer {
            return false;
        }
        if a >= 0 {
            s.n1 >= a.unsigned_abs()
        } else {
            s.n2 >= a.unsigned_abs()
        }
    }

    /// All actions in ascending order, `-max_transfer..=max_transfer`.
    pub fn actions(&self) -> impl Iterator<Item = Action> {
        let m = self.max_transfer as Action;
        -m..=m
    }

    /// Feasible actions for `s`, in ascending order.
    pub fn feasible_actions<'a>(&'a self, s: &'a State) -> impl Iterator<Item = Action> + 'a {
        self.actions().filter(move |&a| self.is_feasible(s, a))
    }

    /// Credit earned for renting `rented` cars.
    pub fn rental_reward(&self, rented: u32) -> f64 {
        f64::from(rented) * self.rental_credit
    }

    /// Cost of moving cars overnight, paid whatever the demand turns out to be.
    pub fn transfer_charge(&self, a: Action) -> f64 {
        self.transfer_cost * f64::from(a.unsigned_abs())
    }

    /// Cars on each lot after the overnight move.
    ///
    /// Each lot is capped at `max_count` before any rentals happen, so cars
    /// moved onto a full lot are lost. Assumes `a` is feasible for `s`.
    pub fn after_transfer(&self, s: &State, a: Action) -> State {
        let max = i16::from(self.max_count);
        let n1 = cmp::min(i16::from(s.n1) - i16::from(a), max);
        let n2 = cmp::min(i16::from(s.n2) + i16::from(a), max);
        State { n1: n1 as u8, n2: n2 as u8 }
    }

    fn restock(&self, left: u8, returned: usize) -> u8 {
        cmp::min(usize::from(left) + returned, usize::from(self.max_count)) as u8
    }

    /// Expected one-day return of taking action `a` in state `s`, followed by
    /// the discounted value of the next morning's state under `values`.
    ///
    /// Infeasible actions return negative infinity so they never win a
    /// comparison. `values` must cover the same grid as the model.
    pub fn expected_return(
        &self,
        s: &State,
        a: Action,
        values: &ValueTable,
        returns: ReturnsMode,
    ) -> f64 {
        if !self.is_feasible(s, a) {
            return f64::NEG_INFINITY;
        }
        let mut total = -self.transfer_charge(a);
        let cars = self.after_transfer(s, a);

        for (request1, p1) in self.rent1.iter().enumerate() {
            for (request2, p2) in self.rent2.iter().enumerate() {
                // Can't rent more cars than are on the lot.
                let rented1 = cmp::min(usize::from(cars.n1), request1) as u8;
                let rented2 = cmp::min(usize::from(cars.n2), request2) as u8;
                let reward = self.rental_reward(u32::from(rented1) + u32::from(rented2));
                let left1 = cars.n1 - rented1;
                let left2 = cars.n2 - rented2;
                let prob = p1 * p2;

                match returns {
                    ReturnsMode::Deterministic => {
                        let (returned1, returned2) = self.fixed_returns;
                        let n1 = self.restock(left1, usize::from(returned1));
                        let n2 = self.restock(left2, usize::from(returned2));
                        total += prob * (reward + self.discount * values.get(n1, n2));
                    }
                    ReturnsMode::Stochastic => {
                        for (returned1, q1) in self.return1.iter().enumerate() {
                            let n1 = self.restock(left1, returned1);
                            for (returned2, q2) in self.return2.iter().enumerate() {
                                let n2 = self.restock(left2, returned2);
                                total += prob * q1 * q2
                                    * (reward + self.discount * values.get(n1, n2));
                            }
                        }
                    }
                }
            }
        }
        total
    }

    fn show_row(label: &str, row: &[f64]) {
        print!("{label:>16} |");
        for p in row {
            print!("{p:8.4}");
        }
        println!();
    }

    /// Print the truncated request and return probabilities.
    pub fn show_probs(&self) {
        print!("{:>16} |", "count");
        for n in 0..self.rent1.len() {
            print!("{n:>8}");
        }
        println!();
        CarModel::show_row("loc 1 requests", &self.rent1);
        CarModel::show_row("loc 2 requests", &self.rent2);
        CarModel::show_row("loc 1 returns", &self.return1);
        CarModel::show_row("loc 2 returns", &self.return2);
    }
}
