use ndarray::{Array2, Zip};

use crate::solver::State;

/// Number of cars moved overnight. Positive moves cars from location #1 to
/// location #2, negative moves them the other way.
pub type Action = i8;

/// Expected discounted return for every state.
/// Indexes: cars at location #1, cars at location #2.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    pub values: Array2<f64>,
}

impl ValueTable {
    pub fn zeros(max_count: u8) -> ValueTable {
        let dim = usize::from(max_count) + 1;
        ValueTable { values: Array2::zeros((dim, dim)) }
    }

    pub fn max_count(&self) -> u8 {
        (self.values.nrows() - 1) as u8
    }

    pub fn get(&self, n1: u8, n2: u8) -> f64 {
        self.values[[usize::from(n1), usize::from(n2)]]
    }

    pub fn value(&self, s: &State) -> f64 {
        self.get(s.n1, s.n2)
    }

    /// Summed absolute difference across all states.
    pub fn total_change(&self, other: &ValueTable) -> f64 {
        Zip::from(&self.values)
            .and(&other.values)
            .fold(0.0, |acc, a, b| acc + (a - b).abs())
    }
}

/// Action chosen for every state.
/// Indexes: cars at location #1, cars at location #2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    pub policy: Array2<Action>,
}

impl PolicyTable {
    /// The do-nothing policy.
    pub fn zeros(max_count: u8) -> PolicyTable {
        let dim = usize::from(max_count) + 1;
        PolicyTable { policy: Array2::zeros((dim, dim)) }
    }

    pub fn max_count(&self) -> u8 {
        (self.policy.nrows() - 1) as u8
    }

    pub fn action(&self, s: &State) -> Action {
        self.policy[[usize::from(s.n1), usize::from(s.n2)]]
    }

    /// Number of states whose action differs between the two tables.
    pub fn changed_states(&self, other: &PolicyTable) -> usize {
        Zip::from(&self.policy)
            .and(&other.policy)
            .fold(0, |acc, a, b| acc + usize::from(a != b))
    }
}
