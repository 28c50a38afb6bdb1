use std::fmt;
use std::iter::Iterator;

use ndarray::Zip;
use tracing::{debug, info};

use crate::cars::CarModel;
use crate::config::{CarConfig, ReturnsMode};
use crate::error::{ConfigError, Error};
use crate::poisson::PoissonCache;
use crate::policy::{Action, PolicyTable, ValueTable};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct State {
    pub n1: u8,  // Number of cars at site #1 at start of day
    pub n2: u8,  // Number of cars at site #2 at start of day
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(n1: {}, n2: {})", self.n1, self.n2)
    }
}

/// Visit every state on the grid, location #2 varying fastest.
pub struct StateIterator {
    n1: u16,
    n2: u16,
    max_n1: u16,
    max_n2: u16,
}

impl StateIterator {
    pub fn new(max_n1: u8, max_n2: u8) -> StateIterator {
        StateIterator { n1: 0, n2: 0, max_n1: max_n1.into(), max_n2: max_n2.into() }
    }
}

impl Iterator for StateIterator {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        if self.n1 > self.max_n1 {
            return None;
        }
        let state = State { n1: self.n1 as u8, n2: self.n2 as u8 };
        if self.n2 < self.max_n2 {
            self.n2 += 1;
        } else {
            self.n2 = 0;
            self.n1 += 1;
        }
        Some(state)
    }
}

/// Receives the solver's intermediate and final tables.
///
/// All hooks default to doing nothing.
pub trait SolveObserver {
    /// One evaluation sweep finished with the given summed absolute change.
    fn on_sweep(&mut self, _iteration: usize, _sweep: usize, _delta: f64) {}

    /// Policy number `iteration` is about to be evaluated. The do-nothing
    /// starting policy is 0 and each policy that improvement changes gets the
    /// next number.
    fn on_policy(&mut self, _iteration: usize, _policy: &PolicyTable) -> Result<(), Error> {
        Ok(())
    }

    /// Improvement left policy `iteration` unchanged.
    fn on_converged(
        &mut self,
        _iteration: usize,
        _policy: &PolicyTable,
        _values: &ValueTable,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Observer that ignores everything.
pub struct Quiet;

impl SolveObserver for Quiet {}

/// Final tables of a converged solve.
#[derive(Debug, Clone)]
pub struct Solution {
    pub values: ValueTable,
    pub policy: PolicyTable,
    /// Index of the final policy; the initial do-nothing policy is 0.
    pub iterations: usize,
}

/// Policy iteration over the two-location rental grid.
///
/// Alternates evaluation of the current policy to a fixed point with greedy
/// improvement until no state changes its action. Both sweeps are computed
/// state-parallel against a frozen copy of the previous table.
pub struct PolicyIteration {
    pub model: CarModel,
    pub returns: ReturnsMode,
    pub threshold: f64,
    pub max_iterations: usize,
    pub max_sweeps: usize,
}

impl PolicyIteration {
    /// Build a solver for a validated configuration. The cache is warmed for
    /// every rate here so sweeps only ever read from it; a rate the cache
    /// refuses is reported instead of producing an empty model.
    pub fn new(config: &CarConfig, cache: &PoissonCache) -> Result<PolicyIteration, ConfigError> {
        Ok(PolicyIteration {
            model: CarModel::new(config, cache)?,
            returns: config.returns,
            threshold: config.threshold,
            max_iterations: config.max_iterations,
            max_sweeps: config.max_sweeps,
        })
    }

    /// Validate `config` and solve it from scratch with a fresh cache.
    pub fn solve_config(
        config: &CarConfig,
        observer: &mut dyn SolveObserver,
    ) -> Result<Solution, Error> {
        config.validate()?;
        let cache = PoissonCache::new(config.poisson_bound);
        PolicyIteration::new(config, &cache)?.solve(observer)
    }

    /// One synchronous sweep: every entry of the returned table is computed
    /// from `values` only.
    pub fn sweep(&self, values: &ValueTable, policy: &PolicyTable) -> ValueTable {
        let mut next = values.clone();
        Zip::indexed(&mut next.values)
            .and(&policy.policy)
            .par_for_each(|(n1, n2), v, &a| {
                let s = State { n1: n1 as u8, n2: n2 as u8 };
                *v = self.model.expected_return(&s, a, values, self.returns);
            });
        next
    }

    /// Sweep until the summed absolute change drops below the threshold.
    /// Returns the settled table and the number of sweeps taken.
    pub fn evaluate(
        &self,
        mut values: ValueTable,
        policy: &PolicyTable,
        iteration: usize,
        observer: &mut dyn SolveObserver,
    ) -> Result<(ValueTable, usize), Error> {
        for sweep in 1..=self.max_sweeps {
            let next = self.sweep(&values, policy);
            let delta = next.total_change(&values);
            debug!(iteration, sweep, delta, "evaluation sweep");
            observer.on_sweep(iteration, sweep, delta);
            values = next;
            if delta < self.threshold {
                return Ok((values, sweep));
            }
        }
        Err(Error::EvaluationDiverged { sweeps: self.max_sweeps })
    }

    /// Best feasible action for `s`. Ties go to the smallest action.
    pub fn best_action(&self, s: &State, values: &ValueTable) -> Action {
        let mut best = (0, f64::NEG_INFINITY);
        for a in self.model.feasible_actions(s) {
            let r = self.model.expected_return(s, a, values, self.returns);
            if r > best.1 {
                best = (a, r);
            }
        }
        best.0
    }

    /// Greedy policy with respect to `values`.
    pub fn improve(&self, values: &ValueTable) -> PolicyTable {
        let mut policy = PolicyTable::zeros(self.model.max_count);
        Zip::indexed(&mut policy.policy).par_for_each(|(n1, n2), a| {
            let s = State { n1: n1 as u8, n2: n2 as u8 };
            *a = self.best_action(&s, values);
        });
        policy
    }

    /// Run policy iteration from a zero value table and the do-nothing policy.
    pub fn solve(&self, observer: &mut dyn SolveObserver) -> Result<Solution, Error> {
        let values = ValueTable::zeros(self.model.max_count);
        let policy = PolicyTable::zeros(self.model.max_count);
        self.solve_from(values, policy, observer)
    }

    /// Check that starting tables fit the grid and that every action in
    /// `policy` can be carried out.
    pub fn check_start(&self, values: &ValueTable, policy: &PolicyTable) -> Result<(), Error> {
        let max = self.model.max_count;
        let dim = usize::from(max) + 1;
        for (rows, cols) in [values.values.dim(), policy.policy.dim()] {
            if rows != dim || cols != dim {
                return Err(Error::GridMismatch { expected: dim, rows, cols });
            }
        }
        match StateIterator::new(max, max)
            .find(|s| !self.model.is_feasible(s, policy.action(s)))
        {
            Some(state) => Err(Error::InfeasibleStart { state, action: policy.action(&state) }),
            None => Ok(()),
        }
    }

    /// Run policy iteration from the given starting tables.
    pub fn solve_from(
        &self,
        mut values: ValueTable,
        mut policy: PolicyTable,
        observer: &mut dyn SolveObserver,
    ) -> Result<Solution, Error> {
        self.check_start(&values, &policy)?;
        let mut iteration = 0;
        observer.on_policy(iteration, &policy)?;
        loop {
            let (settled, sweeps) = self.evaluate(values, &policy, iteration, observer)?;
            values = settled;

            let next = self.improve(&values);
            let changed = next.changed_states(&policy);
            info!(iteration, sweeps, changed, "policy improved");

            if changed == 0 {
                observer.on_converged(iteration, &policy, &values)?;
                return Ok(Solution { values, policy, iterations: iteration });
            }
            iteration += 1;
            if iteration >= self.max_iterations {
                return Err(Error::NotConverged { iterations: iteration });
            }
            policy = next;
            observer.on_policy(iteration, &policy)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use approx::assert_abs_diff_eq;

    use super::*;

    fn small_config() -> CarConfig {
        CarConfig {
            max_count: 8,
            max_transfer: 3,
            ..Default::default()
        }
    }

    fn solver_for(config: &CarConfig) -> PolicyIteration {
        let cache = PoissonCache::new(config.poisson_bound);
        PolicyIteration::new(config, &cache).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        sweeps: usize,
        policies: Vec<(usize, PolicyTable)>,
        converged: Option<usize>,
    }

    impl SolveObserver for Recorder {
        fn on_sweep(&mut self, _iteration: usize, _sweep: usize, _delta: f64) {
            self.sweeps += 1;
        }

        fn on_policy(&mut self, iteration: usize, policy: &PolicyTable) -> Result<(), Error> {
            self.policies.push((iteration, policy.clone()));
            Ok(())
        }

        fn on_converged(
            &mut self,
            iteration: usize,
            _policy: &PolicyTable,
            _values: &ValueTable,
        ) -> Result<(), Error> {
            self.converged = Some(iteration);
            Ok(())
        }
    }

    #[test]
    fn iterate_states() {
        // Arrange
        let state_iter = StateIterator::new(2, 2);
        let mut states: HashSet<State> = HashSet::new();
        // Act
        for s in state_iter {
            assert!(s.n1 <= 2);
            assert!(s.n2 <= 2);
            states.insert(s);
        }
        // Assert
        assert_eq!(states.len(), 9);
    }

    #[test]
    fn iterate_full_u8_grid() {
        assert_eq!(StateIterator::new(u8::MAX, 0).count(), 256);
    }

    #[test]
    fn sweep_reads_only_previous_table() {
        // Arrange
        let config = small_config();
        let solver = solver_for(&config);
        let mut values = ValueTable::zeros(config.max_count);
        values.values.fill(5.0);
        let policy = PolicyTable::zeros(config.max_count);
        // Act
        let next = solver.sweep(&values, &policy);
        // Assert
        for s in StateIterator::new(config.max_count, config.max_count) {
            let expected = solver.model.expected_return(
                &s, 0, &values, ReturnsMode::Deterministic);
            assert_eq!(next.value(&s), expected);
        }
    }

    #[test]
    fn evaluation_is_a_contraction() {
        // Arrange
        let config = small_config();
        let solver = solver_for(&config);
        let policy = PolicyTable::zeros(config.max_count);
        let zeros = ValueTable::zeros(config.max_count);
        let mut high = ValueTable::zeros(config.max_count);
        high.values.fill(500.0);
        // Act
        let (from_zero, _) = solver.evaluate(zeros, &policy, 0, &mut Quiet).unwrap();
        let (from_high, _) = solver.evaluate(high, &policy, 0, &mut Quiet).unwrap();
        // Assert
        assert_abs_diff_eq!(from_zero.values, from_high.values, epsilon = 1e-2);
    }

    #[test]
    fn evaluation_respects_sweep_cap() {
        let config = CarConfig { max_sweeps: 2, ..small_config() };
        let solver = solver_for(&config);
        let policy = PolicyTable::zeros(config.max_count);
        let result = solver.evaluate(
            ValueTable::zeros(config.max_count), &policy, 0, &mut Quiet);
        assert!(matches!(result, Err(Error::EvaluationDiverged { sweeps: 2 })));
    }

    #[test]
    fn improvement_never_picks_infeasible_action() {
        // Arrange
        let config = CarConfig::default();
        let solver = solver_for(&config);
        // Make location #2 look very valuable so moving cars there is tempting.
        let mut values = ValueTable::zeros(config.max_count);
        for n1 in 0..=20usize {
            for n2 in 0..=20usize {
                values.values[[n1, n2]] = 50.0 * n2 as f64;
            }
        }
        // Act
        let policy = solver.improve(&values);
        // Assert
        assert_eq!(policy.action(&State { n1: 2, n2: 10 }), 2);
        for s in StateIterator::new(config.max_count, config.max_count) {
            assert!(solver.model.is_feasible(&s, policy.action(&s)), "{s}");
        }
    }

    #[test]
    fn ties_go_to_smallest_action() {
        // No credit, no cost and a flat value table make every action equal.
        let config = CarConfig {
            rental_credit: 0.0,
            transfer_cost: 0.0,
            ..small_config()
        };
        let solver = solver_for(&config);
        let values = ValueTable::zeros(config.max_count);
        assert_eq!(solver.best_action(&State { n1: 4, n2: 1 }, &values), -1);
        assert_eq!(solver.best_action(&State { n1: 4, n2: 8 }, &values), -3);
        assert_eq!(solver.best_action(&State { n1: 0, n2: 0 }, &values), 0);
    }

    #[test]
    fn small_stochastic_problem_converges() {
        // Arrange
        let config = CarConfig {
            max_count: 5,
            max_transfer: 2,
            rent_mean1: 1.5,
            rent_mean2: 2.0,
            return_mean1: 1.5,
            return_mean2: 1.0,
            poisson_bound: 8,
            returns: ReturnsMode::Stochastic,
            ..Default::default()
        };
        let mut recorder = Recorder::default();
        // Act
        let solution = PolicyIteration::solve_config(&config, &mut recorder).unwrap();
        // Assert
        assert_eq!(recorder.converged, Some(solution.iterations));
        assert_eq!(recorder.policies.len(), solution.iterations + 1);
        assert_eq!(recorder.policies.last(), Some(&(solution.iterations, solution.policy.clone())));
        assert!(recorder.sweeps > 0);
        for s in StateIterator::new(5, 5) {
            assert!(solution.values.value(&s) > 0.0, "{s}");
        }
    }

    #[test]
    fn solve_config_rejects_bad_discount() {
        let config = CarConfig { discount: 1.0, ..small_config() };
        let result = PolicyIteration::solve_config(&config, &mut Quiet);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn iteration_cap_stops_solve() {
        let config = CarConfig { max_iterations: 1, ..CarConfig::default() };
        let solver = solver_for(&config);
        let result = solver.solve(&mut Quiet);
        assert!(matches!(result, Err(Error::NotConverged { iterations: 1 })));
    }

    #[test]
    fn classic_problem_converges() {
        // Arrange
        let config = CarConfig::default();
        let solver = solver_for(&config);
        let mut recorder = Recorder::default();
        // Act
        let solution = solver.solve(&mut recorder).unwrap();
        // Assert
        assert!(solution.iterations <= 5, "took {} iterations", solution.iterations);
        assert_eq!(recorder.converged, Some(solution.iterations));
        // A full lot next to an empty one ships as many cars as allowed.
        assert_eq!(solution.policy.action(&State { n1: 20, n2: 0 }), 5);
        assert!(solution.policy.action(&State { n1: 0, n2: 20 }) < 0);
        assert_eq!(solution.policy.action(&State { n1: 0, n2: 0 }), 0);

        // Improving a converged policy again changes nothing.
        let again = solver.improve(&solution.values);
        assert_eq!(again.changed_states(&solution.policy), 0);
    }

    #[test]
    fn policies_are_numbered_from_the_starting_policy() {
        // Arrange
        let config = CarConfig::default();
        let solver = solver_for(&config);
        let mut recorder = Recorder::default();
        // Act
        let solution = solver.solve(&mut recorder).unwrap();
        // Assert
        let indices: Vec<usize> = recorder.policies.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..=solution.iterations).collect::<Vec<_>>());
        assert_eq!(recorder.policies[0].1, PolicyTable::zeros(config.max_count));
        assert_ne!(recorder.policies[1].1, PolicyTable::zeros(config.max_count));
        assert_eq!(recorder.policies[solution.iterations].1, solution.policy);
        assert_eq!(recorder.converged, Some(solution.iterations));
    }

    #[test]
    fn infeasible_starting_policy_is_rejected() {
        // Arrange
        let config = small_config();
        let solver = solver_for(&config);
        let mut policy = PolicyTable::zeros(config.max_count);
        policy.policy[[2, 6]] = 3;
        let mut recorder = Recorder::default();
        // Act
        let result = solver.solve_from(ValueTable::zeros(config.max_count), policy, &mut recorder);
        // Assert
        assert!(matches!(
            result,
            Err(Error::InfeasibleStart { state: State { n1: 2, n2: 6 }, action: 3 })
        ));
        assert_eq!(recorder.sweeps, 0);
        assert!(recorder.policies.is_empty());
    }

    #[test]
    fn mismatched_starting_grid_is_rejected() {
        let config = small_config();
        let solver = solver_for(&config);
        let result = solver.solve_from(
            ValueTable::zeros(4), PolicyTable::zeros(config.max_count), &mut Quiet);
        assert!(matches!(
            result,
            Err(Error::GridMismatch { expected: 9, rows: 5, cols: 5 })
        ));
    }

    #[test]
    fn feasible_starting_policy_is_accepted() {
        let config = small_config();
        let solver = solver_for(&config);
        let mut policy = PolicyTable::zeros(config.max_count);
        policy.policy[[8, 0]] = 3;
        policy.policy[[0, 8]] = -3;
        let values = ValueTable::zeros(config.max_count);
        assert!(solver.check_start(&values, &policy).is_ok());
        let solution = solver.solve_from(values, policy, &mut Quiet).unwrap();
        let again = solver.improve(&solution.values);
        assert_eq!(again.changed_states(&solution.policy), 0);
    }

    #[test]
    fn solver_rejects_bad_rate() {
        let config = CarConfig { rent_mean1: -1.0, ..small_config() };
        let cache = PoissonCache::new(config.poisson_bound);
        assert!(matches!(
            PolicyIteration::new(&config, &cache),
            Err(ConfigError::InvalidRate { name: "rent_mean1", .. })
        ));
    }
}
