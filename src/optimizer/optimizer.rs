//! # Join-Order Optimizer
//!
//! Finds the cheapest filter ordering for a query. The search strategy
//! scales with the number of filters:
//!
//! ```text
//! n == 1 or forced order   cost the given order once
//! n <= 7                   exhaustive: all n! permutations
//! n >  7                   brute-force a prefix (work budget 2000),
//!                          fill the rest greedily, then refine with up
//!                          to 500 genetic iterations
//! ```
//!
//! Possible plans if using brute force: 1 filter 1 plan, 2 filters 2 plans,
//! 3 filters 6 plans, ... 7 filters 5040 plans.
//!
//! ## Genetic Refinement
//!
//! Every 128th iteration reseeds by shuffling all filters; otherwise two
//! positions not previously swapped are exchanged (tracked in a
//! switched-pair set). Whenever a candidate improves the best cost, the set
//! resets and the candidate becomes the new baseline. The random source is
//! seeded with a constant, so results are reproducible for identical input.
//!
//! ## Cancellation
//!
//! The search polls `can_stop` every 128 candidates: once a plan exists and
//! the elapsed time exceeds `cost × 100 µs`, searching longer than the
//! estimated execution time would be self-defeating, so the current best
//! wins.

use std::time::Instant;

use eyre::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringBitmap;
use tracing::trace;

use super::permutations::Permutations;
use super::plan::{Plan, TableFilter};
use crate::config::{MAX_BRUTE_FORCE, MAX_BRUTE_FORCE_FILTERS, MAX_GENETIC};

/// Cost-driven search over filter orderings.
pub struct Optimizer<'a> {
    filters: &'a mut [TableFilter],
    force_join_order: bool,
    start: Option<Instant>,
    cost: f64,
    best_plan: Option<Plan>,
    switched: RoaringBitmap,
    rng: Option<SmallRng>,
}

/// How many filters to calculate using brute force. The remaining filters
/// are selected using a greedy algorithm with a runtime of
/// `(1 + 2 + ... + n) = n (n-1) / 2` for `n` filters; the brute-force
/// algorithm has a runtime of `n (n-1) ... (n-m)` when calculating `m` of
/// `n` total. The combined runtime must stay under the work budget.
fn max_brute_force_filters(filter_count: usize) -> usize {
    let mut i = 0;
    let mut j = filter_count as u64;
    let mut total = filter_count as u64;
    while j > 0 && total.saturating_mul(j * (j - 1) / 2) < MAX_BRUTE_FORCE as u64 {
        j -= 1;
        total = total.saturating_mul(j);
        i += 1;
    }
    i
}

impl<'a> Optimizer<'a> {
    pub fn new(filters: &'a mut [TableFilter], force_join_order: bool) -> Self {
        Self {
            filters,
            force_join_order,
            start: None,
            cost: -1.0,
            best_plan: None,
            switched: RoaringBitmap::new(),
            rng: None,
        }
    }

    /// Calculates the best plan and wires it onto the filters. With
    /// `parse_only` the input order is kept and only the access paths are
    /// resolved.
    pub fn optimize(&mut self, parse_only: bool) -> Result<Plan> {
        if parse_only {
            self.best_plan = Some(Plan::fake(self.filters)?);
        } else {
            self.calculate_best_plan()?;
        }
        let plan = self
            .best_plan
            .take()
            .expect("search always produces a plan");
        plan.apply(self.filters);
        Ok(plan)
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    fn calculate_best_plan(&mut self) -> Result<()> {
        self.cost = -1.0;
        if self.filters.len() == 1 || self.force_join_order {
            let order: Vec<usize> = (0..self.filters.len()).collect();
            self.test_plan(&order)?;
        } else {
            self.start = Some(Instant::now());
            if self.filters.len() <= MAX_BRUTE_FORCE_FILTERS {
                self.calculate_brute_force_all()?;
            } else {
                self.calculate_brute_force_some()?;
                self.rng = Some(SmallRng::seed_from_u64(0));
                self.calculate_genetic()?;
            }
        }
        Ok(())
    }

    fn can_stop(&self, x: usize) -> bool {
        if x & 127 != 0 {
            return false;
        }
        // don't calculate for simple queries (no rows or so)
        if self.cost < 0.0 {
            return false;
        }
        let elapsed = self
            .start
            .map_or(0u128, |s| s.elapsed().as_nanos());
        // 100 microseconds * cost
        elapsed > (self.cost * 100_000.0) as u128
    }

    fn calculate_brute_force_all(&mut self) -> Result<()> {
        let ids: Vec<usize> = (0..self.filters.len()).collect();
        let mut permutations = Permutations::create(ids);
        let mut list = Vec::new();
        let mut x = 0;
        while !self.can_stop(x) && permutations.next(&mut list) {
            self.test_plan(&list)?;
            x += 1;
        }
        Ok(())
    }

    fn calculate_brute_force_some(&mut self) -> Result<()> {
        let n = self.filters.len();
        let brute_force = max_brute_force_filters(n);
        let ids: Vec<usize> = (0..n).collect();
        let mut permutations = Permutations::create_partial(ids, brute_force);
        let mut prefix = Vec::new();
        let mut x = 0;
        while !self.can_stop(x) && permutations.next(&mut prefix) {
            let mut list = prefix.clone();
            for filter in self.filters.iter_mut() {
                filter.set_used(false);
            }
            for &f in &list {
                self.filters[f].set_used(true);
            }
            // fill the remaining positions greedily with the unused filter
            // that minimizes the incremental plan cost
            for i in brute_force..n {
                let mut cost_part = -1.0_f64;
                let mut best_part = None;
                for j in 0..n {
                    if self.filters[j].is_used() {
                        continue;
                    }
                    if i == n - 1 {
                        best_part = Some(j);
                        break;
                    }
                    list.push(j);
                    let cost_now = Plan::calculate(self.filters, &list)?.cost();
                    list.pop();
                    if cost_part < 0.0 || cost_now < cost_part {
                        cost_part = cost_now;
                        best_part = Some(j);
                    }
                }
                let best = best_part.expect("an unused filter remains");
                self.filters[best].set_used(true);
                list.push(best);
            }
            self.test_plan(&list)?;
            x += 1;
        }
        Ok(())
    }

    fn calculate_genetic(&mut self) -> Result<()> {
        let n = self.filters.len();
        let mut best: Vec<usize> = self
            .best_plan
            .as_ref()
            .map(|p| p.order().to_vec())
            .unwrap_or_else(|| (0..n).collect());
        let mut list = vec![0usize; n];
        for x in 0..MAX_GENETIC {
            if self.can_stop(x) {
                break;
            }
            let mut generate_random = x & 127 == 0;
            if !generate_random {
                list.copy_from_slice(&best);
                if !self.shuffle_two(&mut list) {
                    generate_random = true;
                }
            }
            if generate_random {
                self.switched.clear();
                best = (0..n).collect();
                self.shuffle_all(&mut best);
                list.copy_from_slice(&best);
            }
            if self.test_plan(&list)? {
                self.switched.clear();
                best.copy_from_slice(&list);
            }
        }
        Ok(())
    }

    /// Costs one ordering; keeps it when it beats the best so far.
    fn test_plan(&mut self, order: &[usize]) -> Result<bool> {
        let plan = Plan::calculate(self.filters, order)?;
        let cost_now = plan.cost();
        if self.cost < 0.0 || cost_now < self.cost {
            trace!(cost = cost_now, ?order, "better plan");
            self.cost = cost_now;
            self.best_plan = Some(plan);
            return Ok(true);
        }
        Ok(false)
    }

    fn shuffle_all(&mut self, f: &mut [usize]) {
        let rng = self.rng.as_mut().expect("genetic phase seeds the rng");
        for i in 0..f.len() - 1 {
            let j = i + rng.gen_range(0..f.len() - i);
            if j != i {
                f.swap(i, j);
            }
        }
    }

    /// Swaps two positions not previously swapped; gives up after 20 draws.
    fn shuffle_two(&mut self, f: &mut [usize]) -> bool {
        let rng = self.rng.as_mut().expect("genetic phase seeds the rng");
        let n = f.len();
        let mut a = 0;
        let mut b = 0;
        let mut i = 0;
        while i < 20 {
            a = rng.gen_range(0..n);
            b = rng.gen_range(0..n);
            if a == b {
                i += 1;
                continue;
            }
            if a < b {
                std::mem::swap(&mut a, &mut b);
            }
            let s = (a * n + b) as u32;
            if self.switched.contains(s) {
                i += 1;
                continue;
            }
            self.switched.insert(s);
            break;
        }
        if i == 20 {
            return false;
        }
        f.swap(a, b);
        true
    }
}
