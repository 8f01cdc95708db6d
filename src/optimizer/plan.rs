//! # Plans and Table Filters
//!
//! A [`TableFilter`] is one table reference in a query, carrying the
//! per-column condition masks the planner extracted and, once optimization
//! has run, the chosen access path ([`PlanItem`]) and its position in the
//! join chain.
//!
//! A [`Plan`] is an ordered sequence of filters with a scalar cost. Plans
//! are ephemeral: the optimizer builds many candidates, keeps the cheapest,
//! and transfers its decisions back onto the filters.
//!
//! ## Cost Model
//!
//! ```text
//! cost = 1
//! for each filter in order:
//!     cost += cost * best_index_cost(filter)
//! ```
//!
//! Early tables multiply through everything after them, which is what makes
//! join order matter: the compounding strongly rewards putting selective
//! filters first. Every index cost is strictly positive, so the compound is
//! monotone: adding a restricting index predicate can only lower (or keep)
//! a plan's cost.

use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::engine::Table;
use crate::error::DbError;
use crate::index::mask;

/// The chosen access path for one filter.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub index_id: u32,
    pub index_name: String,
    pub cost: f64,
    /// False for equality-only indexes (hash): their conditions must be
    /// exact matches and anything else is unusable.
    pub can_scan: bool,
}

/// One table reference with its access predicates.
pub struct TableFilter {
    id: usize,
    table: Arc<RwLock<Table>>,
    masks: Vec<u32>,
    used: bool,
    join: Option<usize>,
    plan_item: Option<PlanItem>,
}

impl TableFilter {
    pub fn new(id: usize, table: Arc<RwLock<Table>>, masks: Vec<u32>) -> Self {
        Self {
            id,
            table,
            masks,
            used: false,
            join: None,
            plan_item: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn table(&self) -> &Arc<RwLock<Table>> {
        &self.table
    }

    pub fn masks(&self) -> &[u32] {
        &self.masks
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    /// Next filter in the join chain after optimization.
    pub fn join(&self) -> Option<usize> {
        self.join
    }

    pub fn add_join(&mut self, next: usize) {
        self.join = Some(next);
    }

    pub fn plan_item(&self) -> Option<&PlanItem> {
        self.plan_item.as_ref()
    }

    pub fn set_plan_item(&mut self, item: PlanItem) {
        self.plan_item = Some(item);
    }

    /// Cheapest access path for this filter's masks. Every cost reported by
    /// an index must be strictly positive.
    pub fn best_plan_item(&self) -> Result<PlanItem> {
        let table = self.table.read();
        let mut best: Option<PlanItem> = None;
        for index in table.indexes() {
            let cost = index.get_cost(&self.masks);
            if cost <= 0.0 {
                return Err(DbError::internal(format!(
                    "index {} reported non-positive cost {cost}",
                    index.name()
                )));
            }
            if best.as_ref().is_none_or(|b| cost < b.cost) {
                best = Some(PlanItem {
                    index_id: index.id(),
                    index_name: index.name().to_string(),
                    cost,
                    can_scan: index.can_scan(),
                });
            }
        }
        best.ok_or_else(|| DbError::internal("table has no access path"))
    }

    /// Drops condition masks the chosen index cannot evaluate: an
    /// equality-only index keeps the equality bit and loses range bounds.
    pub fn remove_unusable_index_conditions(&mut self) {
        let Some(item) = &self.plan_item else {
            return;
        };
        if !item.can_scan {
            for m in &mut self.masks {
                *m &= mask::EQUALITY;
            }
        }
    }
}

/// An ordered sequence of filters with the per-filter index choices and the
/// estimated total cost.
#[derive(Debug, Clone)]
pub struct Plan {
    order: SmallVec<[usize; 8]>,
    items: Vec<PlanItem>,
    cost: f64,
}

impl Plan {
    /// Costs the given filter ordering.
    pub fn calculate(filters: &[TableFilter], order: &[usize]) -> Result<Self> {
        let mut cost = 1.0_f64;
        let mut items = Vec::with_capacity(order.len());
        for &filter_id in order {
            let item = filters[filter_id].best_plan_item()?;
            cost += cost * item.cost;
            items.push(item);
        }
        Ok(Self {
            order: SmallVec::from_slice(order),
            items,
            cost,
        })
    }

    /// Builds a plan over the given order without costing it (parse-only
    /// optimization).
    pub fn fake(filters: &[TableFilter]) -> Result<Self> {
        let order: SmallVec<[usize; 8]> = (0..filters.len()).collect();
        let mut items = Vec::with_capacity(filters.len());
        for filter in filters {
            items.push(filter.best_plan_item()?);
        }
        Ok(Self {
            order,
            items,
            cost: -1.0,
        })
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn item_for(&self, filter_id: usize) -> Option<&PlanItem> {
        self.order
            .iter()
            .position(|&f| f == filter_id)
            .map(|i| &self.items[i])
    }

    /// Applies this plan onto the filters: prune unusable conditions, chain
    /// the join order, and hand each filter its access path.
    pub fn apply(&self, filters: &mut [TableFilter]) {
        for window in self.order.windows(2) {
            filters[window[0]].add_join(window[1]);
        }
        for (position, &filter_id) in self.order.iter().enumerate() {
            filters[filter_id].set_plan_item(self.items[position].clone());
            filters[filter_id].remove_unusable_index_conditions();
        }
    }
}
