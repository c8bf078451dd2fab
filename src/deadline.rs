//! Per-execution deadline derived from ambient time budgets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ceiling applied when no operation-level budget overrides it: 15 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Where a time budget was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    /// Innermost budget around a single operation (keyword timeout).
    Operation,
    /// Outer budget around the whole test.
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    pub scope: BudgetScope,
    pub active: bool,
    pub remaining: Duration,
}

impl TimeBudget {
    #[must_use]
    pub fn active(scope: BudgetScope, remaining: Duration) -> Self {
        Self {
            scope,
            active: true,
            remaining,
        }
    }

    #[must_use]
    pub fn inactive(scope: BudgetScope, remaining: Duration) -> Self {
        Self {
            scope,
            active: false,
            remaining,
        }
    }
}

/// Supplies the host's ambient time budgets; consulted once per execution.
pub trait BudgetSource: Send + Sync {
    fn budgets(&self) -> Vec<TimeBudget>;
}

/// No ambient budgets: every execution uses the ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBudgets;

impl BudgetSource for NoBudgets {
    fn budgets(&self) -> Vec<TimeBudget> {
        Vec::new()
    }
}

/// Budgets set explicitly by the host, replaceable between executions.
#[derive(Debug, Clone, Default)]
pub struct FixedBudgets {
    budgets: Arc<Mutex<Vec<TimeBudget>>>,
}

impl FixedBudgets {
    #[must_use]
    pub fn new(budgets: Vec<TimeBudget>) -> Self {
        Self {
            budgets: Arc::new(Mutex::new(budgets)),
        }
    }

    pub fn set(&self, budgets: Vec<TimeBudget>) {
        let mut guard = match self.budgets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = budgets;
    }
}

impl BudgetSource for FixedBudgets {
    fn budgets(&self) -> Vec<TimeBudget> {
        match self.budgets.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Resolve the deadline for the next execution.
///
/// An active operation budget is used verbatim, even above the ceiling. Otherwise an
/// active test budget is capped by the ceiling. Without either, the ceiling applies.
/// A zero budget or ceiling counts as absent. `None` means no deadline at all.
#[must_use]
pub fn resolve_deadline(budgets: &[TimeBudget], ceiling: Option<Duration>) -> Option<Duration> {
    let remaining = |scope: BudgetScope| {
        budgets
            .iter()
            .find(|b| b.active && b.scope == scope && !b.remaining.is_zero())
            .map(|b| b.remaining)
    };
    let ceiling = ceiling.filter(|c| !c.is_zero());

    if let Some(operation) = remaining(BudgetScope::Operation) {
        return Some(operation);
    }
    match (remaining(BudgetScope::Test), ceiling) {
        (Some(test), Some(ceiling)) => Some(test.min(ceiling)),
        (Some(test), None) => Some(test),
        (None, ceiling) => ceiling,
    }
}
