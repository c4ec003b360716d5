use super::recognized::RecognizedOp;
use super::signature::Signature;
use crate::accel::AccelerationGateway;
use crate::task::Kernel;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How a signature's computations are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Inline, via the closed operation registry
    Recognized,
    /// Through the acceleration gateway
    Accelerated,
    /// On a worker context
    Isolated,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Recognized => "recognized",
            Strategy::Accelerated => "accelerated",
            Strategy::Isolated => "isolated",
        }
    }
}

#[derive(Clone)]
pub enum PlanExecutor {
    Recognized(RecognizedOp),
    /// `fallback` is the linked kernel used if the gateway fails
    Accelerated {
        gateway: Arc<dyn AccelerationGateway>,
        fallback: Option<Kernel>,
    },
    /// `None` when the computation was classified without a linked kernel
    Isolated(Option<Kernel>),
}

/// Cached decision for one signature. Read-only once built.
#[derive(Clone)]
pub struct ExecutionPlan {
    pub signature: Signature,
    pub executor: PlanExecutor,
    /// Source text shipped to worker contexts with each dispatch
    pub cached_text: Option<Arc<str>>,
}

impl ExecutionPlan {
    pub fn strategy(&self) -> Strategy {
        match self.executor {
            PlanExecutor::Recognized(_) => Strategy::Recognized,
            PlanExecutor::Accelerated { .. } => Strategy::Accelerated,
            PlanExecutor::Isolated(_) => Strategy::Isolated,
        }
    }

    /// Kernel a worker would run for this plan, if one was linked
    pub fn worker_kernel(&self) -> Option<&Kernel> {
        match &self.executor {
            PlanExecutor::Recognized(_) => None,
            PlanExecutor::Accelerated { fallback, .. } => fallback.as_ref(),
            PlanExecutor::Isolated(kernel) => kernel.as_ref(),
        }
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let executor = match &self.executor {
            PlanExecutor::Recognized(op) => format!("{op:?}"),
            PlanExecutor::Accelerated { gateway, .. } => format!("gateway:{}", gateway.name()),
            PlanExecutor::Isolated(kernel) => format!("worker(linked={})", kernel.is_some()),
        };
        f.debug_struct("ExecutionPlan")
            .field("signature", &self.signature)
            .field("strategy", &self.strategy())
            .field("executor", &executor)
            .finish()
    }
}

/// Append-only signature -> plan map
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<Signature, Arc<ExecutionPlan>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &Signature) -> Option<Arc<ExecutionPlan>> {
        let plan = self.plans.get(signature).map(|entry| entry.value().clone());
        if plan.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        plan
    }

    /// Return the cached plan or insert the one built by `build`.
    /// Concurrent callers for the same signature all get the first plan stored.
    pub fn get_or_insert_with<F>(&self, signature: Signature, build: F) -> Arc<ExecutionPlan>
    where
        F: FnOnce() -> ExecutionPlan,
    {
        self.plans
            .entry(signature)
            .or_insert_with(|| {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Arc::new(build())
            })
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Full reset; the only way a cached plan is ever dropped
    pub fn clear(&self) {
        self.plans.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
