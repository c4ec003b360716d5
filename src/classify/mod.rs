//! Signature classifier
//!
//! Turns a computation into an [`ExecutionPlan`] and caches the plan by
//! signature. Two computations that normalize to the same signature share a
//! plan, including the kernel linked by whichever of them was classified
//! first.

pub mod plan;
pub mod recognized;
pub mod signature;

pub use plan::{ExecutionPlan, PlanCache, PlanExecutor, Strategy};
pub use recognized::RecognizedOp;
pub use signature::Signature;

use crate::accel::AccelerationGateway;
use crate::task::Computation;
use std::sync::Arc;
use tracing::debug;

/// Owns its plan cache; plans may embed this classifier's gateway, so a
/// cache is never shared between classifiers.
pub struct SignatureClassifier {
    cache: PlanCache,
    gateway: Option<Arc<dyn AccelerationGateway>>,
}

impl SignatureClassifier {
    pub fn new(gateway: Option<Arc<dyn AccelerationGateway>>) -> Self {
        Self::with_cache(PlanCache::new(), gateway)
    }

    /// Classifier starting from a prepared cache
    pub fn with_cache(
        cache: PlanCache,
        gateway: Option<Arc<dyn AccelerationGateway>>,
    ) -> Self {
        Self { cache, gateway }
    }

    /// Plan for a computation. Never fails: anything unrecognized is isolated.
    pub fn classify(&self, computation: &Computation) -> Arc<ExecutionPlan> {
        let signature = Signature::normalize(computation.source());
        if let Some(plan) = self.cache.get(&signature) {
            return plan;
        }

        self.cache
            .get_or_insert_with(signature.clone(), || self.build_plan(signature, computation))
    }

    fn build_plan(&self, signature: Signature, computation: &Computation) -> ExecutionPlan {
        if let Some(op) = RecognizedOp::recognize(&signature) {
            debug!(signature = %signature, op = ?op, "Classified as recognized");
            return ExecutionPlan {
                signature,
                executor: PlanExecutor::Recognized(op),
                cached_text: None,
            };
        }

        let cached_text = Some(Arc::<str>::from(computation.source()));
        let kernel = computation.kernel().cloned();

        if let Some(gateway) = &self.gateway {
            if gateway.supports(&signature) {
                if gateway.is_available() {
                    debug!(
                        signature = %signature,
                        gateway = gateway.name(),
                        "Classified as accelerated"
                    );
                    return ExecutionPlan {
                        signature,
                        executor: PlanExecutor::Accelerated {
                            gateway: gateway.clone(),
                            fallback: kernel,
                        },
                        cached_text,
                    };
                }
                debug!(signature = %signature, "Gateway unavailable, degrading to isolated");
            }
        }

        debug!(signature = %signature, linked = kernel.is_some(), "Classified as isolated");
        ExecutionPlan {
            signature,
            executor: PlanExecutor::Isolated(kernel),
            cached_text,
        }
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    pub fn gateway(&self) -> Option<&Arc<dyn AccelerationGateway>> {
        self.gateway.as_ref()
    }

    /// Whether a gateway is attached and currently accepting work
    pub fn acceleration_available(&self) -> bool {
        self.gateway.as_ref().is_some_and(|g| g.is_available())
    }

    /// Drop every cached plan
    pub fn reset(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::NativeGateway;
    use serde_json::json;

    #[test]
    fn test_same_computation_returns_identical_plan() {
        let classifier = SignatureClassifier::new(None);
        let computation = Computation::new("v => v.id", |v| Ok(v["id"].clone()));

        let first = classifier.classify(&computation);
        let second = classifier.classify(&computation);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(classifier.cache().len(), 1);
        assert_eq!(classifier.cache().misses(), 1);
        assert_eq!(classifier.cache().hits(), 1);
    }

    #[test]
    fn test_formatting_variants_share_a_plan() {
        let classifier = SignatureClassifier::new(None);
        let a = classifier.classify(&Computation::from_source("x => x * 2"));
        let b = classifier.classify(&Computation::from_source("(x)=>{ return x*2; }"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_priority_order() {
        let gateway: Arc<dyn AccelerationGateway> = Arc::new(NativeGateway::new());
        let classifier = SignatureClassifier::new(Some(gateway));

        let recognized = classifier.classify(&Computation::from_source("x => x + 1"));
        assert_eq!(recognized.strategy(), Strategy::Recognized);

        let accelerated =
            classifier.classify(&Computation::from_source("xs => xs.map(x => x * 2)"));
        assert_eq!(accelerated.strategy(), Strategy::Accelerated);

        let isolated =
            classifier.classify(&Computation::new("x => x.name", |v| Ok(v["name"].clone())));
        assert_eq!(isolated.strategy(), Strategy::Isolated);
        assert!(isolated.worker_kernel().is_some());
        assert_eq!(isolated.cached_text.as_deref(), Some("x => x.name"));
    }

    #[test]
    fn test_offline_gateway_degrades_to_isolated() {
        let native = Arc::new(NativeGateway::new());
        native.set_available(false);
        let classifier = SignatureClassifier::new(Some(native.clone()));

        let plan =
            classifier.classify(&Computation::new("xs => Math.max(...xs)", |_| Ok(json!(0))));
        assert_eq!(plan.strategy(), Strategy::Isolated);
        assert!(!classifier.acceleration_available());
    }

    #[test]
    fn test_malformed_source_is_isolated() {
        let classifier = SignatureClassifier::new(None);
        let plan = classifier.classify(&Computation::from_source("=> => ((("));
        assert_eq!(plan.strategy(), Strategy::Isolated);
        assert!(plan.worker_kernel().is_none());
    }

    #[test]
    fn test_reset_rebuilds_plans() {
        let classifier = SignatureClassifier::with_cache(PlanCache::new(), None);

        let before = classifier.classify(&Computation::from_source("x => x * 3"));
        classifier.reset();
        assert!(classifier.cache().is_empty());
        assert_eq!(classifier.cache().misses(), 0);

        let rebuilt = classifier.classify(&Computation::from_source("x=>x*3"));
        assert!(!Arc::ptr_eq(&before, &rebuilt));
        assert_eq!(classifier.cache().len(), 1);
    }

    #[test]
    fn test_classifiers_do_not_share_plans() {
        let gateway: Arc<dyn AccelerationGateway> = Arc::new(NativeGateway::new());
        let accelerated = SignatureClassifier::new(Some(gateway));
        let plain = SignatureClassifier::new(None);
        let doubled = Computation::from_source("xs => xs.map(x => x * 2)");

        assert_eq!(accelerated.classify(&doubled).strategy(), Strategy::Accelerated);
        let plan = plain.classify(&doubled);
        assert_eq!(plan.strategy(), Strategy::Isolated);
        assert!(plan.worker_kernel().is_none());
    }

    #[test]
    fn test_shared_signature_keeps_first_kernel() {
        let classifier = SignatureClassifier::new(None);
        let first = Computation::new("x => scale(x)", |_| Ok(json!("first")));
        let second = Computation::new("x => scale(x)", |_| Ok(json!("second")));

        classifier.classify(&first);
        let plan = classifier.classify(&second);
        let kernel = plan.worker_kernel().unwrap();
        assert_eq!(kernel(&json!(1)), Ok(json!("first")));
    }
}
