//! Step chains per operation kind.

use std::collections::HashMap;
use std::sync::Arc;

use upgrader_state::OperationKind;

use crate::step::{ErrorClass, Step, StepError};

/// Decides whether a step error is retryable.
pub type Classifier = fn(&StepError) -> ErrorClass;

/// Trusts the class the step assigned.
pub fn classify_by_step(error: &StepError) -> ErrorClass {
    error.class()
}

/// Everything the executor needs to know about one operation kind.
#[derive(Clone)]
pub struct OperationCapability {
    pub kind: OperationKind,
    /// Ordered chain; names must be unique within the chain.
    pub steps: Vec<Arc<dyn Step>>,
    pub classify: Classifier,
}

impl OperationCapability {
    pub fn new(kind: OperationKind, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            kind,
            steps,
            classify: classify_by_step,
        }
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    pub fn first_step(&self) -> Option<&str> {
        self.steps.first().map(|s| s.name())
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Name of the step after `name`, or `None` when `name` is the last.
    pub fn next_step(&self, name: &str) -> Option<&str> {
        let index = self.steps.iter().position(|s| s.name() == name)?;
        self.steps.get(index + 1).map(|s| s.name())
    }
}

#[derive(Clone, Default)]
pub struct StepRegistry {
    kinds: HashMap<OperationKind, OperationCapability>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the chain for `capability.kind`.
    pub fn register(&mut self, capability: OperationCapability) {
        self.kinds.insert(capability.kind, capability);
    }

    pub fn with(mut self, capability: OperationCapability) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<&OperationCapability> {
        self.kinds.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepContext, StepOutput};
    use async_trait::async_trait;
    use upgrader_state::RuntimeOperation;

    struct Named(&'static str);

    #[async_trait]
    impl Step for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(
            &self,
            operation: RuntimeOperation,
            _ctx: &StepContext,
        ) -> Result<StepOutput, StepError> {
            Ok(StepOutput::done(operation))
        }
    }

    #[test]
    fn chain_navigation() {
        let capability = OperationCapability::new(
            OperationKind::UpgradeKyma,
            vec![Arc::new(Named("a")), Arc::new(Named("b"))],
        );
        assert_eq!(capability.first_step(), Some("a"));
        assert_eq!(capability.next_step("a"), Some("b"));
        assert_eq!(capability.next_step("b"), None);
        assert_eq!(capability.next_step("zzz"), None);
        assert!(capability.step("b").is_some());

        let registry = StepRegistry::new().with(capability);
        assert!(registry.get(OperationKind::UpgradeKyma).is_some());
        assert!(registry.get(OperationKind::Provisioning).is_none());
    }

    #[test]
    fn custom_classifier_overrides_step() {
        fn everything_permanent(_: &StepError) -> ErrorClass {
            ErrorClass::Permanent
        }
        let capability = OperationCapability::new(OperationKind::UpgradeKyma, vec![])
            .with_classifier(everything_permanent);
        let err = StepError::transient(anyhow::anyhow!("flaky"));
        assert_eq!((capability.classify)(&err), ErrorClass::Permanent);
    }
}
