//! Post-build transform pipeline.

use std::fmt;
use std::sync::Arc;

use crate::error::TransformError;

type StageFn = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

/// One content transform. Cheap to clone.
#[derive(Clone)]
pub struct TransformStage {
    f: Arc<StageFn>,
}

impl TransformStage {
    /// Wrap an infallible function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(move |code: &str| Ok(f(code))),
        }
    }

    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn apply(&self, code: &str) -> anyhow::Result<String> {
        (self.f)(code)
    }
}

impl fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransformStage")
    }
}

/// Ordered stage history; applied left to right.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    stages: Vec<TransformStage>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: TransformStage) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold every stage over `code`. Nothing partial escapes: either all
    /// stages succeed or the first failure is returned.
    pub fn apply(&self, code: &str) -> Result<String, TransformError> {
        let mut current = code.to_string();
        for (index, stage) in self.stages.iter().enumerate() {
            current = run_stage(stage, index, &current)?;
        }
        Ok(current)
    }
}

/// Run one stage, tagging a failure with its pipeline position.
pub(crate) fn run_stage(stage: &TransformStage, index: usize, code: &str) -> Result<String, TransformError> {
    stage.apply(code).map_err(|e| TransformError {
        stage: index,
        source: e.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pipeline_is_identity() {
        assert_eq!(TransformPipeline::new().apply("abc").unwrap(), "abc");
    }

    #[test]
    fn test_stages_fold_in_order() {
        let mut pipeline = TransformPipeline::new();
        pipeline.register(TransformStage::new(|c| c.replace('a', "b")));
        pipeline.register(TransformStage::new(|c| c.replace('b', "c")));
        assert_eq!(pipeline.apply("a").unwrap(), "c");

        let mut reversed = TransformPipeline::new();
        reversed.register(TransformStage::new(|c| c.replace('b', "c")));
        reversed.register(TransformStage::new(|c| c.replace('a', "b")));
        assert_eq!(reversed.apply("a").unwrap(), "b");
    }

    #[test]
    fn test_failure_names_the_stage() {
        let mut pipeline = TransformPipeline::new();
        pipeline.register(TransformStage::new(|c| format!("{c}!")));
        pipeline.register(TransformStage::fallible(|_| anyhow::bail!("refusing")));
        let err = pipeline.apply("x").unwrap_err();
        assert_eq!(err.stage, 1);
        assert!(err.to_string().contains("refusing"));
    }
}
