use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::Step;

/// What a handler reports back after running a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Cost the step declares it incurred.
    #[serde(default)]
    pub cost: f64,
    /// Optional structured data returned by the tool.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl StepOutput {
    pub fn new(cost: f64, data: Value) -> Self {
        Self { cost, data }
    }
}

/// Trait implemented by anything that can run one kind of step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, step: &Step) -> anyhow::Result<StepOutput>;
}

/// Adapter turning a plain closure into a [`StepHandler`].
pub struct FnHandler<F>(F);

/// Wrap a synchronous closure as a step handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Step) -> anyhow::Result<StepOutput> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&Step) -> anyhow::Result<StepOutput> + Send + Sync,
{
    async fn handle(&self, step: &Step) -> anyhow::Result<StepOutput> {
        (self.0)(step)
    }
}
