use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{executor::Executor, report::RunReport, workflow::Workflow};

/// A named workflow, ready to be handed to an [`Executor`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario<W>
where
    W: Workflow,
{
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(transform = |workflow: W| Arc::new(workflow)))]
    pub workflow: Arc<W>,
}

impl<W> Scenario<W>
where
    W: Workflow,
{
    pub fn new(name: impl Into<String>, workflow: W) -> Self {
        Self {
            name: name.into(),
            workflow: Arc::new(workflow),
        }
    }

    /// Run this scenario on `executor`.
    pub async fn run<E: Executor<W>>(&self, executor: &E) -> Result<RunReport, E::Error> {
        executor.exec(self).await
    }
}
