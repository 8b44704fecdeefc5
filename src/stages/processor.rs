use async_trait::async_trait;

use crate::error::PipelineResult;
use crate::messaging::EventData;

/// The work one pipeline stage performs.
///
/// Receives the request payload and returns fields to add to the
/// completion event. An `Err` leaves the request to the consumer's
/// failure policy.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn process(&self, payload: &EventData) -> PipelineResult<EventData>;
}

/// Completes immediately without output
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl StageProcessor for PassthroughProcessor {
    async fn process(&self, _payload: &EventData) -> PipelineResult<EventData> {
        Ok(EventData::new())
    }
}

/// Adapts a synchronous closure
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&EventData) -> PipelineResult<EventData> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> StageProcessor for FnProcessor<F>
where
    F: Fn(&EventData) -> PipelineResult<EventData> + Send + Sync,
{
    async fn process(&self, payload: &EventData) -> PipelineResult<EventData> {
        (self.f)(payload)
    }
}
