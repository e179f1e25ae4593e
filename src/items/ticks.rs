//! The tick counter: integer time since the first commit.

use crate::error::{Result, StrataError};
use crate::pipeline::{DEPENDENCY_TICK, Deps, Fact, Facts, PipelineItem};
use crate::status::MERGE_MARK;

/// Provides [`DEPENDENCY_TICK`]: `floor((commit_time − t0) / tick_size)`,
/// where `t0` is the earliest commit time of the run.
#[derive(Clone, Debug, Default)]
pub struct TicksItem {
    tick_size_secs: i64,
    t0: i64,
}

impl PipelineItem for TicksItem {
    fn name(&self) -> &'static str {
        "ticks"
    }

    fn provides(&self) -> &'static [&'static str] {
        &[DEPENDENCY_TICK]
    }

    fn configure(&mut self, facts: &mut Facts) -> Result<()> {
        if facts.config.tick_size_secs <= 0 {
            return Err(StrataError::config(format!(
                "tick size must be positive, got {}s",
                facts.config.tick_size_secs
            )));
        }
        self.tick_size_secs = facts.config.tick_size_secs;
        self.t0 = facts
            .commits
            .iter()
            .map(|c| c.timestamp)
            .min()
            .unwrap_or(0);
        Ok(())
    }

    fn consume(&mut self, deps: &mut Deps) -> Result<()> {
        let commit = deps.commit()?;
        // Clock skew can put a child before t0; clamp rather than go negative.
        let elapsed = (commit.timestamp - self.t0).max(0);
        let tick = elapsed / self.tick_size_secs;
        if tick >= i64::from(MERGE_MARK) {
            return Err(StrataError::config(format!(
                "history spans {tick} ticks which exceeds the representable {}; \
                 increase --tick-size",
                MERGE_MARK - 1
            )));
        }
        deps.insert(DEPENDENCY_TICK, Fact::Tick(tick));
        Ok(())
    }

    fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
        (0..n)
            .map(|_| Box::new(self.as_ref().clone()) as Box<dyn PipelineItem>)
            .collect()
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}
