//! The tick loop.
//!
//! A job runs `plan.units` units of work. Before each unit the executor waits
//! for the next tick or for the context to end, whichever comes first; when
//! both are ready the cancellation wins. A unit already in flight is allowed
//! to finish, nothing after it is started. A panicking behavior fails the job.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::args::{BoundArgs, bind};
use super::{JobContext, JobEvent, JobOutcome, ProgressEvent};
use crate::model::Command;

/// How many units to run and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub units: u64,
    pub interval: Duration,
}

/// The behavior behind a command path.
pub trait Behavior: Send + Sync {
    /// Decide the schedule for these arguments. An error fails the job.
    fn plan(&self, args: &BoundArgs) -> anyhow::Result<Plan>;

    /// Run one unit. The returned message travels with the progress event.
    fn step<'a>(
        &'a self,
        unit: u64,
        args: &'a BoundArgs,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
}

/// Emits `Started` on open and `Finished` exactly once on drop.
struct Boundary<'a> {
    job_id: &'a str,
    events: &'a UnboundedSender<JobEvent>,
    outcome: Option<JobOutcome>,
}

impl<'a> Boundary<'a> {
    fn open(job_id: &'a str, events: &'a UnboundedSender<JobEvent>) -> Self {
        info!(job = job_id, "running");
        let _ = events.send(JobEvent::Started { at: Utc::now() });
        Self {
            job_id,
            events,
            outcome: None,
        }
    }

    fn close(mut self, outcome: JobOutcome) -> JobOutcome {
        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for Boundary<'_> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| JobOutcome::failed("job aborted before reporting an outcome"));
        info!(job = self.job_id, state = %outcome.state(), "finished");
        let _ = self.events.send(JobEvent::Finished {
            outcome,
            at: Utc::now(),
        });
    }
}

/// Run `behavior` for `command` with raw `arguments`.
///
/// Events go to `events` in order: `Started`, zero or more `Progress`, then
/// one `Finished` carrying the same outcome this function returns.
pub async fn execute(
    ctx: &JobContext,
    command: &Command,
    behavior: &dyn Behavior,
    arguments: &HashMap<String, String>,
    events: &UnboundedSender<JobEvent>,
) -> JobOutcome {
    let boundary = Boundary::open(ctx.job_id(), events);
    let outcome = run_units(ctx, command, behavior, arguments, events).await;
    boundary.close(outcome)
}

async fn run_units(
    ctx: &JobContext,
    command: &Command,
    behavior: &dyn Behavior,
    arguments: &HashMap<String, String>,
    events: &UnboundedSender<JobEvent>,
) -> JobOutcome {
    let args = match bind(&command.fields, arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(job = ctx.job_id(), command = %command.name, "argument binding failed: {e}");
            return JobOutcome::failed(e.to_string());
        }
    };
    let plan = match panic::catch_unwind(AssertUnwindSafe(|| behavior.plan(&args))) {
        Ok(Ok(plan)) => plan,
        Ok(Err(e)) => return JobOutcome::failed(format!("{e:#}")),
        Err(_) => return panicked(ctx),
    };
    if plan.interval.is_zero() {
        return JobOutcome::failed("tick interval must be greater than zero");
    }
    debug!(job = ctx.job_id(), units = plan.units, interval = ?plan.interval, "planned");

    let mut ticker = tokio::time::interval_at(Instant::now() + plan.interval, plan.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for seq in 0..plan.units {
        tokio::select! {
            biased;
            reason = ctx.done() => {
                debug!(job = ctx.job_id(), seq, ?reason, "cancellation observed");
                return JobOutcome::Cancelled { reason };
            }
            _ = ticker.tick() => {}
        }
        let step = match AssertUnwindSafe(behavior.step(seq, &args))
            .catch_unwind()
            .await
        {
            Ok(step) => step,
            Err(_) => return panicked(ctx),
        };
        match step {
            Ok(message) => {
                debug!(job = ctx.job_id(), seq, "progress");
                let _ = events.send(JobEvent::Progress(ProgressEvent {
                    seq,
                    message,
                    at: Utc::now(),
                }));
            }
            Err(e) => return JobOutcome::failed(format!("{e:#}")),
        }
    }
    JobOutcome::Completed
}

fn panicked(ctx: &JobContext) -> JobOutcome {
    warn!(job = ctx.job_id(), "command panicked");
    JobOutcome::failed("command panicked")
}
