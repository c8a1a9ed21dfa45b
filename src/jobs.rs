//! PERIODIC JOBS
//!
//! Every job implements [`Job`] and is driven by its own task with a fixed
//! delay: the delay starts counting once the previous run has finished, so a
//! slow run pushes the next one back instead of piling up.
//!
//! Jobs never overlap with themselves. [`ScheduledJob::tick`] takes the
//! job's guard without waiting and skips the run if it is already held.
//! Different jobs run concurrently and only share the database.
//!
//! To add a job, implement [`Job`] in `src/handlers/` and list it in
//! [`jobs`] with its schedule.

use crate::config::Config;
use crate::handlers::{AssignMergeRequests, Context, UpdateUsers};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument as _;
use tracing as log;

// How long a crashed job task waits before it is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &Context) -> anyhow::Result<()>;
}

/// A job together with its timing and its execution guard.
pub struct ScheduledJob {
    job: Box<dyn Job>,
    initial_delay: Duration,
    delay: Duration,
    running: Mutex<()>,
}

impl ScheduledJob {
    pub fn new(job: Box<dyn Job>, initial_delay: Duration, delay: Duration) -> Self {
        ScheduledJob {
            job,
            initial_delay,
            delay,
            running: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    /// Runs the job once, unless a previous run is still in progress.
    ///
    /// Returns `false` if the run was skipped. Errors are logged; the next
    /// tick is the retry.
    pub async fn tick(&self, ctx: &Context) -> bool {
        let Ok(_guard) = self.running.try_lock() else {
            log::warn!("{} is still running, skipping this run", self.name());
            return false;
        };

        let span = log::info_span!("job", name = self.name());
        async {
            log::trace!("starting");
            match self.job.run(ctx).await {
                Ok(()) => log::trace!("finished"),
                Err(e) => log::error!("job failed: {:?}", e),
            }
        }
        .instrument(span)
        .await;
        true
    }

    async fn run_forever(&self, ctx: &Context) {
        tokio::time::sleep(self.initial_delay).await;
        loop {
            self.tick(ctx).await;
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// The jobs the bot runs, with their schedules from `config`.
pub fn jobs(config: &Config) -> Vec<ScheduledJob> {
    vec![
        ScheduledJob::new(
            Box::new(UpdateUsers),
            Duration::ZERO,
            config.update_users_interval,
        ),
        ScheduledJob::new(
            Box::new(AssignMergeRequests),
            config.assign_merge_requests_initial_delay,
            config.assign_merge_requests_interval,
        ),
    ]
}

/// Spawns the task driving `job`.
///
/// If the task panics it is logged and started again after a short pause.
pub fn spawn(ctx: Arc<Context>, job: ScheduledJob) -> JoinHandle<()> {
    let job = Arc::new(job);
    tokio::spawn(async move {
        loop {
            let ctx = ctx.clone();
            let runner = job.clone();
            let res = tokio::spawn(async move { runner.run_forever(&ctx).await }).await;
            match res {
                Err(err) if err.is_panic() => {
                    log::error!("{} task died (error={err})", job.name());
                    tokio::time::sleep(RESTART_DELAY).await;
                }
                _ => return,
            }
        }
    })
}
