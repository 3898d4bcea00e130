//! Weekly trigger for the ingestion run.
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::crawler::PageSource;
use crate::database_ops::store::ProductStore;
use crate::orchestrator::{run_pipeline, RunReport};

/// Everything a run needs, cheap to clone into scheduler callbacks.
#[derive(Clone)]
pub struct IngestRunner {
    source: Arc<dyn PageSource>,
    store: Arc<dyn ProductStore>,
    cfg: Arc<IngestConfig>,
    running: Arc<AtomicBool>,
}

/// Clears the in-flight flag however the run ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl IngestRunner {
    pub fn new(
        source: Arc<dyn PageSource>,
        store: Arc<dyn ProductStore>,
        cfg: IngestConfig,
    ) -> Self {
        Self {
            source,
            store,
            cfg: Arc::new(cfg),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.cfg
    }

    fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(self.running.clone()))
    }

    /// Run once, bounded by the configured run timeout. Returns `Ok(None)`
    /// without doing anything when a run is already in flight.
    pub async fn trigger(&self) -> Result<Option<RunReport>> {
        let Some(_guard) = self.try_acquire() else {
            warn!("ingestion run already in progress; skipping trigger");
            return Ok(None);
        };
        let limit = self.cfg.schedule.run_timeout;
        let run = run_pipeline(self.source.as_ref(), self.store.as_ref(), &self.cfg);
        match tokio::time::timeout(limit, run).await {
            Ok(report) => report.map(Some),
            Err(_) => Err(anyhow!("ingestion run exceeded {}s and was abandoned", limit.as_secs())),
        }
    }
}

/// Register the weekly job and start the scheduler. The returned handle must
/// be kept alive for the job to keep firing.
pub async fn start_weekly(runner: IngestRunner) -> Result<JobScheduler> {
    let schedule = runner.config().schedule.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let job = Job::new_async_tz(schedule.cron.as_str(), schedule.timezone, move |_uuid, _l| {
        let runner = runner.clone();
        Box::pin(async move {
            info!("scheduled ingestion run triggered");
            match runner.trigger().await {
                Ok(Some(report)) if report.is_partial() => warn!(
                    failed = ?report.failed_categories(),
                    products = report.products,
                    "scheduled run finished with failed categories"
                ),
                Ok(Some(report)) => info!(
                    products = report.products,
                    new = report.write.new_count,
                    updated = report.write.updated_count,
                    "scheduled run finished"
                ),
                Ok(None) => {}
                Err(e) => error!(error = ?e, "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", schedule.cron))?;

    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %schedule.cron, timezone = %schedule.timezone, "weekly ingestion scheduled");
    Ok(sched)
}
