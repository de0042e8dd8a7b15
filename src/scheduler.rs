//! Runs one recorder task per route and waits for all of them.

use std::sync::Arc;

use tokio::task::JoinError;
use tracing::{Instrument, error, info};

use crate::nextbus::VehicleFeed;
use crate::recorder::{Recorder, RecorderOutcome, RecorderSettings};
use crate::shutdown::ShutdownListener;
use crate::storage::ObservationStore;

/// Final state of one spawned recorder.
#[derive(Debug)]
pub struct RouteReport {
    pub route_tag: String,
    /// `Err` if the task panicked instead of finishing.
    pub outcome: Result<RecorderOutcome, JoinError>,
}

impl RouteReport {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Ok(RecorderOutcome::Cancelled))
    }
}

pub struct Scheduler<F, S> {
    feed: Arc<F>,
    store: Arc<S>,
    settings: RecorderSettings,
}

impl<F, S> Scheduler<F, S>
where
    F: VehicleFeed + 'static,
    S: ObservationStore + 'static,
{
    pub fn new(feed: Arc<F>, store: Arc<S>, settings: RecorderSettings) -> Self {
        Self {
            feed,
            store,
            settings,
        }
    }

    /// Spawns a recorder for every entry of `route_tags` (duplicates included)
    /// and returns once all of them have finished, in input order.
    #[tracing::instrument(skip_all, fields(routes = route_tags.len()))]
    pub async fn run(&self, route_tags: &[String], shutdown: ShutdownListener) -> Vec<RouteReport> {
        let mut tasks = Vec::with_capacity(route_tags.len());

        for route_tag in route_tags {
            let recorder = Recorder::new(
                route_tag.clone(),
                self.feed.clone(),
                self.store.clone(),
                self.settings,
            );
            let span = tracing::info_span!("record_route", route_tag = %route_tag);
            let task = tokio::spawn(recorder.run(shutdown.clone()).instrument(span));
            tasks.push((route_tag.clone(), task));
        }

        info!(tasks = tasks.len(), "Recorders started");

        let mut reports = Vec::with_capacity(tasks.len());
        for (route_tag, task) in tasks {
            let outcome = task.await;
            if let Err(err) = &outcome {
                error!(route_tag = %route_tag, error = %err, "Recorder task aborted");
            }
            reports.push(RouteReport { route_tag, outcome });
        }

        let cancelled = reports.iter().filter(|r| r.is_cancelled()).count();
        info!(
            cancelled,
            failed = reports.len() - cancelled,
            "All recorders finished"
        );
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::storage::SqliteStore;
    use crate::test_support::SteadyFeed;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn routes(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn rows_for(store: &SqliteStore, route_tag: &str) -> usize {
        let now = Utc::now();
        store
            .observations_between(
                route_tag,
                now - ChronoDuration::hours(1),
                now + ChronoDuration::hours(1),
            )
            .unwrap()
            .len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_recorder_per_route_until_shutdown() {
        let feed = Arc::new(SteadyFeed::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scheduler = Arc::new(Scheduler::new(
            feed.clone(),
            store.clone(),
            RecorderSettings::default(),
        ));
        let (trigger, listener) = shutdown::channel();

        let run = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .run(&routes(&["510", "504", "510"]), listener)
                    .await
            })
        };

        // Initial fetch plus the 15s tick for every recorder
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!run.is_finished());
        trigger.fire();

        let reports = run.await.unwrap();
        let tags: Vec<_> = reports.iter().map(|r| r.route_tag.as_str()).collect();
        assert_eq!(tags, vec!["510", "504", "510"]);
        assert!(reports.iter().all(RouteReport::is_cancelled));

        assert_eq!(feed.calls_for("510"), 4);
        assert_eq!(feed.calls_for("504"), 2);
        assert_eq!(rows_for(&store, "510"), 4);
        assert_eq!(rows_for(&store, "504"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_route_does_not_end_the_run() {
        let feed = Arc::new(SteadyFeed::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scheduler = Arc::new(Scheduler::new(
            feed.clone(),
            store.clone(),
            RecorderSettings::default(),
        ));
        let (trigger, listener) = shutdown::channel();

        let run = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(&routes(&["bad", "510"]), listener).await })
        };

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(!run.is_finished());
        trigger.fire();

        let reports = run.await.unwrap();
        assert!(matches!(
            reports[0].outcome,
            Ok(RecorderOutcome::PermanentlyFailed(_))
        ));
        assert!(reports[1].is_cancelled());
        assert_eq!(feed.calls_for("bad"), 1);
        assert_eq!(feed.calls_for("510"), 3);
        assert_eq!(rows_for(&store, "bad"), 0);
    }

    #[tokio::test]
    async fn test_no_routes_returns_immediately() {
        let scheduler = Scheduler::new(
            Arc::new(SteadyFeed::new()),
            Arc::new(SqliteStore::in_memory().unwrap()),
            RecorderSettings::default(),
        );
        let (_trigger, listener) = shutdown::channel();
        assert!(scheduler.run(&[], listener).await.is_empty());
    }
}
