//! Per-route recording loop.
//!
//! A [`Recorder`] owns the fetch cursor for one route. It performs one fetch
//! up front; if that fails the route is abandoned. Otherwise it keeps polling
//! on a fixed interval until the shutdown signal fires, logging failed cycles
//! and carrying on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::nextbus::{FetchError, VehicleFeed};
use crate::shutdown::ShutdownListener;
use crate::storage::ObservationStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// What to do with the cursor when a response arrives but cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Only a decoded response moves the cursor; the next fetch asks for the
    /// same range again.
    #[default]
    RequireDecode,
    /// Move the cursor to the failed response's receive instant, skipping
    /// whatever it covered. Matches recordings made by earlier versions.
    AdvanceOnDecodeError,
}

impl CursorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorPolicy::RequireDecode => "require-decode",
            CursorPolicy::AdvanceOnDecodeError => "advance-on-decode-error",
        }
    }
}

impl fmt::Display for CursorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CursorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require-decode" => Ok(CursorPolicy::RequireDecode),
            "advance-on-decode-error" => Ok(CursorPolicy::AdvanceOnDecodeError),
            other => Err(format!(
                "unknown cursor policy {other:?} (expected require-decode or advance-on-decode-error)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderSettings {
    pub poll_interval: Duration,
    pub cursor_policy: CursorPolicy,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cursor_policy: CursorPolicy::default(),
        }
    }
}

/// Last receive instant for a route. `None` until the first fetch lands,
/// which makes the next request ask for the full snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_fetch: Option<DateTime<Utc>>,
}

impl Cursor {
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    /// `instant`, or the current cursor if the clock went backwards.
    fn clamp(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_fetch {
            Some(last) if last > instant => last,
            _ => instant,
        }
    }

    fn advance(&mut self, instant: DateTime<Utc>) {
        self.last_fetch = Some(self.clamp(instant));
    }
}

/// How a recorder task ended.
#[derive(Debug)]
pub enum RecorderOutcome {
    Cancelled,
    /// The very first fetch failed; the route was never polled.
    PermanentlyFailed(FetchError),
}

/// Summary of one successful fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub received_at: DateTime<Utc>,
    pub vehicles: usize,
    pub written: usize,
}

pub struct Recorder<F, S> {
    route_tag: String,
    cursor: Cursor,
    feed: Arc<F>,
    store: Arc<S>,
    settings: RecorderSettings,
}

impl<F, S> Recorder<F, S>
where
    F: VehicleFeed,
    S: ObservationStore + 'static,
{
    pub fn new(
        route_tag: impl Into<String>,
        feed: Arc<F>,
        store: Arc<S>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            route_tag: route_tag.into(),
            cursor: Cursor::default(),
            feed,
            store,
            settings,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Records until `shutdown` fires or the first fetch fails.
    ///
    /// Shutdown is only noticed between cycles; a fetch already in flight
    /// runs to completion.
    pub async fn run(mut self, mut shutdown: ShutdownListener) -> RecorderOutcome {
        info!(route_tag = %self.route_tag, "Recording route");

        if let Err(err) = self.cycle().await {
            error!(
                route_tag = %self.route_tag,
                error = %err,
                "Initial fetch failed, route will not be recorded"
            );
            return RecorderOutcome::PermanentlyFailed(err);
        }

        let period = self.settings.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.fired() => {
                    info!(route_tag = %self.route_tag, "Recording stopped");
                    return RecorderOutcome::Cancelled;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.cycle().await {
                        warn!(route_tag = %self.route_tag, error = %err, "Error fetching update");
                    }
                }
            }
        }
    }

    /// Fetches once, persists what came back and moves the cursor.
    ///
    /// A persistence failure is logged, not returned: the cursor still moves
    /// and the unwritten rest of the batch is dropped.
    pub async fn cycle(&mut self) -> Result<CycleReport, FetchError> {
        let update = match self
            .feed
            .fetch(self.cursor.last_fetch(), &self.route_tag)
            .await
        {
            Ok(update) => update,
            Err(err) => {
                if self.settings.cursor_policy == CursorPolicy::AdvanceOnDecodeError {
                    if let Some(received_at) = err.received_at() {
                        self.cursor.advance(received_at);
                    }
                }
                return Err(err);
            }
        };

        let received_at = self.cursor.clamp(update.received_at);
        let vehicles = update.vehicles.len();

        // SQLite calls block, keep them off the async workers
        let store = self.store.clone();
        let route_tag = self.route_tag.clone();
        let batch = update.vehicles;
        let persisted =
            task::spawn_blocking(move || store.persist(&route_tag, received_at, &batch)).await;

        let written = match persisted {
            Ok(Ok(written)) => written,
            Ok(Err(err)) => {
                error!(
                    route_tag = %self.route_tag,
                    written = err.written(),
                    vehicles,
                    error = %err,
                    "Failed to persist observations"
                );
                err.written()
            }
            Err(err) => {
                error!(route_tag = %self.route_tag, error = %err, "Persist task aborted");
                0
            }
        };

        self.cursor.advance(received_at);

        info!(
            route_tag = %self.route_tag,
            vehicles,
            last_time = update.last_time.as_deref().unwrap_or_default(),
            "Route updated"
        );

        Ok(CycleReport {
            received_at,
            vehicles,
            written,
        })
    }
}
