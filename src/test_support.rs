use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;

use crate::nextbus::{FeedUpdate, FetchError, RawObservation, VehicleFeed};
use crate::shutdown::ShutdownTrigger;

pub(crate) fn instant(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 4, 30, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

pub(crate) fn vehicle(route_tag: &str, id: &str) -> RawObservation {
    RawObservation {
        route_tag: route_tag.into(),
        dir_tag: format!("{route_tag}_0_{route_tag}"),
        vehicle_id: id.into(),
        lat: "43.6452".into(),
        lon: "-79.3906".into(),
        speed: "18".into(),
        age: "7".into(),
        heading: "84".into(),
    }
}

pub(crate) fn decode_error(received_at: DateTime<Utc>) -> FetchError {
    FetchError::Decode {
        source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        received_at,
    }
}

pub(crate) fn unavailable() -> FetchError {
    FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)
}

/// Replays canned fetch results in order. Once the script runs out every
/// call fails and the optional trigger is fired.
pub(crate) struct ScriptedFeed {
    script: Mutex<VecDeque<Result<FeedUpdate, FetchError>>>,
    calls: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
    on_exhausted: Option<ShutdownTrigger>,
}

impl ScriptedFeed {
    pub(crate) fn new(script: Vec<Result<FeedUpdate, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            on_exhausted: None,
        }
    }

    pub(crate) fn firing_when_exhausted(mut self, trigger: ShutdownTrigger) -> Self {
        self.on_exhausted = Some(trigger);
        self
    }

    /// The `since` argument of each call, in order.
    pub(crate) fn cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.calls.lock().unwrap().iter().map(|(_, since)| *since).collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

pub(crate) fn update(received_at: DateTime<Utc>, vehicles: Vec<RawObservation>) -> Result<FeedUpdate, FetchError> {
    Ok(FeedUpdate {
        received_at,
        last_time: None,
        vehicles,
    })
}

#[async_trait]
impl VehicleFeed for ScriptedFeed {
    async fn fetch(
        &self,
        since: Option<DateTime<Utc>>,
        route_tag: &str,
    ) -> Result<FeedUpdate, FetchError> {
        self.calls.lock().unwrap().push((route_tag.to_string(), since));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                if let Some(trigger) = &self.on_exhausted {
                    trigger.fire();
                }
                Err(unavailable())
            }
        }
    }
}

/// Always answers with one vehicle per route, stamped with the current time.
/// Routes named `bad` always fail.
pub(crate) struct SteadyFeed {
    calls: Mutex<Vec<String>>,
}

impl SteadyFeed {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls_for(&self, route_tag: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| *r == route_tag).count()
    }
}

#[async_trait]
impl VehicleFeed for SteadyFeed {
    async fn fetch(
        &self,
        _since: Option<DateTime<Utc>>,
        route_tag: &str,
    ) -> Result<FeedUpdate, FetchError> {
        self.calls.lock().unwrap().push(route_tag.to_string());
        if route_tag == "bad" {
            return Err(unavailable());
        }
        update(Utc::now(), vec![vehicle(route_tag, "1000")])
    }
}
