//! Client side of the NextBus-style public JSON feed.
//!
//! The feed serves incremental vehicle-location snapshots: each request
//! carries a continuation token (`t`) and only reports vehicles seen since.

mod client;
mod error;
mod urls;

pub use client::{FeedUpdate, NextbusClient, VehicleFeed};
pub use error::FetchError;
pub use urls::{continuation_token, next_update_url, route_config_url, vehicle_locations_url};

use serde::{Deserialize, Deserializer, Serialize};

/// One time-scoped update to vehicle positions, as sent by the feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VehicleLocations {
    #[serde(rename = "lastTime", default)]
    pub last_time: Option<LastTime>,
    #[serde(rename = "vehicle", default, deserialize_with = "one_or_many")]
    pub vehicles: Vec<RawObservation>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LastTime {
    #[serde(default)]
    pub time: String,
}

/// A single vehicle report. Values are kept exactly as the feed sent them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawObservation {
    #[serde(rename = "routeTag", default)]
    pub route_tag: String,
    #[serde(rename = "dirTag", default)]
    pub dir_tag: String,
    #[serde(rename = "id", default)]
    pub vehicle_id: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lon: String,
    /// Speed in km/h.
    #[serde(rename = "speedKmHr", default)]
    pub speed: String,
    /// Age of the report in seconds.
    #[serde(rename = "secsSinceReport", default)]
    pub age: String,
    #[serde(default)]
    pub heading: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

// The feed collapses a one-element `vehicle` array into a bare object.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
    })
}
