//! JSON parser for vehicle-location payloads.

use crate::nextbus::VehicleLocations;

/// Decodes a vehicle-locations response body.
///
/// # Errors
///
/// Returns an error if the bytes are not a JSON object of the expected shape.
pub fn parse_locations(bytes: &[u8]) -> serde_json::Result<VehicleLocations> {
    serde_json::from_slice(bytes)
}
