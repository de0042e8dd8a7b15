use chrono::{DateTime, Utc};
use reqwest::Url;
use url::form_urlencoded;

/// Continuation token for an incremental request: `0` asks for the full
/// snapshot, anything else is the previous receive instant in epoch millis.
pub fn continuation_token(since: Option<DateTime<Utc>>) -> i64 {
    since.map_or(0, |instant| instant.timestamp_millis())
}

/// Turns a `routeList` URL into the `routeConfig` URL for `tag`.
pub fn route_config_url(route_list_url: &Url, tag: &str) -> Url {
    with_params(route_list_url, &[("command", "routeConfig"), ("r", tag)])
}

/// Points a feed endpoint at the vehicle-locations command for `agency`.
pub fn vehicle_locations_url(feed_url: &Url, agency: &str) -> Url {
    with_params(feed_url, &[("command", "vehicleLocations"), ("a", agency)])
}

/// URL of the next incremental update for `route_tag`.
pub fn next_update_url(update_url: &Url, since: Option<DateTime<Utc>>, route_tag: &str) -> Url {
    let t = continuation_token(since).to_string();
    with_params(update_url, &[("t", &t), ("r", route_tag)])
}

/// Sets each `(key, value)` on a copy of `base`.
///
/// Untouched parameters keep their original encoding and position. A key that
/// already exists is replaced where it first appears and its repeats are
/// dropped; new keys are appended in the given order.
fn with_params(base: &Url, params: &[(&str, &str)]) -> Url {
    let mut applied = vec![false; params.len()];
    let mut segments: Vec<String> = Vec::new();

    for segment in base.query().unwrap_or_default().split('&') {
        if segment.is_empty() {
            continue;
        }
        let key = form_urlencoded::parse(segment.as_bytes())
            .next()
            .map(|(key, _)| key.into_owned())
            .unwrap_or_default();

        match params.iter().position(|(name, _)| *name == key) {
            Some(idx) if applied[idx] => {}
            Some(idx) => {
                applied[idx] = true;
                segments.push(encode_pair(params[idx].0, params[idx].1));
            }
            None => segments.push(segment.to_string()),
        }
    }

    for (idx, (name, value)) in params.iter().enumerate() {
        if !applied[idx] {
            segments.push(encode_pair(name, value));
        }
    }

    let mut url = base.clone();
    url.set_query(Some(&segments.join("&")));
    url
}

fn encode_pair(name: &str, value: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn test_route_config_url_for_tag() {
        let route_list =
            parse("http://webservices.nextbus.com/service/publicJSONFeed?command=routeList&a=ttc");
        let got = route_config_url(&route_list, "503");
        assert_eq!(
            got.as_str(),
            "http://webservices.nextbus.com/service/publicJSONFeed?command=routeConfig&a=ttc&r=503"
        );
    }

    #[test]
    fn test_route_config_url_preserves_other_params_verbatim() {
        let route_list = parse("http://example.com/feed?a=ttc&note=two%20words&r=1&r=2&x=%7E");
        let got = route_config_url(&route_list, "510");
        assert_eq!(
            got.query(),
            Some("a=ttc&note=two%20words&r=510&x=%7E&command=routeConfig")
        );
    }

    #[test]
    fn test_route_config_url_without_query() {
        let got = route_config_url(&parse("http://example.com/feed"), "7");
        assert_eq!(got.query(), Some("command=routeConfig&r=7"));
    }

    #[test]
    fn test_next_update_url_first_fetch_uses_zero() {
        let base = parse("https://example.com/feed?command=vehicleLocations&a=ttc");
        let got = next_update_url(&base, None, "510");
        assert_eq!(got.query(), Some("command=vehicleLocations&a=ttc&t=0&r=510"));
    }

    #[test]
    fn test_next_update_url_encodes_cursor_millis() {
        let base = parse("https://example.com/feed?command=vehicleLocations&a=ttc&t=0&r=510");
        let since = Utc.timestamp_millis_opt(1_682_856_000_123).unwrap();
        let got = next_update_url(&base, Some(since), "510");
        assert_eq!(
            got.query(),
            Some("command=vehicleLocations&a=ttc&t=1682856000123&r=510")
        );
    }

    #[test]
    fn test_continuation_token_epoch_is_zero() {
        assert_eq!(continuation_token(Some(DateTime::UNIX_EPOCH)), 0);
        assert_eq!(continuation_token(None), 0);
    }

    #[test]
    fn test_vehicle_locations_url_sets_command_and_agency() {
        let got = vehicle_locations_url(&parse("https://example.com/publicJSONFeed"), "ttc");
        assert_eq!(got.query(), Some("command=vehicleLocations&a=ttc"));
    }
}
