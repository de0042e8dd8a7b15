mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::{Response, Url};

/// Issues a GET for `url` and returns the response once its headers arrive.
///
/// Non-2xx responses are surfaced as status errors (`reqwest::Error::is_status`).
/// The body is left unread.
pub async fn fetch_response<C: HttpClient + ?Sized>(client: &C, url: Url) -> reqwest::Result<Response> {
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    client.execute(req).await?.error_for_status()
}
