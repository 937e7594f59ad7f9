//! HTTP plumbing shared by every upstream client.
//!
//! Requests go through the [`HttpClient`] trait so that authentication and
//! other decorations stack as wrappers (see [`auth::ApiKey`]). Every fetch
//! takes a [`CancellationToken`]; a cancelled fetch resolves to
//! [`FetchError::Cancelled`] and its response is never read.

pub mod auth;
mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::error::FetchError;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// Builds a GET request for `url` with the given query pairs and headers.
pub fn get_request(
    url: &str,
    query: &[(&str, String)],
    headers: &[(HeaderName, &str)],
) -> Result<Request, FetchError> {
    let mut parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !query.is_empty() {
        let mut pairs = parsed.query_pairs_mut();
        for (name, value) in query {
            pairs.append_pair(name, value);
        }
    }

    let mut req = Request::new(Method::GET, parsed);
    for (name, value) in headers {
        let value =
            HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
        req.headers_mut().insert(name.clone(), value);
    }
    Ok(req)
}

/// Executes `req` and returns the body of a successful response.
///
/// Non-success statuses become [`FetchError::Status`] carrying the body text.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    req: Request,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = send(client, req) => result,
    }
}

async fn send<C: HttpClient + ?Sized>(client: &C, req: Request) -> Result<Vec<u8>, FetchError> {
    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status { status, body });
    }
    Ok(resp.bytes().await?.to_vec())
}

pub async fn fetch_json<C, T>(
    client: &C,
    req: Request,
    cancel: &CancellationToken,
) -> Result<T, FetchError>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    let bytes = fetch_bytes(client, req, cancel).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
