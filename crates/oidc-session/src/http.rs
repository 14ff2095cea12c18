//! HTTP plumbing shared by the token, revoke and grant requests

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::Result;

/// Content type of every token endpoint request
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Build the client used for provider requests.
///
/// Redirects are never followed: a token endpoint answering with a redirect is
/// treated as an error status instead of being chased to another host.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()?)
}

/// Headers sent with token, revoke and custom grant requests
pub fn token_request_headers(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    if let Some(host) = config.client_host.as_deref()
        && let Ok(value) = HeaderValue::from_str(host)
    {
        headers.insert("Access-Control-Allow-Origin", value);
    }
    headers
}

/// Status and body of a provider response
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: reqwest::StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// POST `params` form-encoded to `url`, optionally with a bearer token
pub(crate) async fn post_form(
    http: &reqwest::Client,
    url: &str,
    config: &AuthConfig,
    params: &[(&str, &str)],
    bearer: Option<&str>,
) -> Result<RawResponse> {
    let mut request = http
        .post(url)
        .headers(token_request_headers(config))
        .form(params);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}
