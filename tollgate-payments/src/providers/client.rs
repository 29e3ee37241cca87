//! Common HTTP client for providers

use crate::error::{GatewayError, GatewayResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// How requests authenticate
pub enum ProviderAuth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// Fixed headers on every request
    Headers(Vec<(&'static str, String)>),
}

/// HTTP client bound to one provider base URL
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl ProviderClient {
    /// Create a client whose calls give up after `timeout`
    pub fn new(base_url: impl Into<String>, auth: ProviderAuth, timeout: Duration) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = None;
        match auth {
            ProviderAuth::Bearer(token) => bearer = Some(token),
            ProviderAuth::Headers(pairs) => {
                for (name, value) in pairs {
                    let header = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| GatewayError::Config(format!("header {}: {}", name, e)))?;
                    let value = HeaderValue::from_str(&value)
                        .map_err(|e| GatewayError::Config(format!("header {}: {}", name, e)))?;
                    headers.insert(header, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET request
    pub async fn get(&self, path: &str) -> GatewayResult<reqwest::Response> {
        Ok(self.authorize(self.client.get(self.url(path))).send().await?)
    }

    /// GET request with query parameters
    pub async fn get_query<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        query: &T,
    ) -> GatewayResult<reqwest::Response> {
        Ok(self
            .authorize(self.client.get(self.url(path)).query(query))
            .send()
            .await?)
    }

    /// POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> GatewayResult<reqwest::Response> {
        Ok(self
            .authorize(self.client.post(self.url(path)).json(body))
            .send()
            .await?)
    }

    /// POST request with form body
    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> GatewayResult<reqwest::Response> {
        Ok(self
            .authorize(self.client.post(self.url(path)).form(body))
            .send()
            .await?)
    }
}

/// Map a non-success HTTP status to an error. 5xx and 429 leave the
/// outcome unknown; other statuses mean the request was refused.
pub fn status_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
    use reqwest::StatusCode;

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::ProviderUnavailable(format!("provider answered {}", status))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GatewayError::Config(format!("provider rejected credentials ({})", status))
    } else {
        GatewayError::declined(status.as_u16().to_string(), body.chars().take(200).collect::<String>())
    }
}
