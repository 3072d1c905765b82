//! HTTP implementation of the queue and seat endpoints.

use super::envelope::ApiEnvelope;
use super::{QueueApi, SeatApi};
use crate::config::Config;
use crate::environment::TokenProvider;
use crate::error::{Error, Result};
use crate::types::{EventId, QueueStatus, RankChange, Seat, SeatId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// REST client carrying the base URL, the request timeout, and bearer-token
/// injection.
///
/// The token provider is queried per request - tokens rotate.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &Config, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.access_token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
        let response = self.request(reqwest::Method::POST, path).send().await?;
        Ok(response.json().await?)
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
        let response = self.request(reqwest::Method::DELETE, path).send().await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl QueueApi for ApiClient {
    async fn fetch_status(&self, event: EventId) -> Result<QueueStatus> {
        self.get(&format!("/api/events/{event}/queue/status"))
            .await?
            .into_data()
    }

    async fn move_to_back(&self, event: EventId) -> Result<RankChange> {
        self.post(&format!("/api/events/{event}/queue/move-to-back"))
            .await?
            .into_data()
    }

    async fn process_until_me(&self, event: EventId) -> Result<()> {
        self.post::<serde_json::Value>(&format!("/api/events/{event}/queue/process-until-me"))
            .await?
            .into_result()
            .map(|_| ())
    }
}

#[async_trait]
impl SeatApi for ApiClient {
    async fn fetch_seats(&self, event: EventId) -> Result<Vec<Seat>> {
        // Absence of a seat map is a valid steady state before setup.
        self.get(&format!("/api/events/{event}/seats"))
            .await?
            .data_or_default()
    }

    async fn select_seat(&self, event: EventId, seat: SeatId) -> Result<()> {
        self.post::<serde_json::Value>(&format!("/api/events/{event}/seats/{seat}/select"))
            .await?
            .into_result()
            .map(|_| ())
    }

    async fn release_seat(&self, event: EventId, seat: SeatId) -> Result<()> {
        self.delete::<serde_json::Value>(&format!("/api/events/{event}/seats/{seat}/select"))
            .await?
            .into_result()
            .map(|_| ())
    }
}
