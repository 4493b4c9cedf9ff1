use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::models::OccurrenceKey;

#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("attendance source unavailable: {0}")]
    Unavailable(String),
}

/// Attendance facts from the front-desk check-in system. Reconciliation
/// uses them to split `completed` from `no_show`.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn checked_in_members(&self, key: &OccurrenceKey)
    -> Result<HashSet<String>, CheckinError>;
}

#[derive(Debug, Deserialize)]
struct AttendanceResponse {
    members: Vec<String>,
}

#[derive(Clone)]
pub struct HttpCheckinClient {
    client: reqwest::Client,
    base_url: Arc<Url>,
}

impl HttpCheckinClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Arc::new(base_url),
        }
    }
}

#[async_trait]
impl AttendanceSource for HttpCheckinClient {
    async fn checked_in_members(
        &self,
        key: &OccurrenceKey,
    ) -> Result<HashSet<String>, CheckinError> {
        let url = Url::parse_with_params(
            &format!("{}/attendance", self.base_url),
            &[
                ("template_id", key.template_id.clone()),
                ("start", key.start.to_rfc3339()),
            ],
        )
        .expect("attendance url composes");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let body: AttendanceResponse = response.json().await?;
        Ok(body.members.into_iter().collect())
    }
}
