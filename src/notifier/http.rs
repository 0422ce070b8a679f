//! `reqwest`-backed implementation of the Migrator Notifier ports.

use async_trait::async_trait;
use std::time::Duration;

use super::{DispatchStepRequest, DryRunResult, DryRunner, MigratorNotifier, NotifierError, NotifierResult};
use crate::domain::Candidate;

/// Bounded-timeout HTTP client shared by both outbound ports. No
/// connection-pool partitioning between migrators is required. The
/// client's default timeout covers dispatch acks; dry-run requests, which
/// may run longer while a migrator computes a diff, override it per-call.
pub struct HttpNotifier {
    client: reqwest::Client,
    dry_run_timeout: Duration,
}

impl HttpNotifier {
    pub fn new(dispatch_timeout: Duration, dry_run_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self { client, dry_run_timeout }
    }

    fn transport_err(url: &str, e: reqwest::Error) -> NotifierError {
        NotifierError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl MigratorNotifier for HttpNotifier {
    async fn dispatch(&self, req: &DispatchStepRequest) -> NotifierResult<()> {
        let url = format!("{}/dispatch-step", req.migrator_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| Self::transport_err(&url, e))?;

        if !response.status().is_success() {
            return Err(NotifierError::BadStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DryRunner for HttpNotifier {
    async fn dry_run(&self, migrator_url: &str, candidate: &Candidate) -> NotifierResult<DryRunResult> {
        let url = format!("{}/dry-run", migrator_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(self.dry_run_timeout)
            .json(candidate)
            .send()
            .await
            .map_err(|e| Self::transport_err(&url, e))?;

        if !response.status().is_success() {
            return Err(NotifierError::BadStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        response.json::<DryRunResult>().await.map_err(|e| Self::transport_err(&url, e))
    }
}
