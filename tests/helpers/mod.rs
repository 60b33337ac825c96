//! Test helper utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use datacube_query_cache::models::job::JobIdentity;
use datacube_query_cache::models::params::JobParameters;
use datacube_query_cache::models::response::JobStatusResponse;
use datacube_query_cache::services::dispatcher::{DispatchError, WorkDispatcher};
use tokio::time::sleep;

/// Dispatcher that records every enqueue instead of sending it anywhere.
#[derive(Default)]
pub struct CountingDispatcher {
    count: AtomicUsize,
    dispatched: Mutex<Vec<JobIdentity>>,
}

impl CountingDispatcher {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn dispatched(&self) -> Vec<JobIdentity> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkDispatcher for CountingDispatcher {
    async fn enqueue(
        &self,
        query_id: &JobIdentity,
        _params: &JobParameters,
    ) -> Result<(), DispatchError> {
        // Give concurrent submitters a chance to interleave
        tokio::task::yield_now().await;
        self.count.fetch_add(1, Ordering::SeqCst);
        self.dispatched.lock().unwrap().push(query_id.clone());
        Ok(())
    }
}

/// Dispatcher whose broker is always down.
pub struct FailingDispatcher;

#[async_trait]
impl WorkDispatcher for FailingDispatcher {
    async fn enqueue(
        &self,
        _query_id: &JobIdentity,
        _params: &JobParameters,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::Rejected("broker unreachable".to_string()))
    }
}

/// Submit a query to a running server.
pub async fn submit_query(
    client: &reqwest::Client,
    base_url: &str,
    params: &JobParameters,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(params)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<JobStatusResponse>().await?)
}

/// Poll a query until it reaches DONE or ERROR (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    query_id: &JobIdentity,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, query_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;
        if status_response.status.is_terminal() {
            return Ok(status_response);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Query did not finish within {} seconds", timeout_secs).into())
}
