//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL database running
//! 2. Redis running
//! 3. API server running on configured port
//! 4. Worker process running, with a scene manifest for `ls7_ledaps`
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod fixtures;
mod helpers;

use datacube_query_cache::models::job::JobStatus;
use fixtures::*;
use helpers::*;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[tokio::test]
#[ignore] // Requires running API server and infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_query_is_cached() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();
    let params = landsat_query();

    let first = submit_query(&client, &base_url, &params)
        .await
        .expect("Failed to submit query");
    assert_eq!(first.query_id.as_str(), LANDSAT_QUERY_ID);

    let finished = poll_job_status(&client, &base_url, &first.query_id, 120)
        .await
        .expect("Query did not finish");
    println!(
        "Query {} finished as {} ({}/{})",
        finished.query_id, finished.status, finished.scenes_processed, finished.total_scenes
    );

    // Resubmitting returns the terminal record straight away
    let second = submit_query(&client, &base_url, &params)
        .await
        .expect("Failed to resubmit query");
    assert_eq!(second.query_id, first.query_id);
    assert_eq!(second.status, finished.status);

    if finished.status == JobStatus::Done {
        let response = client
            .get(format!("{}/api/v1/jobs/{}/metadata", base_url, first.query_id))
            .send()
            .await
            .expect("Metadata request failed");
        assert!(response.status().is_success());
    }
}

#[tokio::test]
#[ignore] // Requires running API server
async fn test_e2e_rejects_ambiguous_platform() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let mut params = landsat_query();
    params.platform = "LANDSAT-7".to_string();

    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&params)
        .send()
        .await
        .expect("Submit request failed");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}
