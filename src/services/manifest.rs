//! Scene manifest driven job handler.
//!
//! The raster computation itself runs elsewhere; this handler enumerates the
//! acquisitions a query covers from a per-product manifest
//! (`<manifest_dir>/<product>.json`), records the query's scene statistics,
//! reports progress scene by scene and writes a JSON summary as the result.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobIdentity;
use crate::models::metadata::{clean_percentage, SceneStatistics};
use crate::models::params::JobParameters;
use crate::services::queue::QueuedJob;
use crate::services::worker::{HandlerError, JobHandler, ProgressReporter};

/// One acquisition available for a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEntry {
    pub acquired_at: DateTime<Utc>,
    pub pixel_count: i64,
    pub clean_pixel_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneManifest {
    pub product: String,
    pub scenes: Vec<SceneEntry>,
}

/// Summary written to the result location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySummary {
    pub query_id: JobIdentity,
    pub platform: String,
    pub product: String,
    pub scene_count: i64,
    pub pixel_count: i64,
    pub clean_pixel_count: i64,
    pub percentage_clean_pixels: f64,
    pub acquisitions: Vec<DateTime<Utc>>,
}

pub struct ManifestHandler {
    manifest_dir: PathBuf,
    result_dir: PathBuf,
}

impl ManifestHandler {
    pub fn new(manifest_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            result_dir: result_dir.into(),
        }
    }

    async fn load_manifest(&self, product: &str) -> Result<SceneManifest, HandlerError> {
        let path = self.manifest_dir.join(format!("{product}.json"));
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Scenes acquired within the query's dates (inclusive), oldest first.
pub fn select_scenes(manifest: &SceneManifest, params: &JobParameters) -> Vec<SceneEntry> {
    let mut scenes: Vec<SceneEntry> = manifest
        .scenes
        .iter()
        .filter(|s| {
            let day = s.acquired_at.date_naive();
            day >= params.time_start && day <= params.time_end
        })
        .cloned()
        .collect();
    scenes.sort_by_key(|s| s.acquired_at);
    scenes
}

/// Per-acquisition and total clean pixel statistics.
pub fn scene_statistics(scenes: &[SceneEntry]) -> SceneStatistics {
    let mut stats = SceneStatistics {
        scene_count: scenes.len() as i64,
        ..SceneStatistics::default()
    };

    for scene in scenes {
        stats.pixel_count += scene.pixel_count;
        stats.clean_pixel_count += scene.clean_pixel_count;
        stats.acquisitions.push(scene.acquired_at);
        stats.clean_pixel_counts.push(scene.clean_pixel_count);
        stats
            .clean_pixel_percentages
            .push(clean_percentage(scene.clean_pixel_count, scene.pixel_count));
    }

    stats
}

#[async_trait]
impl JobHandler for ManifestHandler {
    async fn process(
        &self,
        job: &QueuedJob,
        progress: &ProgressReporter<'_>,
    ) -> Result<String, HandlerError> {
        let params = &job.params;
        let manifest = self.load_manifest(&params.product).await?;
        let scenes = select_scenes(&manifest, params);

        if scenes.is_empty() {
            return Err(HandlerError::NoData {
                product: params.product.clone(),
                start: params.time_start,
                end: params.time_end,
            });
        }

        let stats = scene_statistics(&scenes);
        let total = scenes.len() as i32;
        let summary = QuerySummary {
            query_id: job.query_id.clone(),
            platform: params.platform.clone(),
            product: params.product.clone(),
            scene_count: stats.scene_count,
            pixel_count: stats.pixel_count,
            clean_pixel_count: stats.clean_pixel_count,
            percentage_clean_pixels: stats.percentage_clean_pixels(),
            acquisitions: stats.acquisitions.clone(),
        };

        progress.metadata(stats).await?;

        for done in 1..=total {
            progress.progress(done, total).await?;
        }

        tokio::fs::create_dir_all(&self.result_dir).await?;
        let path = self.result_dir.join(format!("{}.json", job.query_id));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&summary)?).await?;

        tracing::debug!(query_id = %job.query_id, path = %path.display(), "Summary written");
        Ok(path.display().to_string())
    }
}
