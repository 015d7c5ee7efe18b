// ============================================
// Catalog Source
// ============================================
// Boundary to the external catalog provider: candidate tracks per user and
// raw audio features per track. Calls may fail transiently; the feature
// store owns retries-by-cache and timeouts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog rate limited")]
    RateLimited,

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Invalid catalog data: {0}")]
    InvalidData(String),
}

/// Track record as delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTrack {
    pub id: String,
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    /// 0-100
    pub popularity: f32,
    pub released_at: DateTime<Utc>,
}

/// Provider audio features before normalization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawAudioFeatures {
    pub acousticness: f32,
    pub danceability: f32,
    pub energy: f32,
    pub instrumentalness: f32,
    pub liveness: f32,
    pub speechiness: f32,
    pub valence: f32,
    /// Beats per minute
    pub tempo: f32,
    /// Decibels, typically -60..0
    pub loudness: f32,
}

impl Default for RawAudioFeatures {
    fn default() -> Self {
        Self {
            acousticness: 0.5,
            danceability: 0.5,
            energy: 0.5,
            instrumentalness: 0.5,
            liveness: 0.5,
            speechiness: 0.5,
            valence: 0.5,
            tempo: 125.0,
            loudness: -30.0,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_candidates(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>, CatalogError>;

    async fn fetch_audio_features(&self, track_id: &str) -> Result<RawAudioFeatures, CatalogError>;
}

/// Catalog entry of the static source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub track: CatalogTrack,
    #[serde(default)]
    pub audio: RawAudioFeatures,
}

/// In-memory catalog, optionally loaded from a JSON fixture.
/// Every user sees the same candidates in fixture order.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
    audio: HashMap<String, RawAudioFeatures>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let audio = entries
            .iter()
            .map(|e| (e.track.id.clone(), e.audio))
            .collect();
        Self { entries, audio }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(json).map_err(|e| CatalogError::InvalidData(e.to_string()))?;
        Ok(Self::new(entries))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::InvalidData(format!("{}: {}", path.display(), e)))?;
        let catalog = Self::from_json(&json)?;
        info!(path = %path.display(), tracks = catalog.len(), "Loaded catalog fixture");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_candidates(
        &self,
        _user_id: &str,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>, CatalogError> {
        Ok(self
            .entries
            .iter()
            .take(limit)
            .map(|e| e.track.clone())
            .collect())
    }

    async fn fetch_audio_features(&self, track_id: &str) -> Result<RawAudioFeatures, CatalogError> {
        self.audio
            .get(track_id)
            .copied()
            .ok_or_else(|| CatalogError::TrackNotFound(track_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"[
        {"id": "t1", "artist_ids": ["a1"], "genres": ["rock"], "popularity": 70,
         "released_at": "2020-01-01T00:00:00Z",
         "audio": {"acousticness": 0.1, "danceability": 0.5, "energy": 0.9,
                   "instrumentalness": 0.0, "liveness": 0.2, "speechiness": 0.05,
                   "valence": 0.6, "tempo": 140.0, "loudness": -5.0}},
        {"id": "t2", "artist_ids": ["a2"], "popularity": 10,
         "released_at": "2021-06-01T00:00:00Z"}
    ]"#;

    #[tokio::test]
    async fn test_static_catalog_from_json() {
        let catalog = StaticCatalog::from_json(FIXTURE).unwrap();
        assert_eq!(catalog.len(), 2);

        let tracks = catalog.fetch_candidates("anyone", 1).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "t1");

        let audio = catalog.fetch_audio_features("t1").await.unwrap();
        assert_eq!(audio.tempo, 140.0);

        // Missing audio block falls back to defaults
        let audio = catalog.fetch_audio_features("t2").await.unwrap();
        assert_eq!(audio, RawAudioFeatures::default());
    }

    #[tokio::test]
    async fn test_unknown_track_audio() {
        let catalog = StaticCatalog::from_json(FIXTURE).unwrap();
        assert!(matches!(
            catalog.fetch_audio_features("nope").await,
            Err(CatalogError::TrackNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_fixture() {
        assert!(matches!(
            StaticCatalog::from_json("{not json"),
            Err(CatalogError::InvalidData(_))
        ));
    }
}
