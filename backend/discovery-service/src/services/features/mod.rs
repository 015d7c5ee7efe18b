// ============================================
// Feature Store
// ============================================
// Turns catalog records into immutable, normalized `Track`s and caches the
// candidate pool per user:
// - Fresh cache (younger than TTL) is served without touching the catalog
// - Catalog fetches run under a timeout
// - On fetch failure or timeout the last cached pool is served, flagged stale,
//   as long as it is no older than TTL + stale grace
// - With no usable cache the failure surfaces as TransientUpstream
// - Pools past TTL + grace are evicted on the next successful fetch, along
//   with index entries for tracks no cached pool references any more

pub mod catalog;

pub use catalog::{CatalogEntry, CatalogError, CatalogSource, CatalogTrack, RawAudioFeatures, StaticCatalog};

use crate::config::EngineConfig;
use crate::error::{DiscoveryError, Result};
use crate::models::{FeatureVector, Track};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Stale grace used when none is configured
const DEFAULT_STALE_GRACE_SECS: u64 = 3600;

/// Map raw provider audio features into [0, 1]
pub fn normalize_audio(raw: &RawAudioFeatures) -> FeatureVector {
    let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 };
    [
        unit(raw.acousticness),
        unit(raw.danceability),
        unit(raw.energy),
        unit(raw.instrumentalness),
        unit(raw.liveness),
        unit(raw.speechiness),
        unit(raw.valence),
        unit((raw.tempo - 50.0) / 150.0),
        unit((raw.loudness + 60.0) / 60.0),
    ]
}

pub fn build_track(record: CatalogTrack, raw: &RawAudioFeatures) -> Track {
    Track {
        id: record.id,
        artist_ids: record.artist_ids,
        genres: record.genres.into_iter().map(|g| g.to_lowercase()).collect(),
        audio: normalize_audio(raw),
        popularity: if record.popularity.is_finite() {
            record.popularity.clamp(0.0, 100.0)
        } else {
            0.0
        },
        released_at: record.released_at,
    }
}

/// Candidate pool handed to the ranking pipeline
#[derive(Debug, Clone)]
pub struct CandidatePool {
    pub tracks: Vec<Arc<Track>>,
    /// Served from cache after a failed refresh
    pub stale: bool,
}

#[derive(Clone)]
struct CachedPool {
    tracks: Vec<Arc<Track>>,
    cached_at: Instant,
}

pub struct FeatureStore {
    catalog: Arc<dyn CatalogSource>,
    /// Last known good pool per user
    pool_cache: Arc<RwLock<HashMap<String, CachedPool>>>,
    /// Every track seen so far, for feedback lookups
    tracks: DashMap<String, Arc<Track>>,
    cache_ttl: Duration,
    /// How long past TTL a pool may still serve as a stale fallback
    stale_grace: Duration,
    fetch_timeout: Duration,
}

impl FeatureStore {
    pub fn new(catalog: Arc<dyn CatalogSource>, cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            catalog,
            pool_cache: Arc::new(RwLock::new(HashMap::new())),
            tracks: DashMap::new(),
            cache_ttl,
            stale_grace: Duration::from_secs(DEFAULT_STALE_GRACE_SECS),
            fetch_timeout,
        }
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    pub fn from_config(catalog: Arc<dyn CatalogSource>, config: &EngineConfig) -> Self {
        Self::new(
            catalog,
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_millis(config.fetch_timeout_ms),
        )
        .with_stale_grace(Duration::from_secs(config.stale_grace_secs))
    }

    /// Oldest a cached pool may be and still be kept
    fn retention(&self) -> Duration {
        self.cache_ttl.saturating_add(self.stale_grace)
    }

    /// Track by id, if it was ever part of a fetched pool
    pub fn track(&self, track_id: &str) -> Option<Arc<Track>> {
        self.tracks.get(track_id).map(|t| Arc::clone(t.value()))
    }

    pub async fn candidate_pool(&self, user_id: &str, limit: usize) -> Result<CandidatePool> {
        {
            let cache = self.pool_cache.read().await;
            if let Some(cached) = cache.get(user_id) {
                if cached.cached_at.elapsed() < self.cache_ttl {
                    debug!(user_id = %user_id, tracks = cached.tracks.len(), "Candidate pool cache hit");
                    return Ok(CandidatePool {
                        tracks: cached.tracks.clone(),
                        stale: false,
                    });
                }
            }
        }

        let fetched = tokio::time::timeout(self.fetch_timeout, self.fetch_pool(user_id, limit)).await;
        let failure = match fetched {
            Ok(Ok(tracks)) => {
                info!(user_id = %user_id, tracks = tracks.len(), "Fetched candidate pool");
                let mut cache = self.pool_cache.write().await;
                cache.insert(
                    user_id.to_string(),
                    CachedPool {
                        tracks: tracks.clone(),
                        cached_at: Instant::now(),
                    },
                );
                self.evict_expired(&mut cache);
                return Ok(CandidatePool { tracks, stale: false });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("catalog fetch timed out after {:?}", self.fetch_timeout),
        };

        let cache = self.pool_cache.read().await;
        match cache
            .get(user_id)
            .filter(|cached| cached.cached_at.elapsed() <= self.retention())
        {
            Some(cached) => {
                warn!(
                    user_id = %user_id,
                    error = %failure,
                    age_secs = cached.cached_at.elapsed().as_secs(),
                    "Catalog fetch failed, serving cached candidate pool"
                );
                Ok(CandidatePool {
                    tracks: cached.tracks.clone(),
                    stale: true,
                })
            }
            None => {
                warn!(user_id = %user_id, error = %failure, "Catalog fetch failed with no usable cached pool");
                Err(DiscoveryError::TransientUpstream(failure))
            }
        }
    }

    async fn fetch_pool(
        &self,
        user_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<Arc<Track>>, CatalogError> {
        let records = self.catalog.fetch_candidates(user_id, limit).await?;

        let audio = join_all(
            records
                .iter()
                .map(|r| self.catalog.fetch_audio_features(&r.id)),
        )
        .await;

        let mut tracks = Vec::with_capacity(records.len());
        for (record, raw) in records.into_iter().zip(audio) {
            match raw {
                Ok(raw) => {
                    let track = Arc::new(build_track(record, &raw));
                    self.tracks.insert(track.id.clone(), Arc::clone(&track));
                    tracks.push(track);
                }
                Err(e) => {
                    debug!(track_id = %record.id, error = %e, "Dropping track without audio features");
                }
            }
        }
        Ok(tracks)
    }

    /// Drop pools past TTL + grace and index entries only the index still holds
    fn evict_expired(&self, cache: &mut HashMap<String, CachedPool>) {
        let retention = self.retention();
        let before = cache.len();
        cache.retain(|_, pool| pool.cached_at.elapsed() <= retention);
        let evicted = before - cache.len();
        if evicted > 0 {
            self.tracks.retain(|_, track| Arc::strong_count(track) > 1);
            debug!(
                evicted_pools = evicted,
                cached_pools = cache.len(),
                indexed_tracks = self.tracks.len(),
                "Evicted expired candidate pools"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::catalog::MockCatalogSource;
    use super::*;
    use chrono::Utc;
    use crate::models::audio_index;

    fn record(id: &str) -> CatalogTrack {
        CatalogTrack {
            id: id.to_string(),
            artist_ids: vec![format!("artist-{}", id)],
            genres: vec!["Rock".to_string()],
            popularity: 55.0,
            released_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_audio() {
        let raw = RawAudioFeatures {
            tempo: 200.0,
            loudness: -60.0,
            energy: 1.4,
            ..Default::default()
        };
        let v = normalize_audio(&raw);
        assert!((v[audio_index::TEMPO] - 1.0).abs() < 1e-6);
        assert!(v[audio_index::LOUDNESS].abs() < 1e-6);
        assert_eq!(v[audio_index::ENERGY], 1.0);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn test_build_track_lowercases_genres() {
        let track = build_track(record("t1"), &RawAudioFeatures::default());
        assert!(track.genres.contains("rock"));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_catalog() {
        let mut mock = MockCatalogSource::new();
        mock.expect_fetch_candidates()
            .times(1)
            .returning(|_, _| Ok(vec![record("t1"), record("t2")]));
        mock.expect_fetch_audio_features()
            .returning(|_| Ok(RawAudioFeatures::default()));

        let store = FeatureStore::new(Arc::new(mock), Duration::from_secs(60), Duration::from_secs(1));
        let first = store.candidate_pool("u1", 10).await.unwrap();
        let second = store.candidate_pool("u1", 10).await.unwrap();

        assert_eq!(first.tracks.len(), 2);
        assert_eq!(second.tracks.len(), 2);
        assert!(!second.stale);
        assert!(store.track("t2").is_some());
    }

    #[tokio::test]
    async fn test_failure_without_cache_is_transient_upstream() {
        let mut mock = MockCatalogSource::new();
        mock.expect_fetch_candidates()
            .returning(|_, _| Err(CatalogError::RateLimited));

        let store = FeatureStore::new(Arc::new(mock), Duration::from_secs(60), Duration::from_secs(1));
        assert!(matches!(
            store.candidate_pool("u1", 10).await,
            Err(DiscoveryError::TransientUpstream(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_with_expired_cache_serves_stale_pool() {
        let mut mock = MockCatalogSource::new();
        let mut calls = 0;
        mock.expect_fetch_candidates().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(vec![record("t1")])
            } else {
                Err(CatalogError::Unavailable("connection reset".to_string()))
            }
        });
        mock.expect_fetch_audio_features()
            .returning(|_| Ok(RawAudioFeatures::default()));

        // Zero TTL: every request tries the catalog again
        let store = FeatureStore::new(Arc::new(mock), Duration::ZERO, Duration::from_secs(1));
        let fresh = store.candidate_pool("u1", 10).await.unwrap();
        assert!(!fresh.stale);

        let fallback = store.candidate_pool("u1", 10).await.unwrap();
        assert!(fallback.stale);
        assert_eq!(fallback.tracks[0].id, "t1");
    }

    #[tokio::test]
    async fn test_tracks_without_audio_are_dropped() {
        let mut mock = MockCatalogSource::new();
        mock.expect_fetch_candidates()
            .returning(|_, _| Ok(vec![record("t1"), record("t2")]));
        mock.expect_fetch_audio_features().returning(|id| {
            if id == "t1" {
                Ok(RawAudioFeatures::default())
            } else {
                Err(CatalogError::TrackNotFound(id.to_string()))
            }
        });

        let store = FeatureStore::new(Arc::new(mock), Duration::from_secs(60), Duration::from_secs(1));
        let pool = store.candidate_pool("u1", 10).await.unwrap();
        assert_eq!(pool.tracks.len(), 1);
        assert!(store.track("t2").is_none());
    }

    #[tokio::test]
    async fn test_pool_past_grace_is_not_served() {
        let mut mock = MockCatalogSource::new();
        let mut calls = 0;
        mock.expect_fetch_candidates().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(vec![record("t1")])
            } else {
                Err(CatalogError::RateLimited)
            }
        });
        mock.expect_fetch_audio_features()
            .returning(|_| Ok(RawAudioFeatures::default()));

        let store = FeatureStore::new(Arc::new(mock), Duration::ZERO, Duration::from_secs(1))
            .with_stale_grace(Duration::ZERO);
        store.candidate_pool("u1", 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(
            store.candidate_pool("u1", 10).await,
            Err(DiscoveryError::TransientUpstream(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_pools_and_orphaned_tracks_are_evicted() {
        let mut mock = MockCatalogSource::new();
        mock.expect_fetch_candidates().returning(|user_id, _| {
            if user_id == "u1" {
                Ok(vec![record("t1"), record("shared")])
            } else {
                Ok(vec![record("t2"), record("shared")])
            }
        });
        mock.expect_fetch_audio_features()
            .returning(|_| Ok(RawAudioFeatures::default()));

        let store = FeatureStore::new(Arc::new(mock), Duration::ZERO, Duration::from_secs(1))
            .with_stale_grace(Duration::from_millis(50));
        store.candidate_pool("u1", 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.candidate_pool("u2", 10).await.unwrap();

        assert_eq!(store.pool_cache.read().await.len(), 1);
        assert!(store.track("t1").is_none());
        assert!(store.track("t2").is_some());
        assert!(store.track("shared").is_some());
    }
}
