// THEORY:
// The `registry` module is the top-level API of the engine. It owns every piece of
// per-blob state and drives it through one tick at a time.
//
// Key architectural principles:
// 1.  **Birth on First Sighting**: The first update carrying an unseen blob ID
//     creates its `BlobTrackers` bundle: one `PathMatcher` per reference path, one
//     line tracker and one circle tracker. IDs come from the upstream detector and
//     are trusted; there is no re-identification.
// 2.  **Tick Pass**: `tick` visits every blob in ID order. Live blobs are asked to
//     `travel`/`track` and their accepted results are collected into a
//     `TickReport`. Blobs whose sub-trackers are all dead are only marked.
// 3.  **Deferred Death**: Marked blobs are removed after the pass, never while the
//     map is being walked.
// 4.  **Shared Paths**: `PathReference`s are loaded once and shared through `Arc`.
//     Nothing else is shared between blobs.

use crate::config::TrackerConfig;
use crate::core_modules::circle_tracker::{CircleDetection, CircleModel, CircleTracker};
use crate::core_modules::line_tracker::{LineDetection, LineModel, LineTracker};
use crate::core_modules::path_matcher::PathMatcher;
use crate::core_modules::path_reference::PathReference;
use crate::core_modules::projection::Homography;
use crate::core_modules::timed_sample::{BlobId, BlobUpdate, TimedSample};
use crate::error::{Result, TrackingError};
use nalgebra::Point2;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// One result produced by a tick, ready to hand to an external sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingResult {
    Pathway {
        blob_id: BlobId,
        path_index: usize,
        completion: f64,
        error: f64,
    },
    Line {
        blob_id: BlobId,
        #[serde(flatten)]
        line: LineDetection,
    },
    Circle {
        blob_id: BlobId,
        #[serde(flatten)]
        circle: CircleDetection,
    },
}

impl TrackingResult {
    pub fn blob_id(&self) -> BlobId {
        match self {
            Self::Pathway { blob_id, .. } | Self::Line { blob_id, .. } | Self::Circle { blob_id, .. } => {
                *blob_id
            }
        }
    }

    /// Routing address for transports that dispatch on a path.
    pub fn address(&self) -> &'static str {
        match self {
            Self::Pathway { .. } => "/bigBrother/pathway",
            Self::Line { .. } => "/bigBrother/trail",
            Self::Circle { .. } => "/bigBrother/trail_circle",
        }
    }
}

/// Everything a tick produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    /// The time the tick was run at, in the same clock as the sample timestamps.
    pub timestamp: f64,
    pub results: Vec<TrackingResult>,
    /// Blobs removed at the end of this tick.
    pub expired: Vec<BlobId>,
}

/// The fixed set of sub-trackers attached to one blob.
#[derive(Debug, Clone)]
pub struct BlobTrackers {
    pub path_matchers: Vec<PathMatcher>,
    pub line: LineTracker,
    pub circle: CircleTracker,
}

impl BlobTrackers {
    fn new(config: &TrackerConfig, references: &[Arc<PathReference>], projection: Option<Homography>) -> Self {
        Self {
            path_matchers: references
                .iter()
                .map(|reference| PathMatcher::new(Arc::clone(reference), config))
                .collect(),
            line: LineTracker::new(LineModel::from_config(config), config, projection),
            circle: CircleTracker::new(CircleModel::from_config(config), config, projection),
        }
    }

    /// Routes one sample to every sub-tracker. Samples a sub-tracker cannot use are
    /// dropped for that sub-tracker only.
    fn follow(&mut self, blob_id: BlobId, sample: &TimedSample) {
        for (path_index, matcher) in self.path_matchers.iter_mut().enumerate() {
            if let Err(err) = matcher.follow(sample) {
                trace!(blob_id, path_index, %err, "sample dropped by path matcher");
            }
        }
        for result in [self.line.follow(sample), self.circle.follow(sample)] {
            if let Err(err) = result {
                trace!(blob_id, %err, "sample dropped by shape tracker");
            }
        }
    }

    /// Alive while any sub-tracker is alive.
    pub fn is_alive(&self) -> bool {
        self.line.is_alive()
            || self.circle.is_alive()
            || self.path_matchers.iter().any(PathMatcher::is_alive)
    }

    fn update(&mut self, blob_id: BlobId, results: &mut Vec<TrackingResult>) {
        for (path_index, matcher) in self.path_matchers.iter_mut().enumerate() {
            let progress = matcher.travel();
            if matcher.is_alive() && !matcher.history().is_empty() {
                results.push(TrackingResult::Pathway {
                    blob_id,
                    path_index,
                    completion: progress.traveled,
                    error: progress.error,
                });
            }
        }

        // Lines first, then circles.
        self.line.track();
        if self.line.is_alive() {
            if let Some(line) = self.line.identify() {
                results.push(TrackingResult::Line { blob_id, line });
            }
        }

        self.circle.track();
        if self.circle.is_alive() {
            if let Some(circle) = self.circle.identify() {
                results.push(TrackingResult::Circle { blob_id, circle });
            }
        }
    }
}

/// Maps blob IDs to their trackers and runs the per-tick update and cleanup.
#[derive(Debug)]
pub struct TrackerRegistry {
    config: TrackerConfig,
    references: Vec<Arc<PathReference>>,
    projection: Option<Homography>,
    blobs: BTreeMap<BlobId, BlobTrackers>,
}

impl TrackerRegistry {
    /// Builds a registry around already-loaded reference paths. The projection
    /// from `config` is attached to every reference and every shape tracker.
    pub fn new(config: TrackerConfig, references: Vec<PathReference>) -> Result<Self> {
        config.validate()?;
        let projection = config.projection.homography()?;
        let references = references
            .into_iter()
            .map(|reference| Arc::new(reference.with_projection(projection)))
            .collect();
        Ok(Self {
            config,
            references,
            projection,
            blobs: BTreeMap::new(),
        })
    }

    /// Builds a registry and loads every reference path named in `config`.
    /// An unreadable asset is an error.
    pub fn from_config(config: TrackerConfig) -> Result<Self> {
        let references = config
            .reference_paths
            .iter()
            .map(|path| PathReference::load(path, &config.path))
            .collect::<Result<Vec<_>>>()?;
        Self::new(config, references)
    }

    /// Routes one observed position to the blob's trackers, creating them if the
    /// blob has not been seen before.
    pub fn on_event(&mut self, blob_id: BlobId, position: Point2<f64>, timestamp: f64) {
        let Self {
            config,
            references,
            projection,
            blobs,
        } = self;
        let trackers = blobs.entry(blob_id).or_insert_with(|| {
            debug!(blob_id, "tracking new blob");
            BlobTrackers::new(config, references, *projection)
        });
        trackers.follow(blob_id, &TimedSample::new(position, timestamp));
    }

    pub fn on_update(&mut self, update: &BlobUpdate, timestamp: f64) {
        self.on_event(update.blob_id, update.position(), timestamp);
    }

    /// Advances every blob by one tick and removes the ones that died.
    pub fn tick(&mut self, now: f64) -> TickReport {
        let mut results = Vec::new();
        let mut expired = Vec::new();

        for (&blob_id, trackers) in self.blobs.iter_mut() {
            if !trackers.is_alive() {
                expired.push(blob_id);
                continue;
            }
            trackers.update(blob_id, &mut results);
        }

        for blob_id in &expired {
            self.blobs.remove(blob_id);
            debug!(blob_id, "blob expired");
        }

        TickReport {
            timestamp: now,
            results,
            expired,
        }
    }

    /// The trackers of a blob. Asking for a blob that is not tracked is a caller
    /// bug; it is reported as `UnknownBlob` in every build, never as a panic.
    pub fn blob(&self, blob_id: BlobId) -> Result<&BlobTrackers> {
        self.blobs.get(&blob_id).ok_or(TrackingError::UnknownBlob(blob_id))
    }

    /// Stops tracking a blob immediately. Unknown IDs are `UnknownBlob`, as in `blob`.
    pub fn forget(&mut self, blob_id: BlobId) -> Result<BlobTrackers> {
        self.blobs.remove(&blob_id).ok_or(TrackingError::UnknownBlob(blob_id))
    }

    pub fn contains(&self, blob_id: BlobId) -> bool {
        self.blobs.contains_key(&blob_id)
    }

    pub fn blob_ids(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.blobs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn references(&self) -> &[Arc<PathReference>] {
        &self.references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn diagonal_path(config: &TrackerConfig) -> PathReference {
        let image = GrayImage::from_fn(640, 480, |x, y| Luma([u8::from(x == y)]));
        PathReference::from_luma(&image, &config.path)
    }

    #[test]
    fn first_sighting_creates_one_matcher_per_path() {
        let config = TrackerConfig::default();
        let references = vec![diagonal_path(&config), diagonal_path(&config)];
        let mut registry = TrackerRegistry::new(config, references).unwrap();
        assert!(registry.is_empty());

        registry.on_event(3, Point2::new(100.0, 100.0), 0.0);
        registry.on_event(3, Point2::new(110.0, 110.0), 0.03);
        registry.on_event(4, Point2::new(200.0, 200.0), 0.03);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.blob_ids().collect::<Vec<_>>(), vec![3, 4]);
        let trackers = registry.blob(3).unwrap();
        assert_eq!(trackers.path_matchers.len(), 2);
        assert_eq!(trackers.line.history().len(), 2);
        assert_eq!(trackers.path_matchers[1].history().len(), 2);
    }

    #[test]
    fn tick_reports_pathway_progress() {
        let config = TrackerConfig::default();
        let references = vec![diagonal_path(&config)];
        let mut registry = TrackerRegistry::new(config, references).unwrap();

        for i in 0..5 {
            let v = 100.0 + 10.0 * i as f64;
            registry.on_event(1, Point2::new(v, v), i as f64 * 0.03);
        }
        let report = registry.tick(0.15);
        let pathway = report
            .results
            .iter()
            .find(|r| matches!(r, TrackingResult::Pathway { .. }))
            .expect("a pathway result for the live blob");
        match pathway {
            TrackingResult::Pathway {
                blob_id,
                path_index,
                completion,
                error,
            } => {
                assert_eq!(*blob_id, 1);
                assert_eq!(*path_index, 0);
                assert!(*completion > 0.0 && *completion <= 1.0);
                assert_eq!(*error, 0.0);
            }
            _ => unreachable!(),
        }
        // Not enough history for shapes yet.
        assert!(report.results.iter().all(|r| matches!(r, TrackingResult::Pathway { .. })));
    }

    #[test]
    fn unknown_blob_is_reported() {
        let mut registry = TrackerRegistry::new(TrackerConfig::default(), Vec::new()).unwrap();
        assert!(matches!(registry.blob(9), Err(TrackingError::UnknownBlob(9))));
        assert!(matches!(registry.forget(9), Err(TrackingError::UnknownBlob(9))));

        registry.on_event(9, Point2::new(1.0, 1.0), 0.0);
        assert!(registry.forget(9).is_ok());
        assert!(!registry.contains(9));
    }

    #[test]
    fn removal_is_deferred_to_the_end_of_the_tick() {
        let config = TrackerConfig {
            max_lifetime: 1,
            ..TrackerConfig::default()
        };
        let mut registry = TrackerRegistry::new(config, Vec::new()).unwrap();
        registry.on_event(1, Point2::new(1.0, 1.0), 0.0);
        registry.on_event(2, Point2::new(2.0, 2.0), 0.0);

        // Data tick, then one idle tick drains the single unit of lifetime.
        assert!(registry.tick(0.0).expired.is_empty());
        assert!(registry.tick(0.1).expired.is_empty());
        let report = registry.tick(0.2);
        assert_eq!(report.expired, vec![1, 2]);
        assert!(registry.is_empty());
    }

    #[test]
    fn result_addresses_and_serialization() {
        let line = TrackingResult::Line {
            blob_id: 7,
            line: LineDetection {
                slope: 1.0,
                intercept: 0.0,
            },
        };
        assert_eq!(line.address(), "/bigBrother/trail");
        assert_eq!(line.blob_id(), 7);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["kind"], "line");
        assert_eq!(json["slope"], 1.0);
        assert_eq!(json["blob_id"], 7);
    }

    #[test]
    fn unreadable_reference_asset_is_fatal() {
        let config = TrackerConfig {
            reference_paths: vec!["/definitely/not/here.png".into()],
            ..TrackerConfig::default()
        };
        assert!(matches!(TrackerRegistry::from_config(config), Err(TrackingError::Image(_))));
    }
}
