use crate::config::toml_config::TrackingConfig;
use crate::domain::model::{Detection, TrackedObject};
use chrono::{DateTime, Local};

/// IoU 追蹤器：只回報剛進入畫面的物件
pub struct ObjectTracker {
    config: TrackingConfig,
    tracks: Vec<TrackedObject>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn active_tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Tracks seen in the latest frame that still have no snapshot, oldest
    /// first. An object skipped by the save rate limit stays here until a
    /// save lands.
    pub fn unsaved(&self) -> Vec<TrackedObject> {
        self.tracks
            .iter()
            .filter(|t| !t.saved && t.missed == 0)
            .cloned()
            .collect()
    }

    pub fn mark_saved(&mut self, id: u64) {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id == id) {
            track.saved = true;
        }
    }

    /// Feeds one frame of detections and returns the objects that were not
    /// matched to any existing track.
    pub fn update(&mut self, detections: &[Detection], now: DateTime<Local>) -> Vec<TrackedObject> {
        if !self.config.enabled {
            return detections
                .iter()
                .map(|d| self.spawn(d, now))
                .collect();
        }

        // 所有 (track, detection) 配對依 IoU 由大到小貪婪匹配
        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, detection) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&detection.bbox);
                if iou >= self.config.iou_threshold && iou > 0.0 {
                    candidates.push((iou, ti, di));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut detection_matched = vec![false; detections.len()];
        for (_, ti, di) in candidates {
            if track_matched[ti] || detection_matched[di] {
                continue;
            }
            track_matched[ti] = true;
            detection_matched[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.last_seen = now;
            track.missed = 0;
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.missed += 1;
            }
        }
        let max_missed = self.config.max_missed;
        let before = self.tracks.len();
        self.tracks.retain(|t| t.missed <= max_missed);
        if self.tracks.len() < before {
            tracing::debug!("Dropped {} stale track(s)", before - self.tracks.len());
        }

        let mut new_objects = Vec::new();
        for (detection, matched) in detections.iter().zip(&detection_matched) {
            if *matched {
                continue;
            }
            let object = self.spawn(detection, now);
            self.tracks.push(object.clone());
            new_objects.push(object);
        }

        if !new_objects.is_empty() {
            tracing::info!(
                "🐾 {} new object(s) entered the scene ({} tracked)",
                new_objects.len(),
                self.tracks.len()
            );
        }
        new_objects
    }

    fn spawn(&mut self, detection: &Detection, now: DateTime<Local>) -> TrackedObject {
        let id = self.next_id;
        self.next_id += 1;
        TrackedObject {
            id,
            bbox: detection.bbox,
            first_seen: now,
            last_seen: now,
            missed: 0,
            saved: false,
        }
    }
}
