//! Asynchronous image resolution.
//!
//! Every content-addressed id lives in at most one of two maps: `resolved`
//! (decoded and ready to draw) or `requested` (asked for, or data received
//! but still decoding). `to_request` holds the requested ids that have not
//! been sent upstream yet. Off-screen targets live in their own map and are
//! never swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::living::LivingEntity;
use super::offscreen::OffscreenSurface;
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::metrics;
use crate::protocol::{ClientMessage, ImageData, ImageId, OffscreenTarget};
use crate::render::{BoxGlyphs, GlyphRasterizer, canvas_size_allowed};

#[derive(Debug, Clone)]
pub enum ImageHandle {
    Bitmap(Arc<RgbaImage>),
    Offscreen(u64, Arc<Mutex<OffscreenSurface>>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub resolved_evicted: usize,
    pub requests_expired: usize,
    pub total_bytes: u64,
}

#[derive(Default)]
struct CacheState {
    resolved: HashMap<ImageId, LivingEntity<Arc<RgbaImage>>>,
    requested: HashMap<ImageId, LivingEntity<()>>,
    to_request: Vec<ImageId>,
    offscreen: HashMap<u64, (OffscreenTarget, Arc<Mutex<OffscreenSurface>>)>,
    total_bytes: u64,
}

impl CacheState {
    fn complete(&mut self, id: ImageId, image: Arc<RgbaImage>, weight: u64, now: Instant) {
        self.requested.remove(&id);
        self.to_request.retain(|pending| pending != &id);
        if let Some(previous) = self.resolved.insert(id, LivingEntity::new(image, weight, now)) {
            self.total_bytes -= previous.weight();
        }
        self.total_bytes += weight;
        metrics::IMAGE_CACHE_BYTES.set(self.total_bytes as i64);
    }
}

pub struct ImageCache {
    state: Arc<Mutex<CacheState>>,
    runtime: Handle,
    glyphs: Arc<dyn GlyphRasterizer>,
    ttl: Duration,
    budget_bytes: u64,
    log_unsupported: bool,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ImageCache")
            .field("resolved", &state.resolved.len())
            .field("requested", &state.requested.len())
            .field("to_request", &state.to_request.len())
            .field("offscreen", &state.offscreen.len())
            .field("total_bytes", &state.total_bytes)
            .finish()
    }
}

impl ImageCache {
    pub fn new(config: &ReplayConfig, runtime: Handle) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            runtime,
            glyphs: Arc::new(BoxGlyphs),
            ttl: config.image_ttl,
            budget_bytes: config.image_cache_budget_bytes,
            log_unsupported: config.log_unsupported_events,
            inflight: Mutex::new(Vec::new()),
        }
    }

    /// Uses the runtime the caller is running on.
    pub fn from_current(config: &ReplayConfig) -> Result<Self, ReplayError> {
        let runtime = Handle::try_current().map_err(|_| ReplayError::MissingRuntime)?;
        Ok(Self::new(config, runtime))
    }

    /// Rasterizer handed to off-screen targets created by this cache.
    pub fn with_glyphs(mut self, glyphs: Arc<dyn GlyphRasterizer>) -> Self {
        self.glyphs = glyphs;
        self
    }

    /// Accepts a server payload and decodes it in the background. Empty
    /// payloads resolve immediately to a zero-sized image of weight 0.
    pub fn put_image_data(&self, id: ImageId, data: ImageData) {
        match &id {
            ImageId::Unknown { description } => {
                warn!(
                    target = "replay::images",
                    %description,
                    "dropping data for unknown image reference"
                );
                return;
            }
            ImageId::Offscreen { handle } => {
                warn!(
                    target = "replay::images",
                    handle, "server sent pixel data for an off-screen target; ignoring"
                );
                return;
            }
            ImageId::Bitmap { .. } => {}
        }

        {
            let mut state = self.state.lock();
            if !state.resolved.contains_key(&id) && !state.requested.contains_key(&id) {
                state
                    .requested
                    .insert(id.clone(), LivingEntity::new((), 0, Instant::now()));
            }
            state.to_request.retain(|pending| pending != &id);
        }

        let bytes = match data {
            ImageData::Empty => {
                metrics::IMAGE_DECODES.with_label_values(&["empty"]).inc();
                self.state
                    .lock()
                    .complete(id, Arc::new(RgbaImage::new(0, 0)), 0, Instant::now());
                return;
            }
            ImageData::Encoded { bytes } => bytes,
        };

        let weight = bytes.len() as u64;
        let state = Arc::clone(&self.state);
        let task = self.runtime.spawn_blocking(move || {
            match image::load_from_memory(&bytes) {
                Ok(decoded) => {
                    let image = Arc::new(decoded.to_rgba8());
                    trace!(
                        target = "replay::images",
                        image = %id,
                        width = image.width(),
                        height = image.height(),
                        weight,
                        "decoded image"
                    );
                    metrics::IMAGE_DECODES.with_label_values(&["ok"]).inc();
                    state.lock().complete(id, image, weight, Instant::now());
                }
                Err(err) => {
                    metrics::IMAGE_DECODES.with_label_values(&["failed"]).inc();
                    warn!(
                        target = "replay::images",
                        image = %id,
                        error = %err,
                        "failed to decode image; it will expire unresolved"
                    );
                }
            }
        });

        let mut inflight = self.inflight.lock();
        inflight.retain(|task| !task.is_finished());
        inflight.push(task);
    }

    /// Never blocks on a decode: a miss returns `None` and queues a single
    /// upstream request for the id.
    pub fn get_image_data(&self, id: &ImageId) -> Option<ImageHandle> {
        self.get_image_data_at(id, Instant::now())
    }

    pub fn get_image_data_at(&self, id: &ImageId, now: Instant) -> Option<ImageHandle> {
        match id {
            ImageId::Unknown { description } => {
                metrics::IMAGE_LOOKUPS.with_label_values(&["unknown"]).inc();
                warn!(
                    target = "replay::images",
                    %description,
                    "draw references an unknown image; skipping"
                );
                None
            }
            ImageId::Offscreen { handle } => {
                let state = self.state.lock();
                let found = state
                    .offscreen
                    .get(handle)
                    .map(|(_, surface)| ImageHandle::Offscreen(*handle, Arc::clone(surface)));
                let label = if found.is_some() { "offscreen" } else { "offscreen_missing" };
                metrics::IMAGE_LOOKUPS.with_label_values(&[label]).inc();
                found
            }
            ImageId::Bitmap { .. } => {
                let mut state = self.state.lock();
                if let Some(entry) = state.resolved.get_mut(id) {
                    entry.touch(now);
                    metrics::IMAGE_LOOKUPS.with_label_values(&["hit"]).inc();
                    return Some(ImageHandle::Bitmap(Arc::clone(&entry.value)));
                }
                if state.requested.contains_key(id) {
                    metrics::IMAGE_LOOKUPS.with_label_values(&["pending"]).inc();
                    return None;
                }
                state
                    .requested
                    .insert(id.clone(), LivingEntity::new((), 0, now));
                state.to_request.push(id.clone());
                metrics::IMAGE_LOOKUPS.with_label_values(&["miss"]).inc();
                None
            }
        }
    }

    /// Looks up the local mirror of an off-screen target, creating it on
    /// first use. A size change discards the old pixels and drawing state.
    pub fn get_offscreen_processor(
        &self,
        target: &OffscreenTarget,
    ) -> Option<Arc<Mutex<OffscreenSurface>>> {
        if target.width == 0 || target.height == 0 || !canvas_size_allowed(target.width, target.height)
        {
            warn!(
                target = "replay::images",
                handle = target.handle,
                width = target.width,
                height = target.height,
                "refusing off-screen target with unusable size"
            );
            return None;
        }
        let mut state = self.state.lock();
        if let Some((known, surface)) = state.offscreen.get(&target.handle) {
            if known == target {
                return Some(Arc::clone(surface));
            }
            debug!(
                target = "replay::images",
                handle = target.handle,
                width = target.width,
                height = target.height,
                "off-screen target resized; recreating"
            );
        }
        let surface = Arc::new(Mutex::new(OffscreenSurface::new(
            *target,
            Arc::clone(&self.glyphs),
            self.log_unsupported,
        )));
        state
            .offscreen
            .insert(target.handle, (*target, Arc::clone(&surface)));
        Some(surface)
    }

    /// Drains queued misses as upstream request messages.
    pub fn extract_images_to_request(&self) -> Vec<ClientMessage> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.to_request)
            .into_iter()
            .map(|image_id| ClientMessage::RequestImageData { image_id })
            .collect()
    }

    pub fn collect_garbage(&self) -> GcReport {
        self.collect_garbage_at(Instant::now())
    }

    /// Resolved images are swept only while the cache is over budget;
    /// outstanding requests are always swept so lost replies get retried.
    pub fn collect_garbage_at(&self, now: Instant) -> GcReport {
        let ttl = self.ttl;
        let mut state = self.state.lock();

        let mut resolved_evicted = 0;
        if state.total_bytes > self.budget_bytes {
            let mut freed = 0;
            state.resolved.retain(|_, entry| {
                let alive = entry.is_alive(now, ttl);
                if !alive {
                    freed += entry.weight();
                    resolved_evicted += 1;
                }
                alive
            });
            state.total_bytes -= freed;
        }

        let before = state.requested.len();
        state.requested.retain(|_, entry| entry.is_alive(now, ttl));
        let requests_expired = before - state.requested.len();
        if requests_expired > 0 {
            let CacheState {
                requested,
                to_request,
                ..
            } = &mut *state;
            to_request.retain(|id| requested.contains_key(id));
        }

        metrics::IMAGE_CACHE_BYTES.set(state.total_bytes as i64);
        metrics::IMAGE_EVICTIONS
            .with_label_values(&["resolved"])
            .inc_by(resolved_evicted as u64);
        metrics::IMAGE_EVICTIONS
            .with_label_values(&["requested"])
            .inc_by(requests_expired as u64);
        if resolved_evicted > 0 || requests_expired > 0 {
            debug!(
                target = "replay::images",
                resolved_evicted,
                requests_expired,
                total_bytes = state.total_bytes,
                "image cache sweep"
            );
        }
        GcReport {
            resolved_evicted,
            requests_expired,
            total_bytes: state.total_bytes,
        }
    }

    /// Waits for every decode started so far.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inflight.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    warn!(target = "replay::images", error = %err, "decode task failed");
                }
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn is_resolved(&self, id: &ImageId) -> bool {
        self.state.lock().resolved.contains_key(id)
    }

    #[cfg(test)]
    fn resolved_count(&self) -> usize {
        self.state.lock().resolved.len()
    }

    #[cfg(test)]
    fn is_requested(&self, id: &ImageId) -> bool {
        self.state.lock().requested.contains_key(id)
    }

    /// Sum of resolved weights, recomputed from scratch.
    #[cfg(test)]
    fn weight_of_entries(&self) -> u64 {
        self.state
            .lock()
            .resolved
            .values()
            .map(LivingEntity::weight)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, Rgba};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .expect("encode png");
        bytes
    }

    fn config(ttl: Duration, budget: u64) -> ReplayConfig {
        ReplayConfig {
            image_ttl: ttl,
            image_cache_budget_bytes: budget,
            ..ReplayConfig::default()
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn resolved_image_is_never_requested() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        let id = ImageId::bitmap(1, 42);
        cache.put_image_data(id.clone(), ImageData::Encoded { bytes: png(3, 2) });
        cache.settle().await;
        match cache.get_image_data(&id) {
            Some(ImageHandle::Bitmap(image)) => assert_eq!(image.dimensions(), (3, 2)),
            other => panic!("expected bitmap, got {other:?}"),
        }
        assert!(cache.extract_images_to_request().is_empty());
        assert!(!cache.is_requested(&id));
    }

    #[test_timeout::tokio_timeout_test]
    async fn misses_are_requested_once() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        let id = ImageId::bitmap(2, 7);
        assert!(cache.get_image_data(&id).is_none());
        assert!(cache.get_image_data(&id).is_none());
        let requests = cache.extract_images_to_request();
        assert_eq!(
            requests,
            vec![ClientMessage::RequestImageData {
                image_id: id.clone()
            }]
        );
        assert!(cache.get_image_data(&id).is_none());
        assert!(cache.extract_images_to_request().is_empty());
        assert!(cache.is_requested(&id));
    }

    #[test_timeout::tokio_timeout_test]
    async fn data_arriving_before_send_cancels_request() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        let id = ImageId::bitmap(3, 3);
        assert!(cache.get_image_data(&id).is_none());
        cache.put_image_data(id.clone(), ImageData::Empty);
        assert!(cache.extract_images_to_request().is_empty());
        assert!(cache.is_resolved(&id));
        assert!(!cache.is_requested(&id));
    }

    #[test_timeout::tokio_timeout_test]
    async fn empty_image_weighs_nothing() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        cache.put_image_data(ImageId::bitmap(4, 0), ImageData::Empty);
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.resolved_count(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn sweep_only_evicts_when_over_budget() {
        let ttl = Duration::from_secs(30);
        let bytes = png(2, 2);
        let weight = bytes.len() as u64;
        let roomy = ImageCache::from_current(&config(ttl, weight * 10)).expect("runtime");
        roomy.put_image_data(ImageId::bitmap(5, 1), ImageData::Encoded { bytes: bytes.clone() });
        roomy.settle().await;
        let later = Instant::now() + ttl * 2;
        assert_eq!(roomy.collect_garbage_at(later).resolved_evicted, 0);
        assert_eq!(roomy.total_bytes(), weight);

        let tight = ImageCache::from_current(&config(ttl, 0)).expect("runtime");
        tight.put_image_data(ImageId::bitmap(5, 1), ImageData::Encoded { bytes });
        tight.settle().await;
        let fresh = tight.collect_garbage_at(Instant::now());
        assert_eq!(fresh.resolved_evicted, 0);
        assert_eq!(fresh.total_bytes, weight);
        let report = tight.collect_garbage_at(Instant::now() + ttl);
        assert_eq!(report.resolved_evicted, 1);
        assert_eq!(report.total_bytes, 0);
        assert_eq!(tight.weight_of_entries(), tight.total_bytes());
    }

    #[test_timeout::tokio_timeout_test]
    async fn sweep_keeps_recently_used_entries_and_exact_total() {
        let ttl = Duration::from_secs(30);
        let cache = ImageCache::from_current(&config(ttl, 0)).expect("runtime");
        let ids: Vec<ImageId> = (0..4).map(|n| ImageId::bitmap(8, n)).collect();
        let mut weights = HashMap::new();
        for (id, side) in ids.iter().zip([1, 3, 5, 9]) {
            let bytes = png(side, side);
            weights.insert(id.clone(), bytes.len() as u64);
            cache.put_image_data(id.clone(), ImageData::Encoded { bytes });
        }
        cache.settle().await;
        assert_eq!(cache.total_bytes(), weights.values().sum::<u64>());

        let start = Instant::now();
        assert!(cache.get_image_data_at(&ids[1], start + Duration::from_secs(20)).is_some());
        assert!(cache.get_image_data_at(&ids[3], start + Duration::from_secs(10)).is_some());

        let report = cache.collect_garbage_at(start + Duration::from_secs(35));
        assert_eq!(report.resolved_evicted, 2);
        assert!(!cache.is_resolved(&ids[0]));
        assert!(!cache.is_resolved(&ids[2]));
        assert!(cache.is_resolved(&ids[1]));
        assert!(cache.is_resolved(&ids[3]));
        assert_eq!(report.total_bytes, weights[&ids[1]] + weights[&ids[3]]);
        assert_eq!(cache.total_bytes(), cache.weight_of_entries());

        // A late reply for an evicted id is accepted again.
        cache.put_image_data(ids[0].clone(), ImageData::Encoded { bytes: png(1, 1) });
        cache.settle().await;
        assert!(cache.is_resolved(&ids[0]));
        assert_eq!(
            cache.total_bytes(),
            weights[&ids[0]] + weights[&ids[1]] + weights[&ids[3]]
        );
        assert_eq!(cache.total_bytes(), cache.weight_of_entries());

        let report = cache.collect_garbage_at(start + Duration::from_secs(60));
        assert_eq!(report.resolved_evicted, 3);
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.weight_of_entries(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn expired_requests_are_retried() {
        let ttl = Duration::from_secs(5);
        let cache = ImageCache::from_current(&config(ttl, u64::MAX)).expect("runtime");
        let id = ImageId::bitmap(6, 6);
        assert!(cache.get_image_data(&id).is_none());
        let report = cache.collect_garbage_at(Instant::now() + ttl);
        assert_eq!(report.requests_expired, 1);
        assert!(cache.extract_images_to_request().is_empty());
        assert!(cache.get_image_data(&id).is_none());
        assert_eq!(cache.extract_images_to_request().len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn undecodable_payload_stays_unresolved() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        let id = ImageId::bitmap(7, 7);
        cache.put_image_data(
            id.clone(),
            ImageData::Encoded {
                bytes: b"not an image".to_vec(),
            },
        );
        cache.settle().await;
        assert!(!cache.is_resolved(&id));
        assert!(cache.is_requested(&id));
        assert!(cache.get_image_data(&id).is_none());
        assert!(cache.extract_images_to_request().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn unknown_ids_are_never_cached() {
        let cache = ImageCache::from_current(&ReplayConfig::default()).expect("runtime");
        let id = ImageId::Unknown {
            description: "sun.awt.image.Mystery".into(),
        };
        cache.put_image_data(id.clone(), ImageData::Empty);
        assert!(cache.get_image_data(&id).is_none());
        assert!(cache.extract_images_to_request().is_empty());
        assert_eq!(cache.resolved_count(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn offscreen_targets_recreate_on_resize() {
        let cache = ImageCache::from_current(&config(Duration::ZERO, 0)).expect("runtime");
        let target = OffscreenTarget {
            handle: 9,
            width: 4,
            height: 4,
        };
        let first = cache.get_offscreen_processor(&target).expect("surface");
        let again = cache.get_offscreen_processor(&target).expect("surface");
        assert!(Arc::ptr_eq(&first, &again));
        let resized = cache
            .get_offscreen_processor(&OffscreenTarget { width: 8, ..target })
            .expect("surface");
        assert!(!Arc::ptr_eq(&first, &resized));
        assert_eq!(resized.lock().image().dimensions(), (8, 4));

        cache.collect_garbage_at(Instant::now() + Duration::from_secs(3600));
        assert!(matches!(
            cache.get_image_data(&ImageId::Offscreen { handle: 9 }),
            Some(ImageHandle::Offscreen(9, _))
        ));
        assert!(cache.extract_images_to_request().is_empty());
        assert!(
            cache
                .get_offscreen_processor(&OffscreenTarget {
                    handle: 10,
                    width: 0,
                    height: 3,
                })
                .is_none()
        );
    }

    #[test_timeout::timeout]
    fn construction_outside_runtime_fails() {
        assert!(matches!(
            ImageCache::from_current(&ReplayConfig::default()),
            Err(ReplayError::MissingRuntime)
        ));
    }
}
