// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tile cache, fetch scheduler, projection and time-series engine for
//! precipitation nowcast overlays drawn over a slippy base map.
//!
//! The crate is split into layers that can be used on their own or through
//! the [`Engine`] context object:
//!
//! - **Projection**: Web Mercator math, view state and visible tile ranges
//! - **Keys**: tile identity and logical fetch paths
//! - **Fetch**: the fetch and decode capabilities, with blocking HTTP and
//!   `image` implementations
//! - **Scheduler**: a fixed worker pool running fetch jobs in FIFO order
//! - **Cache**: a bounded LRU cache deduplicating fetches and decoding lazily
//! - **Timeline**: frame selection and cross-fade animation
//!
//! # Quick Start
//!
//! ```no_run
//! use nowcast_core::{Engine, EngineConfig, HttpConfig, ViewState};
//! use std::time::{Duration, Instant};
//!
//! let mut engine = Engine::with_http(EngineConfig::default(), HttpConfig::default())
//!     .expect("HTTP client");
//! engine.refresh_series().ok();
//!
//! let view = ViewState::new(1280.0, 800.0, 6.0).centered_on(139.767_125, 35.681_236);
//! let ready = engine.ready_signal();
//! loop {
//!     let frame = engine.frame(&view, Instant::now());
//!     if frame.is_complete() {
//!         break;
//!     }
//!     let _ = ready.recv_timeout(Duration::from_millis(100));
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ```
//! use nowcast_core::projection::{visible_base_tiles, ViewState};
//!
//! let view = ViewState::new(512.0, 512.0, 6.0).centered_on(139.767_125, 35.681_236);
//! let tiles = visible_base_tiles(&view);
//! assert!(tiles.iter().any(|t| (t.x, t.y) == (56, 25)));
//! ```

pub mod cache;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod key;
pub mod projection;
pub mod scheduler;
pub mod timeline;

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use log::debug;

pub use cache::{CacheConfig, CacheStats, EntryState, TileCache};
pub use decode::{RgbaDecoder, RgbaTile};
pub use error::{DecodeError, FetchError};
pub use fetch::http::{Endpoints, HttpConfig, HttpFetcher};
pub use fetch::{RetryPolicy, TileDecoder, TileFetcher, TimeListFetcher};
pub use key::{NowcastMode, NowcastTimestamp, TileKey, TileSource};
pub use projection::{GeoBounds, PlacedTile, ViewState};
pub use scheduler::SchedulerConfig;
pub use timeline::{Blend, LayerBlend, TimeSeriesController, TimelineConfig};

/// Configuration for the full engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub timeline: TimelineConfig,
}

/// One tile of a frame, with its image if the cache had it ready.
#[derive(Debug)]
pub struct FrameTile<I> {
    pub tile: PlacedTile,
    pub key: TileKey,
    pub image: Option<Arc<I>>,
}

/// One overlay frame to composite at `alpha`.
#[derive(Debug)]
pub struct OverlayLayer<I> {
    /// Index into the active series.
    pub index: usize,
    pub alpha: f32,
    pub time: NowcastTimestamp,
    pub tiles: Vec<FrameTile<I>>,
}

/// Everything needed to draw one frame, bottom layer first.
#[derive(Debug)]
pub struct Frame<I> {
    pub base: Vec<FrameTile<I>>,
    pub overlays: Vec<OverlayLayer<I>>,
    pub animating: bool,
}

impl<I> Frame<I> {
    /// True when every tile in the frame has an image.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.base
            .iter()
            .chain(self.overlays.iter().flat_map(|layer| layer.tiles.iter()))
            .all(|tile| tile.image.is_some())
    }

    /// Number of tiles still waiting on a fetch or decode.
    #[must_use]
    pub fn missing(&self) -> usize {
        self.base
            .iter()
            .chain(self.overlays.iter().flat_map(|layer| layer.tiles.iter()))
            .filter(|tile| tile.image.is_none())
            .count()
    }
}

/// Owns the cache, its workers and the time-series controller.
///
/// Every method is meant to be called from one thread, the one that draws.
/// Fetching happens on the cache's workers; the engine is told about
/// completions through [`Engine::ready_signal`].
pub struct Engine<D: TileDecoder> {
    cache: TileCache<D>,
    timeline: TimeSeriesController,
    time_source: Box<dyn TimeListFetcher + Send>,
}

impl<D: TileDecoder> std::fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("timeline", &self.timeline)
            .finish_non_exhaustive()
    }
}

impl Engine<RgbaDecoder> {
    /// Engine fetching over HTTP and decoding with [`RgbaDecoder`].
    pub fn with_http(config: EngineConfig, http: HttpConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(http)?;
        Ok(Self::new(
            config,
            Arc::new(fetcher.clone()),
            Box::new(fetcher),
            RgbaDecoder,
        ))
    }
}

impl<D: TileDecoder> Engine<D> {
    /// Start the cache workers. The series stays empty until
    /// [`Engine::refresh_series`] succeeds.
    pub fn new(
        config: EngineConfig,
        tile_fetcher: Arc<dyn TileFetcher>,
        time_source: Box<dyn TimeListFetcher + Send>,
        decoder: D,
    ) -> Self {
        Self {
            cache: TileCache::new(&config.cache, &config.scheduler, tile_fetcher, decoder),
            timeline: TimeSeriesController::new(config.timeline),
            time_source,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &TileCache<D> {
        &self.cache
    }

    #[must_use]
    pub fn timeline(&self) -> &TimeSeriesController {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut TimeSeriesController {
        &mut self.timeline
    }

    #[must_use]
    pub fn mode(&self) -> NowcastMode {
        self.timeline.mode()
    }

    /// Select the active mode without refetching its series.
    pub fn set_mode(&mut self, mode: NowcastMode) -> bool {
        self.timeline.set_mode(mode)
    }

    /// Fetch the active mode's series. On failure the old series is kept.
    pub fn refresh_series(&mut self) -> Result<usize, FetchError> {
        self.timeline.refresh_series(self.time_source.as_ref())
    }

    /// Select `mode` and load its series.
    pub fn switch_mode(&mut self, mode: NowcastMode) -> Result<usize, FetchError> {
        self.timeline.set_mode(mode);
        self.refresh_series()
    }

    pub fn step_by(&mut self, delta: isize, now: Instant) -> bool {
        self.timeline.step_by(delta, now)
    }

    pub fn step_to(&mut self, index: usize, now: Instant) -> bool {
        self.timeline.step_to(index, now)
    }

    pub fn autoplay_tick(&mut self, now: Instant) -> bool {
        self.timeline.autoplay_tick(now)
    }

    /// Poll the cache for one tile. See [`TileCache::get_or_fetch`].
    pub fn get_or_fetch(&self, key: &TileKey) -> Option<Arc<D::Image>> {
        self.cache.get_or_fetch(key)
    }

    /// Advance the timeline to `now` and poll every tile the view needs.
    ///
    /// Overlay tiles are only requested for the frames actually being drawn:
    /// the current one when idle, both ends of a cross-fade otherwise.
    pub fn frame(&mut self, view: &ViewState, now: Instant) -> Frame<D::Image> {
        let base = projection::visible_base_tiles(view)
            .into_iter()
            .map(|tile| self.poll(tile, TileKey::base_map(tile.zoom, tile.x, tile.y)))
            .collect();

        let blend = self.timeline.tick(now);
        let overlay_tiles = projection::visible_overlay_tiles(view);
        let overlays = blend
            .layers()
            .into_iter()
            .filter_map(|layer| {
                let time = self.timeline.get(layer.index)?.clone();
                let tiles = overlay_tiles
                    .iter()
                    .map(|&tile| {
                        let key = TileKey::overlay(&time, tile.zoom, tile.x, tile.y);
                        self.poll(tile, key)
                    })
                    .collect();
                Some(OverlayLayer {
                    index: layer.index,
                    alpha: layer.alpha,
                    time,
                    tiles,
                })
            })
            .collect();

        Frame {
            base,
            overlays,
            animating: matches!(blend, Blend::CrossFade { .. }),
        }
    }

    fn poll(&self, tile: PlacedTile, key: TileKey) -> FrameTile<D::Image> {
        let image = self.cache.get_or_fetch(&key);
        if image.is_none() {
            debug!("Tile {key} not ready");
        }
        FrameTile { tile, key, image }
    }

    /// Receives a message whenever fetched bytes are stored. Repaint on it.
    #[must_use]
    pub fn ready_signal(&self) -> Receiver<()> {
        self.cache.ready_signal()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Decodes any bytes to their length.
    struct LenDecoder;

    impl TileDecoder for LenDecoder {
        type Image = usize;

        fn decode(&self, _key: &TileKey, bytes: &[u8]) -> Result<usize, DecodeError> {
            Ok(bytes.len())
        }
    }

    fn times(n: usize) -> Vec<NowcastTimestamp> {
        (0..n)
            .map(|i| NowcastTimestamp::new("20250301120000", format!("2025030112{:02}00", i * 5)))
            .collect()
    }

    fn engine(series_len: usize) -> Engine<LenDecoder> {
        let tiles: Arc<dyn TileFetcher> =
            Arc::new(|key: &TileKey| -> Result<Vec<u8>, FetchError> {
                Ok(key.path().into_bytes())
            });
        let time_source = move |mode: NowcastMode| -> Result<Vec<NowcastTimestamp>, FetchError> {
            match mode {
                NowcastMode::Observation => Ok(times(series_len)),
                NowcastMode::Forecast => Err(FetchError::Status(404)),
            }
        };
        Engine::new(EngineConfig::default(), tiles, Box::new(time_source), LenDecoder)
    }

    fn view() -> ViewState {
        ViewState::new(512.0, 512.0, 6.0).centered_on(139.767_125, 35.681_236)
    }

    fn wait_complete(
        engine: &mut Engine<LenDecoder>,
        view: &ViewState,
        now: Instant,
    ) -> Frame<usize> {
        let ready = engine.ready_signal();
        for _ in 0..200 {
            let frame = engine.frame(view, now);
            if frame.is_complete() {
                return frame;
            }
            let _ = ready.recv_timeout(Duration::from_millis(20));
        }
        panic!("frame never completed");
    }

    #[test]
    fn test_frame_without_series_has_no_overlays() {
        let mut engine = engine(0);
        let frame = wait_complete(&mut engine, &view(), Instant::now());
        assert!(!frame.base.is_empty());
        assert!(frame.overlays.is_empty());
        assert!(frame.base.iter().all(|t| !t.key.is_overlay()));
    }

    #[test]
    fn test_frame_loads_current_overlay() {
        let mut engine = engine(4);
        assert_eq!(engine.refresh_series().unwrap(), 4);

        let first = engine.frame(&view(), Instant::now());
        assert!(!first.is_complete());
        assert!(first.missing() > 0);

        let frame = wait_complete(&mut engine, &view(), Instant::now());
        assert_eq!(frame.overlays.len(), 1);
        let layer = &frame.overlays[0];
        assert_eq!(layer.index, 0);
        assert!(layer.tiles.iter().all(|t| t.key.is_overlay() && t.key.zoom() == 5));

        // Decoded image is the length of the fetched path
        let tile = &frame.base[0];
        assert_eq!(*tile.image.as_deref().unwrap(), tile.key.path().len());
    }

    #[test]
    fn test_cross_fade_requests_both_frames() {
        let start = Instant::now();
        let mut engine = engine(4);
        engine.refresh_series().unwrap();
        assert!(engine.step_to(2, start));

        let frame = engine.frame(&view(), start + Duration::from_millis(100));
        assert!(frame.animating);
        let indices: Vec<usize> = frame.overlays.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![0, 2]);

        let done = engine.frame(&view(), start + Duration::from_secs(1));
        assert!(!done.animating);
        assert_eq!(done.overlays.len(), 1);
        assert_eq!(engine.timeline().current_index(), 2);
    }

    #[test]
    fn test_switch_mode_failure_keeps_series() {
        let mut engine = engine(3);
        engine.refresh_series().unwrap();
        assert!(engine.switch_mode(NowcastMode::Forecast).is_err());
        assert_eq!(engine.mode(), NowcastMode::Forecast);
        assert_eq!(engine.timeline().len(), 3);
    }

    #[test]
    fn test_stats_track_entries() {
        let mut engine = engine(1);
        engine.refresh_series().unwrap();
        let frame = wait_complete(&mut engine, &view(), Instant::now());
        let stats = engine.stats();
        let tiles = frame.base.len() + frame.overlays[0].tiles.len();
        assert_eq!(stats.entries, tiles);
        assert_eq!(stats.decoded, tiles);
        assert_eq!(stats.pending, 0);
    }
}
