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

//! Frame selection and cross-fade animation over the nowcast time series.
//!
//! The controller is either Idle, showing one frame at full overlay opacity,
//! or Animating between two frames. It owns no network or cache state: it
//! indexes a list handed to it and reports which frames to composite and how
//! opaque each one is.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::FetchError;
use crate::fetch::TimeListFetcher;
use crate::key::{NowcastMode, NowcastTimestamp};

/// Timing and opacity of frame transitions.
#[derive(Debug, Clone)]
pub struct TimelineConfig {
    /// Length of a cross-fade between two frames.
    pub animation_duration: Duration,
    /// Interval of the autoplay timer.
    pub step_interval: Duration,
    /// Opacity of a fully shown overlay frame.
    pub base_alpha: f32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            animation_duration: Duration::from_millis(650),
            step_interval: Duration::from_millis(700),
            base_alpha: 0.90,
        }
    }
}

/// One overlay frame to composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerBlend {
    /// Index into the active series.
    pub index: usize,
    pub alpha: f32,
}

/// What to composite this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Blend {
    /// No series loaded.
    Empty,
    /// One frame at full base opacity.
    Single(LayerBlend),
    /// Two frames with complementary opacity.
    CrossFade {
        from: LayerBlend,
        to: LayerBlend,
        progress: f32,
    },
}

impl Blend {
    /// The layers to draw, bottom first.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerBlend> {
        match *self {
            Self::Empty => Vec::new(),
            Self::Single(layer) => vec![layer],
            Self::CrossFade { from, to, .. } => vec![from, to],
        }
    }

    /// Transition progress in `[0, 1]`; 1 when nothing is animating.
    #[must_use]
    pub fn progress(&self) -> f32 {
        match *self {
            Self::Empty | Self::Single(_) => 1.0,
            Self::CrossFade { progress, .. } => progress,
        }
    }
}

/// An in-progress transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Animation {
    pub from: usize,
    pub to: usize,
    pub started: Instant,
    /// Highest progress reported so far.
    progress: f32,
}

impl Animation {
    fn progress_at(&self, now: Instant, duration: Duration) -> f32 {
        if duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        let t = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0) as f32;
        t.max(self.progress)
    }

    #[must_use]
    pub fn progress(&self) -> f32 {
        self.progress
    }
}

/// Tracks the active time series, the shown frame and any running transition.
#[derive(Debug)]
pub struct TimeSeriesController {
    config: TimelineConfig,
    mode: NowcastMode,
    series: Vec<NowcastTimestamp>,
    current: usize,
    animation: Option<Animation>,
    autoplay: bool,
    next_autoplay: Option<Instant>,
}

impl Default for TimeSeriesController {
    fn default() -> Self {
        Self::new(TimelineConfig::default())
    }
}

impl TimeSeriesController {
    #[must_use]
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            mode: NowcastMode::default(),
            series: Vec::new(),
            current: 0,
            animation: None,
            autoplay: true,
            next_autoplay: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    #[must_use]
    pub fn mode(&self) -> NowcastMode {
        self.mode
    }

    #[must_use]
    pub fn series(&self) -> &[NowcastTimestamp] {
        &self.series
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Index of the frame shown when Idle (the source frame while Animating).
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current(&self) -> Option<&NowcastTimestamp> {
        self.series.get(self.current)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&NowcastTimestamp> {
        self.series.get(index)
    }

    #[must_use]
    pub fn animation(&self) -> Option<&Animation> {
        self.animation.as_ref()
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Replace the series wholesale and show its first frame.
    pub fn set_series(&mut self, series: Vec<NowcastTimestamp>) {
        self.series = series;
        self.current = 0;
        self.animation = None;
    }

    /// Select which product's series is active. Returns whether it changed.
    ///
    /// The loaded series is kept until [`Self::refresh_series`] succeeds, so a
    /// mode switch during an outage keeps showing the old frames.
    pub fn set_mode(&mut self, mode: NowcastMode) -> bool {
        if self.mode == mode {
            return false;
        }
        info!("Nowcast mode set to {}", mode.display_name());
        self.mode = mode;
        true
    }

    /// Fetch the series for the active mode. On success the series is
    /// replaced and the index reset; on failure nothing changes.
    pub fn refresh_series(&mut self, fetcher: &dyn TimeListFetcher) -> Result<usize, FetchError> {
        match fetcher.fetch_time_list(self.mode) {
            Ok(series) => {
                let count = series.len();
                info!("Loaded {} {} frames", count, self.mode.display_name());
                self.set_series(series);
                Ok(count)
            }
            Err(e) => {
                warn!(
                    "Failed to refresh {} time list, keeping {} frames: {}",
                    self.mode.display_name(),
                    self.series.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Start a transition to `target`, clamped into the series.
    ///
    /// Returns `false` without touching any state when the clamped target is
    /// the current frame or the series is empty. A running transition is
    /// replaced by one starting from the current frame.
    pub fn step_to(&mut self, target: usize, now: Instant) -> bool {
        let Some(last) = self.series.len().checked_sub(1) else {
            return false;
        };
        let target = target.min(last);
        if target == self.current {
            return false;
        }

        self.animation = Some(Animation {
            from: self.current,
            to: target,
            started: now,
            progress: 0.0,
        });
        true
    }

    /// Step `delta` frames from the current one, clamped to the ends.
    pub fn step_by(&mut self, delta: isize, now: Instant) -> bool {
        let target = self.current.saturating_add_signed(delta);
        self.step_to(target, now)
    }

    /// Autoplay step: advance one frame, but only while Idle. Stops at the
    /// last frame.
    pub fn autoplay_tick(&mut self, now: Instant) -> bool {
        if self.is_animating() {
            return false;
        }
        self.step_by(1, now)
    }

    /// Enable or disable the autoplay timer driven by [`Self::poll_autoplay`].
    pub fn set_autoplay(&mut self, enabled: bool) {
        self.autoplay = enabled;
        self.next_autoplay = None;
    }

    #[must_use]
    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    /// Fixed-interval autoplay timer. Fires [`Self::autoplay_tick`] once per
    /// elapsed `step_interval`; missed intervals are skipped, not replayed.
    pub fn poll_autoplay(&mut self, now: Instant) -> bool {
        if !self.autoplay {
            return false;
        }
        let due = *self
            .next_autoplay
            .get_or_insert_with(|| now + self.config.step_interval);
        if now < due {
            return false;
        }
        self.next_autoplay = Some(now + self.config.step_interval);
        self.autoplay_tick(now)
    }

    /// Advance the transition to `now` and report what to composite.
    ///
    /// Progress never decreases. When it reaches 1 the destination becomes the
    /// current frame and the controller returns to Idle.
    pub fn tick(&mut self, now: Instant) -> Blend {
        if self.series.is_empty() {
            return Blend::Empty;
        }
        let base = self.config.base_alpha;

        if let Some(animation) = &mut self.animation {
            let t = animation.progress_at(now, self.config.animation_duration);
            animation.progress = t;
            if t < 1.0 {
                return Blend::CrossFade {
                    from: LayerBlend {
                        index: animation.from,
                        alpha: (1.0 - t) * base,
                    },
                    to: LayerBlend {
                        index: animation.to,
                        alpha: t * base,
                    },
                    progress: t,
                };
            }
            self.current = animation.to;
            self.animation = None;
        }

        Blend::Single(LayerBlend {
            index: self.current,
            alpha: base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> Vec<NowcastTimestamp> {
        (0..n)
            .map(|i| NowcastTimestamp::new("20250301120000", format!("202503011{:03}00", i * 5)))
            .collect()
    }

    fn controller(n: usize) -> TimeSeriesController {
        let mut c = TimeSeriesController::default();
        c.set_series(series(n));
        c
    }

    struct FixedTimes(Result<usize, ()>);

    impl TimeListFetcher for FixedTimes {
        fn fetch_time_list(&self, _mode: NowcastMode) -> Result<Vec<NowcastTimestamp>, FetchError> {
            match self.0 {
                Ok(n) => Ok(series(n)),
                Err(()) => Err(FetchError::Status(503)),
            }
        }
    }

    #[test]
    fn test_idle_reports_single_full_alpha() {
        let mut c = controller(3);
        let blend = c.tick(Instant::now());
        assert_eq!(blend, Blend::Single(LayerBlend { index: 0, alpha: 0.90 }));
        assert_eq!(blend.layers().len(), 1);
    }

    #[test]
    fn test_empty_series() {
        let mut c = TimeSeriesController::default();
        assert_eq!(c.tick(Instant::now()), Blend::Empty);
        assert!(!c.step_to(3, Instant::now()));
        assert!(!c.autoplay_tick(Instant::now()));
    }

    #[test]
    fn test_step_to_current_is_noop() {
        let mut c = controller(5);
        assert!(!c.step_to(0, Instant::now()));
        assert!(c.animation().is_none());
    }

    #[test]
    fn test_step_to_clamps() {
        let now = Instant::now();
        let mut c = controller(5);
        assert!(c.step_to(99, now));
        assert_eq!(c.animation().unwrap().to, 4);

        c.tick(now + Duration::from_secs(1));
        assert_eq!(c.current_index(), 4);
        assert!(!c.step_by(1, now));
        assert!(!c.step_to(100, now));

        c.step_by(-10, now);
        assert_eq!(c.animation().unwrap().to, 0);
    }

    #[test]
    fn test_cross_fade_is_monotonic_and_completes() {
        let start = Instant::now();
        let mut c = controller(4);
        assert!(c.step_to(2, start));

        let mut last = 0.0_f32;
        for ms in (0..=600).step_by(50) {
            let blend = c.tick(start + Duration::from_millis(ms));
            let Blend::CrossFade { from, to, progress } = blend else {
                panic!("expected cross-fade at {ms}ms, got {blend:?}");
            };
            assert!(progress >= last);
            assert_eq!((from.index, to.index), (0, 2));
            assert!((from.alpha + to.alpha - 0.90).abs() < 1e-5);
            last = progress;
        }

        // A clock reading from the past never rewinds the fade
        let blend = c.tick(start);
        assert!(blend.progress() >= last);

        let done = c.tick(start + Duration::from_millis(650));
        assert_eq!(done, Blend::Single(LayerBlend { index: 2, alpha: 0.90 }));
        assert!((done.progress() - 1.0).abs() < f32::EPSILON);
        assert!(!c.is_animating());
        assert_eq!(c.current_index(), 2);
    }

    #[test]
    fn test_manual_step_restarts_animation() {
        let start = Instant::now();
        let mut c = controller(6);
        c.step_to(1, start);
        c.tick(start + Duration::from_millis(300));

        let later = start + Duration::from_millis(400);
        assert!(c.step_to(3, later));
        let animation = c.animation().unwrap();
        assert_eq!((animation.from, animation.to), (0, 3));
        assert_eq!(animation.started, later);
        assert!(animation.progress().abs() < f32::EPSILON);
    }

    #[test]
    fn test_autoplay_only_when_idle() {
        let start = Instant::now();
        let mut c = controller(3);
        assert!(c.autoplay_tick(start));
        assert!(!c.autoplay_tick(start + Duration::from_millis(100)));

        c.tick(start + Duration::from_secs(1));
        assert_eq!(c.current_index(), 1);
        assert!(c.autoplay_tick(start + Duration::from_secs(1)));
        c.tick(start + Duration::from_secs(2));
        assert_eq!(c.current_index(), 2);

        // Stops at the end
        assert!(!c.autoplay_tick(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_poll_autoplay_interval() {
        let start = Instant::now();
        let mut c = controller(10);
        assert!(!c.poll_autoplay(start));
        assert!(!c.poll_autoplay(start + Duration::from_millis(500)));
        assert!(c.poll_autoplay(start + Duration::from_millis(700)));
        assert!(!c.poll_autoplay(start + Duration::from_millis(800)));

        c.set_autoplay(false);
        assert!(!c.poll_autoplay(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_refresh_replaces_series() {
        let mut c = controller(3);
        c.step_to(2, Instant::now());

        assert_eq!(c.refresh_series(&FixedTimes(Ok(7))).unwrap(), 7);
        assert_eq!(c.len(), 7);
        assert_eq!(c.current_index(), 0);
        assert!(!c.is_animating());
    }

    #[test]
    fn test_failed_refresh_keeps_state() {
        let now = Instant::now();
        let mut c = controller(5);
        c.step_to(3, now);
        c.tick(now + Duration::from_secs(1));
        assert!(c.set_mode(NowcastMode::Forecast));
        assert!(!c.set_mode(NowcastMode::Forecast));

        assert!(c.refresh_series(&FixedTimes(Err(()))).is_err());
        assert_eq!(c.len(), 5);
        assert_eq!(c.current_index(), 3);
        assert_eq!(c.mode(), NowcastMode::Forecast);
    }
}
