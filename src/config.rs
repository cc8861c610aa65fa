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

//! Application configuration management.
//!
//! Persistent settings are stored as TOML through `confy`. Every field has a
//! serde default so older or hand-edited files keep loading as fields are
//! added.

use std::time::Duration;

use nowcast_core::{
    CacheConfig, EngineConfig, GeoBounds, HttpConfig, NowcastMode, SchedulerConfig, ViewState,
};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "nowcast-viewer";
const CONFIG_NAME: &str = "config";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Initial map center longitude
    #[serde(default = "default_start_lon")]
    pub start_lon: f64,

    /// Initial map center latitude
    #[serde(default = "default_start_lat")]
    pub start_lat: f64,

    /// Initial continuous zoom (2.0 - 18.0)
    #[serde(default = "default_start_zoom")]
    pub start_zoom: f64,

    /// Nowcast product shown at startup
    #[serde(default)]
    pub start_mode: NowcastMode,

    /// Viewport width in pixels
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f64,

    /// Viewport height in pixels
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,

    /// Number of tile fetch threads
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Maximum number of cached tiles
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Whole-request HTTP timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Keep the view inside the region bounds below
    #[serde(default = "default_true")]
    pub clamp_to_region: bool,

    #[serde(default = "default_region_min_lon")]
    pub region_min_lon: f64,

    #[serde(default = "default_region_max_lon")]
    pub region_max_lon: f64,

    #[serde(default = "default_region_min_lat")]
    pub region_min_lat: f64,

    #[serde(default = "default_region_max_lat")]
    pub region_max_lat: f64,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_start_lon() -> f64 {
    139.767_125
}

fn default_start_lat() -> f64 {
    35.681_236
}

fn default_start_zoom() -> f64 {
    6.0
}

fn default_viewport_width() -> f64 {
    1280.0
}

fn default_viewport_height() -> f64 {
    800.0
}

fn default_fetch_workers() -> usize {
    SchedulerConfig::default().workers
}

fn default_cache_capacity() -> usize {
    CacheConfig::default().capacity
}

fn default_fetch_timeout_secs() -> u64 {
    HttpConfig::default().timeout.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_region_min_lon() -> f64 {
    GeoBounds::JAPAN.min_lon
}

fn default_region_max_lon() -> f64 {
    GeoBounds::JAPAN.max_lon
}

fn default_region_min_lat() -> f64 {
    GeoBounds::JAPAN.min_lat
}

fn default_region_max_lat() -> f64 {
    GeoBounds::JAPAN.max_lat
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            start_lon: default_start_lon(),
            start_lat: default_start_lat(),
            start_zoom: default_start_zoom(),
            start_mode: NowcastMode::default(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            fetch_workers: default_fetch_workers(),
            cache_capacity: default_cache_capacity(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            clamp_to_region: true,
            region_min_lon: default_region_min_lon(),
            region_max_lon: default_region_max_lon(),
            region_min_lat: default_region_min_lat(),
            region_max_lat: default_region_max_lat(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    pub fn region(&self) -> GeoBounds {
        GeoBounds {
            min_lon: self.region_min_lon,
            max_lon: self.region_max_lon,
            min_lat: self.region_min_lat,
            max_lat: self.region_max_lat,
        }
    }

    /// Initial view: centered on the start position, clamped to the region if enabled
    pub fn initial_view(&self) -> ViewState {
        let view = ViewState::new(self.viewport_width, self.viewport_height, self.start_zoom)
            .centered_on(self.start_lon, self.start_lat);
        if self.clamp_to_region {
            view.clamped_to(&self.region())
        } else {
            view
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cache.capacity = self.cache_capacity;
        config.scheduler.workers = self.fetch_workers;
        config
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            ..HttpConfig::default()
        }
    }
}
