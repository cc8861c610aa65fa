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

//! Tile identity and logical fetch paths.
//!
//! A [`TileKey`] is the cache's lookup key. It compares by value, so two keys
//! built independently for the same tile find the same cache entry.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of both halves of a [`NowcastTimestamp`], e.g. `20250301123500`.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Product segment of overlay tile paths (high-resolution precipitation nowcast).
const OVERLAY_PRODUCT: &str = "hrpns";

/// Which nowcast product the time series comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NowcastMode {
    /// Recent radar observations.
    #[default]
    Observation,
    /// Short-range forecast frames.
    Forecast,
}

impl NowcastMode {
    /// File name of the time list for this mode, relative to the nowcast root.
    #[must_use]
    pub fn time_list_file(self) -> &'static str {
        match self {
            Self::Observation => "targetTimes_N1.json",
            Self::Forecast => "targetTimes_N2.json",
        }
    }

    /// Human-readable name for status display.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Observation => "Observation",
            Self::Forecast => "Forecast",
        }
    }
}

/// An immutable (base-time, valid-time) pair identifying one overlay frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NowcastTimestamp {
    #[serde(rename = "basetime")]
    base_time: String,
    #[serde(rename = "validtime")]
    valid_time: String,
}

impl NowcastTimestamp {
    #[must_use]
    pub fn new(base_time: impl Into<String>, valid_time: impl Into<String>) -> Self {
        Self {
            base_time: base_time.into(),
            valid_time: valid_time.into(),
        }
    }

    /// Issue time of the product run.
    #[must_use]
    pub fn base_time(&self) -> &str {
        &self.base_time
    }

    /// Instant the frame depicts.
    #[must_use]
    pub fn valid_time(&self) -> &str {
        &self.valid_time
    }

    /// Parse the valid time as UTC. `None` if it does not match [`TIMESTAMP_FORMAT`].
    #[must_use]
    pub fn valid_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.valid_time, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Short "MM/DD HH:MM" label of the valid time.
    ///
    /// Falls back to the raw string when it cannot be parsed.
    #[must_use]
    pub fn label(&self) -> String {
        self.valid_at().map_or_else(
            || self.valid_time.clone(),
            |t| t.format("%m/%d %H:%M").to_string(),
        )
    }
}

/// The tile pyramid a key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TileSource {
    /// Base map tiles addressed by zoom/x/y only.
    BaseMap,
    /// Nowcast overlay tiles for one frame.
    Overlay(NowcastTimestamp),
}

/// Identifies one fetchable tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    source: TileSource,
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Key for a base map tile.
    #[must_use]
    pub fn base_map(zoom: u8, x: u32, y: u32) -> Self {
        Self {
            source: TileSource::BaseMap,
            zoom,
            x,
            y,
        }
    }

    /// Key for an overlay tile of the given frame.
    #[must_use]
    pub fn overlay(time: &NowcastTimestamp, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            source: TileSource::Overlay(time.clone()),
            zoom,
            x,
            y,
        }
    }

    #[must_use]
    pub fn source(&self) -> &TileSource {
        &self.source
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }

    #[must_use]
    pub fn is_overlay(&self) -> bool {
        matches!(self.source, TileSource::Overlay(_))
    }

    /// Logical path of the tile, relative to its source's root and without
    /// a file extension.
    ///
    /// Base map: `{zoom}/{x}/{y}`.
    /// Overlay: `{base}/none/{valid}/surf/hrpns/{zoom}/{x}/{y}`.
    #[must_use]
    pub fn path(&self) -> String {
        match &self.source {
            TileSource::BaseMap => format!("{}/{}/{}", self.zoom, self.x, self.y),
            TileSource::Overlay(time) => format!(
                "{}/none/{}/surf/{}/{}/{}/{}",
                time.base_time, time.valid_time, OVERLAY_PRODUCT, self.zoom, self.x, self.y
            ),
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            TileSource::BaseMap => write!(f, "base:{}", self.path()),
            TileSource::Overlay(_) => write!(f, "overlay:{}", self.path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_base_map_path() {
        assert_eq!(TileKey::base_map(6, 56, 25).path(), "6/56/25");
    }

    #[test]
    fn test_overlay_path() {
        let time = NowcastTimestamp::new("20250301120000", "20250301123500");
        let key = TileKey::overlay(&time, 7, 113, 50);
        assert_eq!(
            key.path(),
            "20250301120000/none/20250301123500/surf/hrpns/7/113/50"
        );
        assert!(key.is_overlay());
    }

    #[test]
    fn test_keys_compare_by_value() {
        let a = NowcastTimestamp::new("20250301120000", "20250301120000");
        let b = NowcastTimestamp::new("20250301120000", "20250301120500");

        let mut keys = HashSet::new();
        keys.insert(TileKey::overlay(&a, 5, 1, 2));
        keys.insert(TileKey::overlay(&a.clone(), 5, 1, 2));
        keys.insert(TileKey::overlay(&b, 5, 1, 2));
        keys.insert(TileKey::base_map(5, 1, 2));

        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_timestamp_label() {
        let time = NowcastTimestamp::new("20250301120000", "20250301123500");
        assert_eq!(time.label(), "03/01 12:35");

        let odd = NowcastTimestamp::new("x", "not-a-time");
        assert!(odd.valid_at().is_none());
        assert_eq!(odd.label(), "not-a-time");
    }

    #[test]
    fn test_time_list_files() {
        assert_eq!(NowcastMode::Observation.time_list_file(), "targetTimes_N1.json");
        assert_eq!(NowcastMode::Forecast.time_list_file(), "targetTimes_N2.json");
    }
}
