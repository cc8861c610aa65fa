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

//! Web Mercator projection and tile addressing.
//!
//! Everything here is pure. World coordinates are tile pixels at an integer
//! zoom: the world at zoom `z` is `256 * 2^z` pixels on a side, with the origin
//! at the north-west corner.
//!
//! The view carries a continuous ("fractional") zoom `Z`. Tiles are fetched at
//! `floor(Z)` clamped to the source's supported range and drawn scaled by
//! `2^(Z - floor(Z))`. The overlay uses its own zoom selection, see
//! [`overlay_zoom`].

mod view;

pub use view::{GeoBounds, ViewState};

use std::f64::consts::PI;

/// Edge length of every tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Latitudes are clamped to this before projecting (the square Web Mercator world).
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// Inclusive range of integer zooms a tile source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    pub min: u8,
    pub max: u8,
}

impl ZoomRange {
    /// Zooms served by the base map.
    pub const BASE_MAP: Self = Self { min: 2, max: 18 };
    /// Zooms served by the nowcast overlay.
    pub const OVERLAY: Self = Self { min: 4, max: 13 };

    /// Clamp an integer zoom candidate into this range.
    #[must_use]
    pub fn clamp(self, zoom: i32) -> u8 {
        let clamped = zoom.clamp(i32::from(self.min), i32::from(self.max));
        u8::try_from(clamped).unwrap_or(self.max)
    }

    /// Clamp a continuous zoom into this range.
    #[must_use]
    pub fn clamp_fractional(self, zoom: f64) -> f64 {
        zoom.clamp(f64::from(self.min), f64::from(self.max))
    }
}

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Size of the world in pixels at the given zoom.
    #[must_use]
    pub fn world_size(zoom: u8) -> f64 {
        f64::from(TILE_SIZE) * 2_f64.powi(i32::from(zoom))
    }

    /// Convert longitude to world X in pixels.
    #[must_use]
    pub fn world_x(lon: f64, zoom: u8) -> f64 {
        Self::world_size(zoom) * ((lon + 180.0) / 360.0)
    }

    /// Convert latitude to world Y in pixels, clamping to [`MAX_LATITUDE`].
    #[must_use]
    pub fn world_y(lat: f64, zoom: u8) -> f64 {
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let merc = (PI / 4.0 + lat / 2.0).tan().ln();
        Self::world_size(zoom) * (1.0 - merc / PI) / 2.0
    }

    /// Convert world X back to longitude.
    #[must_use]
    pub fn lon_from_world_x(wx: f64, zoom: u8) -> f64 {
        wx / Self::world_size(zoom) * 360.0 - 180.0
    }

    /// Convert world Y back to latitude.
    #[must_use]
    pub fn lat_from_world_y(wy: f64, zoom: u8) -> f64 {
        let n = PI * (1.0 - 2.0 * wy / Self::world_size(zoom));
        n.sinh().atan().to_degrees()
    }
}

/// Integer tile zoom for a continuous zoom: `floor(zoom)` clamped into `range`.
#[must_use]
pub fn tile_zoom(zoom: f64, range: ZoomRange) -> u8 {
    range.clamp(zoom.floor() as i32)
}

/// On-screen scale of tiles fetched at `tile_zoom` when the view is at `zoom`.
#[must_use]
pub fn zoom_scale(zoom: f64, tile_zoom: u8) -> f64 {
    2_f64.powf(zoom - f64::from(tile_zoom))
}

/// Unclamped overlay zoom for a continuous view zoom.
///
/// An exact integer zoom selects one level below it (7.0 gives 6); any
/// fractional zoom selects its floor (7.3 gives 7). Overlay tiles stay
/// available across zoom boundaries this way.
#[must_use]
#[allow(clippy::float_cmp, reason = "an exactly integral zoom is the trigger")]
pub fn overlay_zoom_candidate(zoom: f64) -> i32 {
    let floor = zoom.floor();
    if zoom == floor {
        (floor as i32).saturating_sub(1)
    } else {
        floor as i32
    }
}

/// Overlay zoom for a continuous view zoom, clamped to [`ZoomRange::OVERLAY`].
#[must_use]
pub fn overlay_zoom(zoom: f64) -> u8 {
    ZoomRange::OVERLAY.clamp(overlay_zoom_candidate(zoom))
}

/// Number of tiles along one axis at `zoom`, saturating far past any real zoom.
fn tiles_per_axis(zoom: u8) -> i64 {
    1_i64 << zoom.min(62)
}

/// Wrap a tile column into `[0, 2^zoom)`. Longitude is cyclic.
#[must_use]
pub fn wrap_tile_x(x: i64, zoom: u8) -> u32 {
    let n = tiles_per_axis(zoom);
    u32::try_from(x.rem_euclid(n)).unwrap_or(0)
}

/// Clamp a tile row into `[0, 2^zoom - 1]`. Latitude does not wrap.
#[must_use]
pub fn clamp_tile_y(y: i64, zoom: u8) -> u32 {
    let n = tiles_per_axis(zoom);
    u32::try_from(y.clamp(0, n - 1)).unwrap_or(0)
}

/// Inclusive, un-normalized range of tile indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl TileRange {
    /// Iterate row by row over every `(x, y)` in the range.
    pub fn iter(self) -> impl Iterator<Item = (i64, i64)> {
        (self.y0..=self.y1).flat_map(move |y| (self.x0..=self.x1).map(move |x| (x, y)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let w = usize::try_from(self.x1 - self.x0 + 1).unwrap_or(0);
        let h = usize::try_from(self.y1 - self.y0 + 1).unwrap_or(0);
        w * h
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Axis-aligned square on screen, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

impl ScreenRect {
    fn intersects_viewport(&self, width: f64, height: f64) -> bool {
        self.x + self.size > 0.0 && self.x < width && self.y + self.size > 0.0 && self.y < height
    }
}

/// A tile to draw: its normalized address and where it lands on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedTile {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub rect: ScreenRect,
}

/// World-pixel extent of the view at its base tile zoom: `(x0, y0, x1, y1)`.
fn world_extent(view: &ViewState) -> (f64, f64, f64, f64) {
    let scale = view.scale();
    (
        view.origin_x,
        view.origin_y,
        view.origin_x + view.width / scale,
        view.origin_y + view.height / scale,
    )
}

/// Base map tile range covering the view.
#[must_use]
pub fn base_tile_range(view: &ViewState) -> TileRange {
    let tile = f64::from(TILE_SIZE);
    let (wx0, wy0, wx1, wy1) = world_extent(view);
    TileRange {
        x0: (wx0 / tile).floor() as i64,
        y0: (wy0 / tile).floor() as i64,
        x1: (wx1 / tile).floor() as i64,
        y1: (wy1 / tile).floor() as i64,
    }
}

/// Number of base map tile widths one overlay tile spans.
#[must_use]
pub fn overlay_span(base_zoom: u8, overlay_zoom: u8) -> f64 {
    2_f64.powi(i32::from(base_zoom) - i32::from(overlay_zoom))
}

/// Overlay tile range covering the view, in overlay-tile units, padded by one
/// tile on every side.
#[must_use]
pub fn overlay_tile_range(view: &ViewState) -> TileRange {
    let span = f64::from(TILE_SIZE) * overlay_span(view.tile_zoom(), overlay_zoom(view.zoom));
    let (wx0, wy0, wx1, wy1) = world_extent(view);
    TileRange {
        x0: (wx0 / span).floor() as i64 - 1,
        y0: (wy0 / span).floor() as i64 - 1,
        x1: (wx1 / span).floor() as i64 + 1,
        y1: (wy1 / span).floor() as i64 + 1,
    }
}

fn place_tiles(view: &ViewState, range: TileRange, zoom: u8, span: f64) -> Vec<PlacedTile> {
    let scale = view.scale();
    let world_tile = f64::from(TILE_SIZE) * span;
    let size = world_tile * scale;

    range
        .iter()
        .filter_map(|(tx, ty)| {
            let rect = ScreenRect {
                x: ((tx as f64) * world_tile - view.origin_x) * scale,
                y: ((ty as f64) * world_tile - view.origin_y) * scale,
                size,
            };
            rect.intersects_viewport(view.width, view.height)
                .then(|| PlacedTile {
                    zoom,
                    x: wrap_tile_x(tx, zoom),
                    y: clamp_tile_y(ty, zoom),
                    rect,
                })
        })
        .collect()
}

/// Base map tiles intersecting the viewport, in row-major order.
#[must_use]
pub fn visible_base_tiles(view: &ViewState) -> Vec<PlacedTile> {
    place_tiles(view, base_tile_range(view), view.tile_zoom(), 1.0)
}

/// Overlay tiles intersecting the viewport at the overlay zoom for this view.
#[must_use]
pub fn visible_overlay_tiles(view: &ViewState) -> Vec<PlacedTile> {
    let zoom = overlay_zoom(view.zoom);
    let span = overlay_span(view.tile_zoom(), zoom);
    place_tiles(view, overlay_tile_range(view), zoom, span)
}
