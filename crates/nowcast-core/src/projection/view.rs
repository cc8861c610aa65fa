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

//! The consumer-owned view and pure helpers that derive new views from it.

use super::{tile_zoom, zoom_scale, WebMercator, ZoomRange};

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    /// Coverage area of the nowcast product.
    pub const JAPAN: Self = Self {
        min_lon: 122.0,
        max_lon: 154.0,
        min_lat: 20.0,
        max_lat: 46.0,
    };
}

/// Continuous zoom plus the world-pixel position of the viewport's top-left
/// corner, measured at the view's base tile zoom.
///
/// Owned by the consumer. The engine only reads it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub zoom: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewState {
    /// A view of the given viewport size with its origin at the world's corner.
    #[must_use]
    pub fn new(width: f64, height: f64, zoom: f64) -> Self {
        Self {
            zoom: ZoomRange::BASE_MAP.clamp_fractional(zoom),
            origin_x: 0.0,
            origin_y: 0.0,
            width,
            height,
        }
    }

    /// Integer zoom the base map is fetched at.
    #[must_use]
    pub fn tile_zoom(&self) -> u8 {
        tile_zoom(self.zoom, ZoomRange::BASE_MAP)
    }

    /// Screen pixels per world pixel.
    #[must_use]
    pub fn scale(&self) -> f64 {
        zoom_scale(self.zoom, self.tile_zoom())
    }

    /// World-pixel coordinates of the viewport centre.
    #[must_use]
    pub fn center_world(&self) -> (f64, f64) {
        let scale = self.scale();
        (
            self.origin_x + self.width / (2.0 * scale),
            self.origin_y + self.height / (2.0 * scale),
        )
    }

    /// Longitude and latitude under the viewport centre.
    #[must_use]
    pub fn center_lon_lat(&self) -> (f64, f64) {
        let (cx, cy) = self.center_world();
        let z = self.tile_zoom();
        (
            WebMercator::lon_from_world_x(cx, z),
            WebMercator::lat_from_world_y(cy, z),
        )
    }

    /// The same view moved so `(lon, lat)` sits at the viewport centre.
    #[must_use]
    pub fn centered_on(self, lon: f64, lat: f64) -> Self {
        let z = self.tile_zoom();
        let scale = self.scale();
        Self {
            origin_x: WebMercator::world_x(lon, z) - self.width / (2.0 * scale),
            origin_y: WebMercator::world_y(lat, z) - self.height / (2.0 * scale),
            ..self
        }
    }

    /// Zoom by `delta` keeping the viewport centre fixed. The result is
    /// clamped to the base map's zoom range.
    #[must_use]
    pub fn zoomed_at_center(self, delta: f64) -> Self {
        let old_zoom = self.tile_zoom();
        let new_zoom_f = ZoomRange::BASE_MAP.clamp_fractional(self.zoom + delta);
        let new_zoom = tile_zoom(new_zoom_f, ZoomRange::BASE_MAP);

        let (mut cx, mut cy) = self.center_world();
        if new_zoom != old_zoom {
            let factor = 2_f64.powi(i32::from(new_zoom) - i32::from(old_zoom));
            cx *= factor;
            cy *= factor;
        }

        let scale = zoom_scale(new_zoom_f, new_zoom);
        Self {
            zoom: new_zoom_f,
            origin_x: cx - self.width / (2.0 * scale),
            origin_y: cy - self.height / (2.0 * scale),
            ..self
        }
    }

    /// Pan by a screen-space drag of `(dx, dy)` pixels. Dragging right moves
    /// the map right, so the origin moves left.
    #[must_use]
    pub fn panned_by(self, dx: f64, dy: f64) -> Self {
        let scale = self.scale();
        Self {
            origin_x: self.origin_x - dx / scale,
            origin_y: self.origin_y - dy / scale,
            ..self
        }
    }

    /// The same view with a new viewport size. The origin is unchanged.
    #[must_use]
    pub fn resized(self, width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    /// Keep the viewport inside `bounds`. An axis where the viewport is
    /// larger than the bounds is centred on them instead.
    #[must_use]
    pub fn clamped_to(self, bounds: &GeoBounds) -> Self {
        let z = self.tile_zoom();
        let scale = self.scale();
        let wx_min = WebMercator::world_x(bounds.min_lon, z);
        let wx_max = WebMercator::world_x(bounds.max_lon, z);
        let wy_min = WebMercator::world_y(bounds.max_lat, z);
        let wy_max = WebMercator::world_y(bounds.min_lat, z);
        let view_w = self.width / scale;
        let view_h = self.height / scale;

        let origin_x = if view_w >= wx_max - wx_min {
            (wx_min + wx_max - view_w) / 2.0
        } else {
            self.origin_x.clamp(wx_min, wx_max - view_w)
        };
        let origin_y = if view_h >= wy_max - wy_min {
            (wy_min + wy_max - view_h) / 2.0
        } else {
            self.origin_y.clamp(wy_min, wy_max - view_h)
        };

        Self {
            origin_x,
            origin_y,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: (f64, f64), b: (f64, f64)) {
        assert!((a.0 - b.0).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.1 - b.1).abs() < 1e-9, "{a:?} != {b:?}");
    }

    #[test]
    fn test_centered_on_round_trips() {
        let view = ViewState::new(1280.0, 800.0, 6.5).centered_on(139.767_125, 35.681_236);
        assert_close(view.center_lon_lat(), (139.767_125, 35.681_236));
    }

    #[test]
    fn test_zoom_keeps_center() {
        let start = ViewState::new(1280.0, 800.0, 6.0).centered_on(139.767_125, 35.681_236);
        let mut view = start;
        for _ in 0..9 {
            view = view.zoomed_at_center(0.25);
            assert_close(view.center_lon_lat(), start.center_lon_lat());
        }
        assert!((view.zoom - 8.25).abs() < 1e-12);
        assert_eq!(view.tile_zoom(), 8);

        for _ in 0..9 {
            view = view.zoomed_at_center(-0.25);
        }
        assert_close(view.center_lon_lat(), start.center_lon_lat());
        assert_eq!(view.tile_zoom(), 6);
    }

    #[test]
    fn test_zoom_clamped_to_base_range() {
        let view = ViewState::new(800.0, 600.0, 17.9).zoomed_at_center(5.0);
        assert!((view.zoom - 18.0).abs() < f64::EPSILON);
        let view = ViewState::new(800.0, 600.0, 2.1).zoomed_at_center(-5.0);
        assert!((view.zoom - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pan_moves_origin_in_world_units() {
        let view = ViewState::new(800.0, 600.0, 5.0);
        let panned = view.panned_by(100.0, -50.0);
        assert!((panned.origin_x - (-100.0)).abs() < 1e-9);
        assert!((panned.origin_y - 50.0).abs() < 1e-9);

        // At 5.5 one world pixel covers sqrt(2) screen pixels
        let view = ViewState::new(800.0, 600.0, 5.5);
        let panned = view.panned_by(2_f64.sqrt(), 0.0);
        assert!((panned.origin_x - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_to_japan() {
        // Far outside the box at a zoom where the box is larger than the view
        let view = ViewState::new(800.0, 600.0, 8.0).centered_on(-70.0, -30.0);
        let clamped = view.clamped_to(&GeoBounds::JAPAN);
        let (lon, lat) = clamped.center_lon_lat();
        assert!((GeoBounds::JAPAN.min_lon..=GeoBounds::JAPAN.max_lon).contains(&lon));
        assert!((GeoBounds::JAPAN.min_lat..=GeoBounds::JAPAN.max_lat).contains(&lat));
    }

    #[test]
    fn test_clamped_centres_when_view_is_larger() {
        let view = ViewState::new(4000.0, 4000.0, 2.0);
        let clamped = view.clamped_to(&GeoBounds::JAPAN);
        let (lon, _) = clamped.center_lon_lat();
        assert!((lon - 138.0).abs() < 1e-9);
    }
}
