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

//! Default [`TileDecoder`] producing owned RGBA rasters with the `image` crate.

use crate::error::DecodeError;
use crate::fetch::TileDecoder;
use crate::key::TileKey;

/// A decoded tile: tightly packed, non-premultiplied RGBA8 rows.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaTile {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for RgbaTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Decodes any format the `image` crate was built with into [`RgbaTile`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RgbaDecoder;

impl TileDecoder for RgbaDecoder {
    type Image = RgbaTile;

    fn decode(&self, _key: &TileKey, bytes: &[u8]) -> Result<RgbaTile, DecodeError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        Ok(RgbaTile {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }
}
