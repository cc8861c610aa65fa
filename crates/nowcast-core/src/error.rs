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

//! Error types for fetching and decoding tiles and time lists.
//!
//! None of these reach the tile polling caller: a tile that keeps failing is
//! simply never ready. They surface from the fetch and decode capabilities and
//! from [`crate::timeline::TimeSeriesController::refresh_series`].

use thiserror::Error;

/// Errors produced by a [`crate::fetch::TileFetcher`] or
/// [`crate::fetch::TimeListFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("malformed time list: {0}")]
    MalformedTimeList(#[from] serde_json::Error),

    #[error("time list contained no entries")]
    EmptyTimeList,

    #[error("{0}")]
    Other(String),
}

/// Errors produced by a [`crate::fetch::TileDecoder`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}
