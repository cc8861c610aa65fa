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

//! Blocking HTTP fetchers for base map tiles, overlay tiles and time lists.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{parse_time_list, TileFetcher, TimeListFetcher};
use crate::error::FetchError;
use crate::key::{NowcastMode, NowcastTimestamp, TileKey, TileSource};

/// Where each tile source and the time lists are served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Root URL of the base map pyramid (GSI standard map).
    pub base_map_root: String,
    /// Root URL of the nowcast product: time lists and overlay tiles.
    pub nowcast_root: String,
    /// File extension appended to tile paths.
    pub tile_extension: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_map_root: "https://cyberjapandata.gsi.go.jp/xyz/std".to_string(),
            nowcast_root: "https://www.jma.go.jp/bosai/jmatile/data/nowc".to_string(),
            tile_extension: "png".to_string(),
        }
    }
}

impl Endpoints {
    /// Absolute URL of a tile.
    #[must_use]
    pub fn tile_url(&self, key: &TileKey) -> String {
        let root = match key.source() {
            TileSource::BaseMap => &self.base_map_root,
            TileSource::Overlay(_) => &self.nowcast_root,
        };
        format!("{}/{}.{}", root.trim_end_matches('/'), key.path(), self.tile_extension)
    }

    /// Absolute URL of the time list for a mode.
    #[must_use]
    pub fn time_list_url(&self, mode: NowcastMode) -> String {
        format!(
            "{}/{}",
            self.nowcast_root.trim_end_matches('/'),
            mode.time_list_file()
        )
    }
}

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout, connect through body.
    pub timeout: Duration,
    pub user_agent: String,
    pub endpoints: Endpoints,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: concat!("nowcast-core/", env!("CARGO_PKG_VERSION")).to_string(),
            endpoints: Endpoints::default(),
        }
    }
}

/// Fetches tiles and time lists over HTTPS with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoints: Endpoints,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            endpoints: config.endpoints,
        })
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET `url`, accepting only `200 OK` with a non-empty body.
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("GET {url}");
        let response = self.client.get(url).send()?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes()?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(bytes.to_vec())
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch_tile(&self, key: &TileKey) -> Result<Vec<u8>, FetchError> {
        self.get(&self.endpoints.tile_url(key))
    }
}

impl TimeListFetcher for HttpFetcher {
    fn fetch_time_list(&self, mode: NowcastMode) -> Result<Vec<NowcastTimestamp>, FetchError> {
        let body = self.get(&self.endpoints.time_list_url(mode))?;
        parse_time_list(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_urls() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.tile_url(&TileKey::base_map(6, 56, 25)),
            "https://cyberjapandata.gsi.go.jp/xyz/std/6/56/25.png"
        );

        let time = NowcastTimestamp::new("20250301120000", "20250301123500");
        assert_eq!(
            endpoints.tile_url(&TileKey::overlay(&time, 6, 56, 25)),
            "https://www.jma.go.jp/bosai/jmatile/data/nowc/20250301120000/none/20250301123500/surf/hrpns/6/56/25.png"
        );
    }

    #[test]
    fn test_time_list_urls() {
        let endpoints = Endpoints {
            nowcast_root: "http://localhost:8080/nowc/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            endpoints.time_list_url(NowcastMode::Forecast),
            "http://localhost:8080/nowc/targetTimes_N2.json"
        );
    }

    #[test]
    fn test_fetcher_builds() {
        let fetcher = HttpFetcher::new(HttpConfig::default()).unwrap();
        assert_eq!(fetcher.endpoints(), &Endpoints::default());
    }
}
