//! iTunes Search API adapter.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lp_core::ports::{ArtworkSearchPort, LookupError};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

pub const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";

const THUMBNAIL_SIZE: &str = "100x100bb";
const ARTWORK_SIZE: &str = "512x512bb";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

pub struct ItunesArtworkSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl ItunesArtworkSearch {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_endpoint(ITUNES_SEARCH_URL, timeout)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build artwork search HTTP client failed")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

/// Search term sent to the service: `"artist album"`, or the artist alone.
pub fn search_term(artist: &str, album: &str) -> String {
    let artist = artist.trim();
    let album = album.trim();
    if album.is_empty() {
        artist.to_string()
    } else {
        format!("{artist} {album}")
    }
}

fn artwork_from_body(body: &str) -> Result<Option<String>, LookupError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| LookupError::Decode(e.to_string()))?;
    Ok(response
        .results
        .into_iter()
        .next()
        .and_then(|result| result.artwork_url_100)
        .filter(|url| !url.is_empty())
        .map(|url| url.replace(THUMBNAIL_SIZE, ARTWORK_SIZE)))
}

#[async_trait]
impl ArtworkSearchPort for ItunesArtworkSearch {
    async fn search(&self, artist: &str, album: &str) -> Result<Option<String>, LookupError> {
        let term = search_term(artist, album);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("term", term.as_str()),
                ("media", "music"),
                ("entity", "album"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(LookupError::RateLimited);
        }
        if !status.is_success() {
            return Err(LookupError::Transport(format!("HTTP {status}")));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let artwork = artwork_from_body(&body)?;
        debug!(term = %term, found = artwork.is_some(), "Artwork search finished");
        Ok(artwork)
    }
}

fn map_transport_error(err: reqwest::Error) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_result_is_upscaled() {
        let body = r#"{"resultCount":1,"results":[{"collectionName":"C","artworkUrl100":"https://is1.mzstatic.com/image/thumb/x/100x100bb.jpg"}]}"#;
        assert_eq!(
            artwork_from_body(body).unwrap().as_deref(),
            Some("https://is1.mzstatic.com/image/thumb/x/512x512bb.jpg")
        );
    }

    #[test]
    fn test_empty_results_is_none() {
        assert_eq!(artwork_from_body(r#"{"resultCount":0,"results":[]}"#).unwrap(), None);
        assert_eq!(artwork_from_body(r#"{"results":[{"collectionName":"C"}]}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        assert!(matches!(artwork_from_body("<html>"), Err(LookupError::Decode(_))));
    }

    #[test]
    fn test_search_term() {
        assert_eq!(search_term(" B ", "C"), "B C");
        assert_eq!(search_term("B", "  "), "B");
    }
}
