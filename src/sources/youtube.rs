use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{MediaDetails, MediaSource, PlayableMedia};
use crate::sources::plugin::{MediaResolver, ResolveError};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Resolves YouTube videos by scraping the results and watch pages.
/// Every resolved video lands in the details cache, which is persisted as
/// part of the zone snapshot.
pub struct YoutubeResolver {
    client: reqwest::Client,
    cache: DashMap<String, PlayableMedia>,
    initial_data: Regex,
    length_seconds: Regex,
    og_title: Regex,
}

impl YoutubeResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: DashMap::new(),
            initial_data: Regex::new(r"(?s)var ytInitialData\s*=\s*(\{.*?\});\s*</script>")
                .unwrap(),
            length_seconds: Regex::new(r#""lengthSeconds"\s*:\s*"(\d+)""#).unwrap(),
            og_title: Regex::new(r#"<meta property="og:title" content="([^"]*)">"#).unwrap(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ResolveError> {
        let body = self
            .client
            .get(url)
            .header("user-agent", USER_AGENT)
            .header("accept-language", "en")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn search_page(&self, query: &str) -> Result<Vec<PlayableMedia>, ResolveError> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(query)
        );
        let html = self.fetch(&url).await?;
        let results = self.extract_results(&html);
        debug!("youtube search '{}' found {} videos", query, results.len());
        for media in &results {
            if let MediaSource::Youtube { video_id } = &media.source {
                self.cache.insert(video_id.clone(), media.clone());
            }
        }
        Ok(results)
    }

    fn extract_results(&self, html: &str) -> Vec<PlayableMedia> {
        let Some(captures) = self.initial_data.captures(html) else {
            return Vec::new();
        };
        let Ok(data) = serde_json::from_str::<Value>(&captures[1]) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        let sections = &data["contents"]["twoColumnSearchResultsRenderer"]["primaryContents"]
            ["sectionListRenderer"]["contents"];
        for section in sections.as_array().into_iter().flatten() {
            let items = &section["itemSectionRenderer"]["contents"];
            for item in items.as_array().into_iter().flatten() {
                if let Some(media) = video_renderer_to_media(&item["videoRenderer"]) {
                    results.push(media);
                }
            }
        }
        results
    }

    /// Last-resort details lookup straight off the watch page.
    async fn details_direct(&self, video_id: &str) -> Result<PlayableMedia, ResolveError> {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);
        let html = self.fetch(&url).await?;
        let duration = self
            .length_seconds
            .captures(&html)
            .and_then(|c| c[1].parse::<u64>().ok())
            .ok_or_else(|| ResolveError::NotFound(video_id.to_string()))?;
        let title = self
            .og_title
            .captures(&html)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ResolveError::NotFound(video_id.to_string()))?;
        Ok(PlayableMedia {
            source: MediaSource::Youtube {
                video_id: video_id.to_string(),
            },
            details: MediaDetails {
                title,
                duration: duration * 1000,
            },
        })
    }

    fn cached(&self, video_id: &str) -> Option<PlayableMedia> {
        self.cache.get(video_id).map(|entry| entry.clone())
    }
}

impl Default for YoutubeResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for YoutubeResolver {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn resolve(&self, identifier: &str) -> Result<PlayableMedia, ResolveError> {
        if let Some(media) = self.cached(identifier) {
            return Ok(media);
        }

        // quoted-id searches usually surface the video; the watch page is
        // the fallback of last resort
        for query in [format!("\"{}\"", identifier), format!("\"v={}\"", identifier)] {
            if self.search_page(&query).await.is_err() {
                continue;
            }
            if let Some(media) = self.cached(identifier) {
                return Ok(media);
            }
        }

        let media = self.details_direct(identifier).await?;
        self.cache.insert(identifier.to_string(), media.clone());
        Ok(media)
    }

    async fn search(&self, query: &str) -> Result<Vec<PlayableMedia>, ResolveError> {
        self.search_page(query).await
    }

    fn cache_snapshot(&self) -> HashMap<String, PlayableMedia> {
        self.cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn prime_cache(&self, entries: HashMap<String, PlayableMedia>) {
        for (video_id, media) in entries {
            self.cache.insert(video_id, media);
        }
    }
}

fn video_renderer_to_media(renderer: &Value) -> Option<PlayableMedia> {
    let video_id = renderer["videoId"].as_str()?;
    let title = renderer["title"]["runs"][0]["text"].as_str()?;
    // livestreams have no length and can't be synchronized
    let length = renderer["lengthText"]["simpleText"].as_str()?;
    Some(PlayableMedia {
        source: MediaSource::Youtube {
            video_id: video_id.to_string(),
        },
        details: MediaDetails {
            title: title.to_string(),
            duration: timestamp_to_millis(length)?,
        },
    })
}

/// `"1:02:03"` -> milliseconds.
pub fn timestamp_to_millis(timestamp: &str) -> Option<u64> {
    let mut seconds = 0u64;
    for part in timestamp.split(':') {
        seconds = seconds * 60 + part.trim().parse::<u64>().ok()?;
    }
    Some(seconds * 1000)
}
