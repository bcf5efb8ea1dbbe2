use async_trait::async_trait;
use serde::Deserialize;

use crate::protocol::{MediaDetails, MediaSource, PlayableMedia};
use crate::sources::plugin::{MediaResolver, ResolveError};

/// Resolves archive.org items into direct-file media. The identifier is
/// either an item name or `item/filename`; without a filename the first
/// MPEG4 file wins.
pub struct ArchiveResolver {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    metadata: ItemMetadata,
    #[serde(default)]
    files: Vec<ItemFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemMetadata {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemFile {
    name: String,
    #[serde(default)]
    format: String,
    title: Option<String>,
    length: Option<String>,
}

impl ArchiveResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ArchiveResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for ArchiveResolver {
    fn name(&self) -> &str {
        "archive"
    }

    async fn resolve(&self, identifier: &str) -> Result<PlayableMedia, ResolveError> {
        let (item, filename) = match identifier.split_once('/') {
            Some((item, filename)) => (item, Some(filename)),
            None => (identifier, None),
        };

        let url = format!("https://archive.org/metadata/{}", item);
        let response: ItemResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let file = match filename {
            Some(name) => response.files.iter().find(|f| f.name == name),
            None => response.files.iter().find(|f| f.format == "MPEG4"),
        }
        .ok_or_else(|| ResolveError::Invalid(format!("no playable file in {}", identifier)))?;

        let length = file
            .length
            .as_deref()
            .and_then(length_to_millis)
            .ok_or_else(|| ResolveError::Invalid(format!("no duration for {}", identifier)))?;

        let title = file
            .title
            .clone()
            .or(response.metadata.title.clone())
            .unwrap_or_else(|| file.name.clone());

        Ok(PlayableMedia {
            source: MediaSource::Http {
                src: format!("https://archive.org/download/{}/{}", item, file.name),
            },
            details: MediaDetails {
                title,
                duration: length,
            },
        })
    }

    async fn search(&self, _query: &str) -> Result<Vec<PlayableMedia>, ResolveError> {
        Err(ResolveError::Invalid(
            "archive items can't be searched, give an item name".to_string(),
        ))
    }
}

/// Archive file lengths come as decimal seconds ("634.56") or as
/// colon-separated timestamps ("10:34").
fn length_to_millis(length: &str) -> Option<u64> {
    if length.contains(':') {
        crate::sources::youtube::timestamp_to_millis(length)
    } else {
        let seconds: f64 = length.parse().ok()?;
        Some((seconds * 1000.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_parse_both_shapes() {
        assert_eq!(length_to_millis("634.56"), Some(634_560));
        assert_eq!(length_to_millis("90"), Some(90_000));
        assert_eq!(length_to_millis("10:34"), Some(634_000));
        assert_eq!(length_to_millis(""), None);
    }

    #[test]
    fn metadata_response_parses() {
        let raw = r#"{
            "metadata": { "title": "Night of the Living Dead" },
            "files": [
                { "name": "notes.txt", "format": "Text" },
                { "name": "notld.mp4", "format": "MPEG4", "length": "5700.2" }
            ]
        }"#;
        let response: ItemResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.files.len(), 2);
        assert_eq!(response.files[1].length.as_deref(), Some("5700.2"));
        assert_eq!(
            response.metadata.title.as_deref(),
            Some("Night of the Living Dead")
        );
    }
}
