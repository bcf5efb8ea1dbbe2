use serde::{Deserialize, Serialize};

use crate::protocol::UserId;

/// Where a playable item actually lives. Tagged on the wire so clients can
/// pick the right player for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaSource {
    Youtube {
        #[serde(rename = "videoId")]
        video_id: String,
    },
    Http {
        src: String,
    },
}

impl MediaSource {
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Youtube { video_id } => format!("youtube:{}", video_id),
            MediaSource::Http { src } => src.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDetails {
    pub title: String,
    /// Duration in milliseconds.
    pub duration: u64,
}

/// A resolved, immutable playable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableMedia {
    pub source: MediaSource,
    pub details: MediaDetails,
}

/// Who submitted an item. The address is a soft anti-spam key for the
/// per-submitter queue quota, not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub media: PlayableMedia,
    pub info: QueueInfo,
}

impl QueueItem {
    pub fn source(&self) -> &MediaSource {
        &self.media.source
    }

    pub fn title(&self) -> &str {
        &self.media.details.title
    }

    pub fn duration(&self) -> u64 {
        self.media.details.duration
    }
}

/// Roster entry sent to a freshly joined connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[i32; 2]>,
    pub emotes: Vec<String>,
}
