use serde::{Deserialize, Serialize};

use crate::protocol::{MediaSource, PlayableMedia, QueueItem, UserId, UserSnapshot};

/// Envelope a connection may send to the zone. Unknown or malformed
/// payloads are dropped at the transport boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Join {
        name: String,
        password: Option<String>,
        token: Option<String>,
    },
    Heartbeat,
    Chat {
        text: String,
    },
    Name {
        name: String,
    },
    Resync,
    Youtube {
        #[serde(rename = "videoId")]
        video_id: String,
    },
    Archive {
        path: String,
    },
    Search {
        query: String,
        #[serde(default)]
        lucky: bool,
    },
    Skip {
        source: MediaSource,
        password: Option<String>,
    },
    Error {
        source: MediaSource,
    },
    Move {
        position: [i32; 2],
    },
    Avatar {
        data: String,
    },
    Emotes {
        emotes: Vec<String>,
    },
    Reboot {
        master_key: String,
    },
}

/// Envelope the zone sends to connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Assign {
        #[serde(rename = "userId")]
        user_id: UserId,
        token: String,
    },
    Reject {
        text: String,
    },
    Users {
        users: Vec<UserSnapshot>,
    },
    Queue {
        items: Vec<QueueItem>,
    },
    /// `play {}` with no item means the timeline stopped.
    Play {
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<QueueItem>,
        #[serde(skip_serializing_if = "Option::is_none")]
        time: Option<u64>,
    },
    Chat {
        text: String,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Name {
        name: String,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Status {
        text: String,
    },
    Leave {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Move {
        #[serde(rename = "userId")]
        user_id: UserId,
        position: [i32; 2],
    },
    Avatar {
        #[serde(rename = "userId")]
        user_id: UserId,
        data: String,
    },
    Emotes {
        #[serde(rename = "userId")]
        user_id: UserId,
        emotes: Vec<String>,
    },
    Search {
        query: String,
        results: Vec<PlayableMedia>,
    },
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_with_optional_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","name":"test"}"#).unwrap();
        match msg {
            ClientMessage::Join {
                name,
                password,
                token,
            } => {
                assert_eq!(name, "test");
                assert_eq!(password, None);
                assert_eq!(token, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parses_skip_with_tagged_source() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"skip","source":{"type":"youtube","videoId":"dQw4w9WgXcQ"},"password":"hunter2"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Skip { source, password } => {
                assert_eq!(
                    source,
                    MediaSource::Youtube {
                        video_id: "dQw4w9WgXcQ".to_string()
                    }
                );
                assert_eq!(password.as_deref(), Some("hunter2"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn empty_play_serializes_bare() {
        let json = serde_json::to_string(&ServerMessage::Play {
            item: None,
            time: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"play"}"#);
    }

    #[test]
    fn assign_uses_camel_case_user_id() {
        let json = serde_json::to_string(&ServerMessage::Assign {
            user_id: 1,
            token: "t".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"assign","userId":1,"token":"t"}"#);
    }
}
