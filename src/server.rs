use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::configs::Config;
use crate::moderation::VoteOutcome;
use crate::playback::{PlaybackEvent, Transition};
use crate::protocol::{ClientMessage, PlayableMedia, QueueInfo, QueueItem, ServerMessage, UserId};
use crate::sources::MediaResolver;
use crate::storage::{PersistedState, Storage};
use crate::zone::{CLOSE_UNAUTHORIZED, CloseOutcome, ConnectionId, ZoneState};

/// Shared state: the zone behind its single lock, plus the external
/// collaborators at their boundaries.
pub struct AppState {
    pub config: Config,
    pub zone: Mutex<ZoneState>,
    pub youtube: Arc<dyn MediaResolver>,
    pub archive: Arc<dyn MediaResolver>,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(
        config: Config,
        youtube: Arc<dyn MediaResolver>,
        archive: Arc<dyn MediaResolver>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            zone: Mutex::new(ZoneState::new(&config)),
            config,
            youtube,
            archive,
            storage,
        }
    }
}

/// Dispatch one inbound message. Connections that haven't joined may only
/// join; everything else from them is logged and dropped. Nothing in here
/// is allowed to take the connection down — faults surface as `status` or
/// `reject` envelopes, or as log lines.
pub async fn handle_message(state: &Arc<AppState>, connection_id: ConnectionId, message: ClientMessage) {
    match message {
        ClientMessage::Join {
            name,
            password,
            token,
        } => handle_join(state, connection_id, name, password, token).await,
        ClientMessage::Youtube { video_id } => {
            resolve_and_enqueue(state, connection_id, &state.youtube, &video_id).await
        }
        ClientMessage::Archive { path } => {
            resolve_and_enqueue(state, connection_id, &state.archive, &path).await
        }
        ClientMessage::Search { query, lucky } => {
            handle_search(state, connection_id, query, lucky).await
        }
        ClientMessage::Reboot { master_key } => handle_reboot(state, connection_id, master_key).await,
        // everything else runs entirely under the lock
        other => {
            let mut guard = state.zone.lock().await;
            let zone = &mut *guard;
            let Some(user_id) = zone.connection_user(connection_id) else {
                warn!("dropping message from unjoined connection {}", connection_id);
                return;
            };
            handle_joined_message(state, zone, connection_id, user_id, other);
        }
    }
}

fn handle_joined_message(
    state: &Arc<AppState>,
    zone: &mut ZoneState,
    connection_id: ConnectionId,
    user_id: UserId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Heartbeat => {
            zone.send_to_connection(connection_id, &ServerMessage::Heartbeat);
        }
        ClientMessage::Chat { text } => {
            let text: String = text.chars().take(zone.config.chat_length).collect();
            zone.send_all(&ServerMessage::Chat { text, user_id });
        }
        ClientMessage::Name { name } => {
            zone.set_name(user_id, &name);
        }
        ClientMessage::Resync => {
            let message = match zone.playback.current() {
                Some(item) => ServerMessage::Play {
                    item: Some(item.clone()),
                    time: Some(zone.playback.current_time()),
                },
                None => ServerMessage::Play {
                    item: None,
                    time: None,
                },
            };
            zone.send_to_connection(connection_id, &message);
        }
        ClientMessage::Skip { source, password } => {
            let Some(current) = zone.playback.current() else {
                return;
            };
            if *current.source() != source {
                // stale vote for something that already transitioned
                return;
            }
            let title = current.title().to_string();

            let bypass = matches!(
                (&zone.config.skip_password, &password),
                (Some(required), Some(given)) if required == given
            );
            if bypass {
                let transition = zone.playback.skip();
                apply_transition(state, zone, transition);
                return;
            }

            let (active, threshold) = (zone.active_count(), zone.config.skip_threshold);
            match zone.votes.vote_skip(user_id, active, threshold) {
                VoteOutcome::Passed => {
                    zone.send_all(&ServerMessage::Status {
                        text: format!("voted to skip {}", title),
                    });
                    zone.votes.clear();
                    let transition = zone.playback.skip();
                    apply_transition(state, zone, transition);
                }
                VoteOutcome::Progress { count, needed } => {
                    zone.send_all(&ServerMessage::Status {
                        text: format!("{} of {} votes to skip", count, needed),
                    });
                }
            }
        }
        ClientMessage::Error { source } => {
            let Some(current) = zone.playback.current() else {
                return;
            };
            if *current.source() != source {
                return;
            }
            // nameless lurkers don't get to shoot down videos
            if zone.user(user_id).is_none_or(|u| u.name.is_none()) {
                return;
            }
            let title = current.title().to_string();
            let (active, threshold) = (zone.active_count(), zone.config.error_threshold);
            if zone.votes.vote_error(user_id, active, threshold) == VoteOutcome::Passed {
                zone.send_all(&ServerMessage::Status {
                    text: format!("skipping unplayable video {}", title),
                });
                zone.votes.clear();
                let transition = zone.playback.skip();
                apply_transition(state, zone, transition);
            }
        }
        ClientMessage::Move { position } => {
            if let Some(user) = zone.user_mut(user_id) {
                user.position = Some(position);
            }
            zone.send_all(&ServerMessage::Move { user_id, position });
        }
        ClientMessage::Avatar { data } => {
            if data.chars().count() > zone.config.avatar_length {
                return;
            }
            if let Some(user) = zone.user_mut(user_id) {
                user.avatar = Some(data.clone());
            }
            zone.send_all(&ServerMessage::Avatar { user_id, data });
        }
        ClientMessage::Emotes { emotes } => {
            if let Some(user) = zone.user_mut(user_id) {
                user.emotes = emotes.clone();
            }
            zone.send_all(&ServerMessage::Emotes { user_id, emotes });
        }
        ClientMessage::Join { .. }
        | ClientMessage::Youtube { .. }
        | ClientMessage::Archive { .. }
        | ClientMessage::Search { .. }
        | ClientMessage::Reboot { .. } => unreachable!("handled before the lock"),
    }
}

async fn handle_join(
    state: &Arc<AppState>,
    connection_id: ConnectionId,
    name: String,
    password: Option<String>,
    token: Option<String>,
) {
    let mut guard = state.zone.lock().await;
    let zone = &mut *guard;

    if zone.connection_user(connection_id).is_some() {
        warn!("connection {} sent a second join, dropping", connection_id);
        return;
    }

    let reply = match zone.join(connection_id, password.as_deref(), token.as_deref()) {
        Ok(reply) => reply,
        Err(e) => {
            zone.send_to_connection(
                connection_id,
                &ServerMessage::Reject { text: e.to_string() },
            );
            zone.close_connection(connection_id, CLOSE_UNAUTHORIZED);
            return;
        }
    };

    zone.send_to_connection(
        connection_id,
        &ServerMessage::Assign {
            user_id: reply.user_id,
            token: reply.token,
        },
    );

    zone.set_name(reply.user_id, &name);

    // replay the world to the newcomer: roster, queue, and the offset
    // play state so they land mid-video in sync
    zone.send_to_connection(connection_id, &ServerMessage::Users { users: zone.roster() });
    zone.send_to_connection(
        connection_id,
        &ServerMessage::Queue {
            items: zone.playback.queue_items(),
        },
    );
    if let Some(item) = zone.playback.current() {
        zone.send_to_connection(
            connection_id,
            &ServerMessage::Play {
                item: Some(item.clone()),
                time: Some(zone.playback.current_time()),
            },
        );
    }
}

/// Shared tail of the youtube/archive/lucky-search paths. The resolver is
/// awaited *without* the zone lock; quota and duplicate checks run inside
/// `enqueue` afterwards, so whatever changed during the await is seen.
async fn resolve_and_enqueue(
    state: &Arc<AppState>,
    connection_id: ConnectionId,
    resolver: &Arc<dyn MediaResolver>,
    identifier: &str,
) {
    {
        let zone = state.zone.lock().await;
        if zone.connection_user(connection_id).is_none() {
            warn!("dropping resolve from unjoined connection {}", connection_id);
            return;
        }
    }

    match resolver.resolve(identifier).await {
        Ok(media) => enqueue_resolved(state, connection_id, media).await,
        Err(e) => {
            warn!("{} couldn't resolve '{}': {}", resolver.name(), identifier, e);
            let zone = state.zone.lock().await;
            zone.send_to_connection(
                connection_id,
                &ServerMessage::Status {
                    text: format!("couldn't resolve {}", identifier),
                },
            );
        }
    }
}

async fn enqueue_resolved(state: &Arc<AppState>, connection_id: ConnectionId, media: PlayableMedia) {
    let mut guard = state.zone.lock().await;
    let zone = &mut *guard;
    // the connection may have gone away while we were resolving
    let Some(user_id) = zone.connection_user(connection_id) else {
        return;
    };
    let Some(address) = zone.connection_address(connection_id) else {
        return;
    };

    let item = QueueItem {
        media,
        info: QueueInfo { user_id, address },
    };
    let limit = zone.config.queue_limit;
    match zone.playback.enqueue(item, limit) {
        Ok(transition) => apply_transition(state, zone, transition),
        Err(e) => {
            zone.send_to_connection(connection_id, &ServerMessage::Status { text: e.to_string() });
        }
    }
}

async fn handle_search(state: &Arc<AppState>, connection_id: ConnectionId, query: String, lucky: bool) {
    {
        let zone = state.zone.lock().await;
        if zone.connection_user(connection_id).is_none() {
            warn!("dropping search from unjoined connection {}", connection_id);
            return;
        }
    }

    let results = match state.youtube.search(&query).await {
        Ok(results) => results,
        Err(e) => {
            warn!("search '{}' failed: {}", query, e);
            let zone = state.zone.lock().await;
            zone.send_to_connection(
                connection_id,
                &ServerMessage::Status {
                    text: format!("couldn't search for {}", query),
                },
            );
            return;
        }
    };

    if lucky {
        match results.into_iter().next() {
            Some(media) => enqueue_resolved(state, connection_id, media).await,
            None => {
                let zone = state.zone.lock().await;
                zone.send_to_connection(
                    connection_id,
                    &ServerMessage::Status {
                        text: format!("no results for {}", query),
                    },
                );
            }
        }
    } else {
        let zone = state.zone.lock().await;
        zone.send_to_connection(connection_id, &ServerMessage::Search { query, results });
    }
}

async fn handle_reboot(state: &Arc<AppState>, connection_id: ConnectionId, master_key: String) {
    {
        let zone = state.zone.lock().await;
        if zone.connection_user(connection_id).is_none() {
            return;
        }
        let authorized = matches!(
            &zone.config.reboot_password,
            Some(required) if *required == master_key
        );
        if !authorized {
            warn!("rejected reboot from connection {}", connection_id);
            return;
        }
        zone.send_all(&ServerMessage::Status {
            text: "rebooting server".to_string(),
        });
    }
    save_snapshot(state).await;
    info!("rebooting on request, supervisor takes it from here");
    std::process::exit(0);
}

/// Turn scheduler transitions into broadcasts, vote resets, a fresh advance
/// timer, and a snapshot save.
pub fn apply_transition(state: &Arc<AppState>, zone: &mut ZoneState, transition: Transition) {
    let mut dirty = false;
    for event in transition.events {
        dirty = true;
        match event {
            PlaybackEvent::Queued(item) => {
                zone.send_all(&ServerMessage::Queue { items: vec![item] });
            }
            PlaybackEvent::Played(item) => {
                zone.votes.clear();
                zone.send_all(&ServerMessage::Play {
                    item: Some(item),
                    time: None,
                });
            }
            PlaybackEvent::Stopped => {
                zone.votes.clear();
                zone.send_all(&ServerMessage::Play {
                    item: None,
                    time: None,
                });
            }
        }
    }

    rearm_advance_timer(state, zone, transition.rearm);

    if dirty {
        spawn_save(state);
    }
}

/// Cancel whatever timer was pending and arm a fresh one. The epoch check
/// on the far side makes a superseded timer that already escaped `abort` a
/// no-op.
fn rearm_advance_timer(state: &Arc<AppState>, zone: &mut ZoneState, delay: Option<Duration>) {
    let epoch = zone.playback.cancel_timer();
    let Some(delay) = delay else {
        return;
    };
    let state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        advance_check(state, epoch).await;
    });
    zone.playback.set_timer(handle);
}

async fn advance_check(state: Arc<AppState>, epoch: u64) {
    let mut guard = state.zone.lock().await;
    let zone = &mut *guard;
    if zone.playback.timer_epoch() != epoch {
        return;
    }
    let transition = zone.playback.tick();
    apply_transition(&state, zone, transition);
}

/// Grace timer for an abruptly disconnected identity.
pub fn schedule_eviction(state: Arc<AppState>, user_id: UserId, epoch: u64) {
    let grace = Duration::from_secs(state.config.zone.grace_secs);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let mut zone = state.zone.lock().await;
        if zone.evict_if_absent(user_id, epoch) {
            info!("user {} didn't come back within the grace period", user_id);
        }
    });
}

/// Transport calls this after a connection's writer loop ends.
pub async fn handle_close(state: &Arc<AppState>, connection_id: ConnectionId, clean: bool) {
    let outcome = state.zone.lock().await.close(connection_id, clean);
    if let CloseOutcome::Grace { user_id, epoch } = outcome {
        schedule_eviction(state.clone(), user_id, epoch);
    }
}

pub async fn save_snapshot(state: &Arc<AppState>) {
    let snapshot = {
        let zone = state.zone.lock().await;
        PersistedState {
            playback: zone.playback.snapshot(),
            media_cache: state.youtube.cache_snapshot(),
        }
    };
    if let Err(e) = state.storage.save(&snapshot).await {
        warn!("couldn't save zone state: {}", e);
    }
}

fn spawn_save(state: &Arc<AppState>) {
    let state = state.clone();
    tokio::spawn(async move {
        save_snapshot(&state).await;
    });
}
