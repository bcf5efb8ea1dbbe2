use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::protocol::QueueItem;

/// Observable timeline transitions. Returned as plain values from every
/// mutating operation; the dispatch layer turns them into broadcasts and
/// snapshot saves.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Queued(QueueItem),
    Played(QueueItem),
    Stopped,
}

/// The result of a mutating operation: what happened, and when the advance
/// timer should fire next (`None` = nothing playing, no timer).
#[must_use]
#[derive(Debug, PartialEq)]
pub struct Transition {
    pub events: Vec<PlaybackEvent>,
    pub rearm: Option<Duration>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("that's already queued")]
    AlreadyQueued,
    #[error("you already have {limit} items queued")]
    QuotaExceeded { limit: usize },
}

/// Persisted shape of the timeline: the playing item, the queue, and how
/// far into the playing item we were at save time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<QueueItem>,
    #[serde(default)]
    pub queue: Vec<QueueItem>,
    /// Elapsed milliseconds into `current` at save time.
    #[serde(default)]
    pub time: u64,
}

/// The single shared timeline. Owns the current item, the FIFO queue, and
/// the begin/end instants the advance timer is derived from.
pub struct Playback {
    current: Option<QueueItem>,
    queue: VecDeque<QueueItem>,
    begin: Instant,
    end: Instant,
    padding: Duration,
    timer_epoch: u64,
    advance_timer: Option<JoinHandle<()>>,
}

impl Playback {
    pub fn new(padding_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            current: None,
            queue: VecDeque::new(),
            begin: now,
            end: now,
            padding: Duration::from_millis(padding_ms),
            timer_epoch: 0,
            advance_timer: None,
        }
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Elapsed milliseconds into the current item.
    pub fn current_time(&self) -> u64 {
        Instant::now().saturating_duration_since(self.begin).as_millis() as u64
    }

    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    pub fn playing(&self) -> bool {
        self.remaining() > Duration::ZERO
    }

    /// Append an item, validating the duplicate-source rule and the
    /// per-submitter quota. Validation runs here, under the zone lock, so
    /// callers that awaited a resolver first are re-checked on completion.
    pub fn enqueue(&mut self, item: QueueItem, limit: usize) -> Result<Transition, EnqueueError> {
        let duplicate = self
            .current
            .iter()
            .chain(self.queue.iter())
            .any(|queued| queued.source() == item.source());
        if duplicate {
            return Err(EnqueueError::AlreadyQueued);
        }

        let submitted = self
            .queue
            .iter()
            .filter(|queued| queued.info.address == item.info.address)
            .count();
        if submitted >= limit {
            return Err(EnqueueError::QuotaExceeded { limit });
        }

        let mut events = vec![PlaybackEvent::Queued(item.clone())];
        self.queue.push_back(item);
        let rearm = self.check(&mut events);
        Ok(Transition { events, rearm })
    }

    /// Unconditionally advance: pop the queue head into the current slot,
    /// or stop if the queue is drained.
    pub fn skip(&mut self) -> Transition {
        let mut events = Vec::new();
        self.advance(&mut events);
        let rearm = self.check(&mut events);
        Transition { events, rearm }
    }

    /// Reconstruct the timeline from a persisted snapshot. The begin
    /// instant is rebuilt as `now - elapsed` so late joiners get a correctly
    /// offset resync; a saved elapsed past the duration advances instead of
    /// going negative. Restored queue items skip re-validation and do not
    /// re-emit `queued`.
    pub fn load_state(&mut self, saved: PlaybackSnapshot) -> Transition {
        let mut events = Vec::new();
        if let Some(item) = saved.current {
            self.play_item(item, saved.time, &mut events);
        }
        self.queue.extend(saved.queue);
        let rearm = self.check(&mut events);
        Transition { events, rearm }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            current: self.current.clone(),
            queue: self.queue_items(),
            time: if self.current.is_some() {
                self.current_time()
            } else {
                0
            },
        }
    }

    /// Re-run the advance logic after the timer fired (or any time the
    /// timeline may have become stale).
    pub fn tick(&mut self) -> Transition {
        let mut events = Vec::new();
        let rearm = self.check(&mut events);
        Transition { events, rearm }
    }

    /// Invalidate the pending advance timer. Returns the new epoch the next
    /// timer must carry; a timer firing with an older epoch is a no-op.
    pub fn cancel_timer(&mut self) -> u64 {
        self.timer_epoch += 1;
        if let Some(handle) = self.advance_timer.take() {
            handle.abort();
        }
        self.timer_epoch
    }

    pub fn timer_epoch(&self) -> u64 {
        self.timer_epoch
    }

    pub fn set_timer(&mut self, handle: JoinHandle<()>) {
        self.advance_timer = Some(handle);
    }

    /// If something is still playing, report when to re-check (remaining
    /// plus padding, absorbing timer skew). Otherwise advance until either
    /// an unfinished item plays or the queue drains.
    fn check(&mut self, events: &mut Vec<PlaybackEvent>) -> Option<Duration> {
        loop {
            let remaining = self.remaining();
            if remaining > Duration::ZERO {
                return Some(remaining + self.padding);
            }
            if self.current.is_none() && self.queue.is_empty() {
                return None;
            }
            self.advance(events);
            if self.current.is_none() {
                return None;
            }
        }
    }

    fn advance(&mut self, events: &mut Vec<PlaybackEvent>) {
        match self.queue.pop_front() {
            Some(next) => self.play_item(next, 0, events),
            None => self.clear(events),
        }
    }

    fn play_item(&mut self, item: QueueItem, elapsed_ms: u64, events: &mut Vec<PlaybackEvent>) {
        let duration = Duration::from_millis(item.duration());
        let elapsed = Duration::from_millis(elapsed_ms).min(duration);
        let now = Instant::now();
        self.begin = now.checked_sub(elapsed).unwrap_or(now);
        self.end = now + (duration - elapsed);
        self.current = Some(item.clone());
        events.push(PlaybackEvent::Played(item));
    }

    fn clear(&mut self, events: &mut Vec<PlaybackEvent>) {
        if self.current.take().is_some() {
            events.push(PlaybackEvent::Stopped);
        }
        let now = Instant::now();
        self.begin = now;
        self.end = now;
    }
}
