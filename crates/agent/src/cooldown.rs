//! Per-channel cooldown scheduling.
//!
//! Each monitored channel moves through three phases:
//!
//! | Phase | Meaning |
//! |-------|---------|
//! | `Idle` | No action pending; ready once `next_allowed_at` has passed |
//! | `Cooling` | Waiting out the delay armed by the last action |
//! | `Acting` | An action is in flight |
//!
//! `Cooling → Idle` is evaluated lazily whenever the state is read; there
//! is no timer task. The registry lock is held only to find or insert a
//! channel entry; each channel's state has its own lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use murmur_config::CooldownConfig;
use murmur_core::channel::ChannelId;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

/// Where a channel is in its action cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Cooling,
    Acting,
}

/// Timing policy shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Applied after a failed action; shorter than `min_delay_secs`.
    pub fallback_delay_secs: u64,
    /// Successful actions allowed per rolling window; 0 disables the cap.
    pub max_actions_per_window: u32,
    pub window_secs: u64,
}

impl CooldownPolicy {
    pub fn from_config(config: &CooldownConfig) -> Self {
        Self {
            min_delay_secs: config.min_delay_secs,
            max_delay_secs: config.max_delay_secs,
            fallback_delay_secs: config.fallback_delay_secs,
            max_actions_per_window: config.max_actions_per_window,
            window_secs: config.window_secs,
        }
    }

    fn sample_delay(&self) -> u64 {
        let (lo, hi) = if self.min_delay_secs <= self.max_delay_secs {
            (self.min_delay_secs, self.max_delay_secs)
        } else {
            (self.max_delay_secs, self.min_delay_secs)
        };
        rand::rng().random_range(lo..=hi)
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::from_config(&CooldownConfig::default())
    }
}

/// Scheduling state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub phase: Phase,
    pub last_agent_action_at: Option<DateTime<Utc>>,
    pub next_allowed_at: Option<DateTime<Utc>>,
    /// Timestamps of successful actions inside the rolling window.
    pub action_count_window: VecDeque<DateTime<Utc>>,
}

impl ChannelState {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            phase: Phase::Idle,
            last_agent_action_at: None,
            next_allowed_at: None,
            action_count_window: VecDeque::new(),
        }
    }

    /// Settle lazily-evaluated transitions as of `now`.
    fn refresh(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        if self.phase == Phase::Cooling && self.next_allowed_at.is_none_or(|t| now >= t) {
            self.phase = Phase::Idle;
        }
        while self
            .action_count_window
            .front()
            .is_some_and(|t| now - *t >= window)
        {
            self.action_count_window.pop_front();
        }
    }

    fn ready(&self, now: DateTime<Utc>, policy: &CooldownPolicy) -> bool {
        let cap_ok = policy.max_actions_per_window == 0
            || self.action_count_window.len() < policy.max_actions_per_window as usize;
        self.phase != Phase::Acting && self.next_allowed_at.is_none_or(|t| now >= t) && cap_ok
    }

    fn arm(&mut self, now: DateTime<Utc>, delay_secs: u64) {
        self.phase = Phase::Cooling;
        self.last_agent_action_at = Some(now);
        self.next_allowed_at = Some(now + secs(delay_secs));
    }
}

fn secs(n: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(n).unwrap_or(i64::MAX / 1000))
}

/// Gatekeeper deciding when the agent may act in each channel.
pub struct CooldownScheduler {
    policy: CooldownPolicy,
    channels: RwLock<HashMap<ChannelId, Arc<Mutex<ChannelState>>>>,
}

impl CooldownScheduler {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    fn entry(&self, channel: &ChannelId) -> Arc<Mutex<ChannelState>> {
        {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = channels.get(channel) {
                return Arc::clone(state);
            }
        }
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            channels
                .entry(channel.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ChannelState::new(channel.clone())))),
        )
    }

    fn with_state<T>(&self, channel: &ChannelId, f: impl FnOnce(&mut ChannelState) -> T) -> T {
        let entry = self.entry(channel);
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn window(&self) -> TimeDelta {
        secs(self.policy.window_secs)
    }

    /// Whether the agent may act in `channel` at `now`.
    pub fn is_ready(&self, channel: &ChannelId, now: DateTime<Utc>) -> bool {
        let window = self.window();
        self.with_state(channel, |state| {
            state.refresh(now, window);
            state.ready(now, &self.policy)
        })
    }

    /// Check readiness and enter `Acting` in one step.
    ///
    /// Returns `false` (and changes nothing) when the channel is not ready,
    /// including when another action is already in flight.
    pub fn try_begin(&self, channel: &ChannelId, now: DateTime<Utc>) -> bool {
        let window = self.window();
        self.with_state(channel, |state| {
            state.refresh(now, window);
            if !state.ready(now, &self.policy) {
                return false;
            }
            state.phase = Phase::Acting;
            true
        })
    }

    /// Record a successful action and arm a random cooldown.
    ///
    /// Returns the chosen delay in seconds.
    pub fn mark_acted(&self, channel: &ChannelId, now: DateTime<Utc>) -> u64 {
        let delay = self.policy.sample_delay();
        let window = self.window();
        self.with_state(channel, |state| {
            state.refresh(now, window);
            state.arm(now, delay);
            state.action_count_window.push_back(now);
        });
        debug!(channel = %channel, delay_secs = delay, "Cooldown armed");
        delay
    }

    /// Record a failed action and arm the fallback cooldown.
    /// Failed actions do not count against the rate window.
    pub fn mark_failed(&self, channel: &ChannelId, now: DateTime<Utc>) -> u64 {
        let delay = self.policy.fallback_delay_secs;
        let window = self.window();
        self.with_state(channel, |state| {
            state.refresh(now, window);
            state.arm(now, delay);
        });
        debug!(channel = %channel, delay_secs = delay, "Fallback cooldown armed");
        delay
    }

    /// Abandon an in-flight action without arming any cooldown.
    pub fn release(&self, channel: &ChannelId) {
        self.with_state(channel, |state| {
            if state.phase == Phase::Acting {
                state.phase = if state.next_allowed_at.is_some() {
                    Phase::Cooling
                } else {
                    Phase::Idle
                };
            }
        });
    }

    /// Read-only copy of a channel's state as of `now`.
    pub fn snapshot(&self, channel: &ChannelId, now: DateTime<Utc>) -> ChannelState {
        let window = self.window();
        self.with_state(channel, |state| {
            state.refresh(now, window);
            state.clone()
        })
    }
}
