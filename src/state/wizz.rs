//! Client-local anti-spam state for the wizz side-channel.
//!
//! Nothing here is shared through the session document: every client owns
//! its own throttle, so the limits only guard against accidental rapid
//! clicking.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use uuid::Uuid;

/// Limits applied per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizzPolicy {
    /// Rolling window in which clicks are counted.
    pub window: Duration,
    /// Click count within `window` that disables the target.
    pub max_clicks: usize,
    /// How long a disabled target stays disabled.
    pub cooldown: Duration,
}

impl Default for WizzPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3),
            max_clicks: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Outcome of a send click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// The notification may be written.
    Allowed,
    /// Target is (or just became) disabled; nothing must be written.
    Throttled,
}

#[derive(Debug, Default)]
struct TargetState {
    clicks: VecDeque<Instant>,
    disabled_at: Option<Instant>,
}

/// Per-target click history and cooldowns.
#[derive(Debug, Default)]
pub struct WizzThrottle {
    policy: WizzPolicy,
    targets: HashMap<Uuid, TargetState>,
}

impl WizzThrottle {
    /// Throttle with no click history.
    pub fn new(policy: WizzPolicy) -> Self {
        Self {
            policy,
            targets: HashMap::new(),
        }
    }

    /// Record a send click on `target` at `now` and decide whether it goes through.
    ///
    /// The click that fills the window disables the target and is itself blocked.
    pub fn register_click(&mut self, target: Uuid, now: Instant) -> ThrottleDecision {
        let policy = self.policy;
        let state = self.targets.entry(target).or_default();
        Self::expire_cooldown(&policy, state, now);

        if state.disabled_at.is_some() {
            return ThrottleDecision::Throttled;
        }

        while let Some(oldest) = state.clicks.front() {
            if now.saturating_duration_since(*oldest) < policy.window {
                break;
            }
            state.clicks.pop_front();
        }
        state.clicks.push_back(now);

        if state.clicks.len() >= policy.max_clicks {
            state.disabled_at = Some(now);
            return ThrottleDecision::Throttled;
        }

        ThrottleDecision::Allowed
    }

    /// Whether sends to `target` are currently blocked.
    pub fn is_disabled(&mut self, target: Uuid, now: Instant) -> bool {
        let policy = self.policy;
        match self.targets.get_mut(&target) {
            Some(state) => {
                Self::expire_cooldown(&policy, state, now);
                state.disabled_at.is_some()
            }
            None => false,
        }
    }

    /// Every target currently blocked, sorted for stable output.
    pub fn disabled_targets(&mut self, now: Instant) -> Vec<Uuid> {
        let policy = self.policy;
        let mut disabled = self
            .targets
            .iter_mut()
            .filter_map(|(target, state)| {
                Self::expire_cooldown(&policy, state, now);
                state.disabled_at.map(|_| *target)
            })
            .collect::<Vec<_>>();
        disabled.sort();
        disabled
    }

    fn expire_cooldown(policy: &WizzPolicy, state: &mut TargetState, now: Instant) {
        if let Some(disabled_at) = state.disabled_at
            && now >= disabled_at + policy.cooldown
        {
            state.disabled_at = None;
            state.clicks.clear();
        }
    }
}

/// Ephemeral, per-client controls that never reach the shared document.
#[derive(Debug, Default)]
pub struct LocalControls {
    throttle: WizzThrottle,
    secret_mode: bool,
}

impl LocalControls {
    /// Controls with secret mode locked.
    pub fn new(policy: WizzPolicy) -> Self {
        Self {
            throttle: WizzThrottle::new(policy),
            secret_mode: false,
        }
    }

    /// Throttle deciding which nudges go out.
    pub fn throttle_mut(&mut self) -> &mut WizzThrottle {
        &mut self.throttle
    }

    /// Whether the hidden mode letting any participant send wizzes is unlocked.
    pub fn secret_mode(&self) -> bool {
        self.secret_mode
    }

    /// Unlock secret mode for the rest of this client's life.
    pub fn unlock_secret_mode(&mut self) {
        self.secret_mode = true;
    }
}
