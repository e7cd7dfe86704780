/// SOS alert suppression: cooldown and acknowledgement per reason
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Idle,
    Shown,
    Acknowledged,
}

/// Why `evaluate` answered the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Transitioned into `Shown`; emit the notification once
    Show,
    /// Shown too recently
    CoolingDown,
    /// Operator acknowledged and the window is still open
    Acknowledged,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertSuppressionEntry {
    pub acknowledged_until: Option<f64>,
    pub last_shown_at: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AlertPolicy {
    entries: HashMap<String, AlertSuppressionEntry>,
    cooldown: f64,
    ack_window: f64,
}

impl AlertPolicy {
    pub fn new(cooldown_seconds: f64, ack_window_seconds: f64) -> Self {
        Self {
            entries: HashMap::new(),
            cooldown: cooldown_seconds,
            ack_window: ack_window_seconds,
        }
    }

    /// True exactly when `reason` enters `Shown` at `now`
    pub fn should_show(&mut self, reason: &str, now: f64) -> bool {
        self.evaluate(reason, now) == AlertDecision::Show
    }

    pub fn evaluate(&mut self, reason: &str, now: f64) -> AlertDecision {
        let entry = self.entries.entry(reason.to_string()).or_default();

        if let Some(until) = entry.acknowledged_until {
            if now < until {
                return AlertDecision::Acknowledged;
            }
            entry.acknowledged_until = None;
        }
        if let Some(last) = entry.last_shown_at {
            if now - last < self.cooldown {
                return AlertDecision::CoolingDown;
            }
        }
        entry.last_shown_at = Some(now);
        AlertDecision::Show
    }

    pub fn acknowledge(&mut self, reason: &str, now: f64) {
        let entry = self.entries.entry(reason.to_string()).or_default();
        entry.acknowledged_until = Some(now + self.ack_window);
    }

    /// Read-only view; expiry is applied without mutating the entry
    pub fn state(&self, reason: &str, now: f64) -> AlertState {
        let Some(entry) = self.entries.get(reason) else {
            return AlertState::Idle;
        };
        if entry.acknowledged_until.is_some_and(|until| now < until) {
            return AlertState::Acknowledged;
        }
        if entry
            .last_shown_at
            .is_some_and(|last| now - last < self.cooldown)
        {
            return AlertState::Shown;
        }
        AlertState::Idle
    }

    /// Forget reasons that are back to `Idle`; they behave as never seen
    pub fn sweep(&mut self, now: f64) {
        let cooldown = self.cooldown;
        self.entries.retain(|_, entry| {
            entry.acknowledged_until.is_some_and(|until| now < until)
                || entry.last_shown_at.is_some_and(|last| now - last < cooldown)
        });
    }
}
