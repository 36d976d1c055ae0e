//! Presence tracking (spec.md §4.7): drives forced writer-lock release when
//! a client disappears without an explicit `release_writer` call.
//!
//! `Absent -> Active -> Grace -> Absent`. A live subscription or an explicit
//! logout/unsubscribe keeps the state machine honest; `Active -> Grace` only
//! fires on subscription close (spec.md §4.7), so a principal that has never
//! opened a subscription — e.g. a write-only REST client issuing only
//! POSTs, spec.md §9 — stays `Active` indefinitely and is only reclaimed via
//! token expiry or `logout`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Grace,
}

struct Record {
    state: State,
    last_seen: DateTime<Utc>,
    subscriptions: u32,
    /// Set once `on_subscribe` has ever been called for this principal.
    /// Distinguishes "closed a subscription" from "never opened one" — only
    /// the former may start the Grace countdown.
    had_subscription: bool,
}

pub struct PresenceTracker {
    records: Mutex<HashMap<String, Record>>,
    grace: Duration,
}

impl PresenceTracker {
    pub fn new(grace: Duration) -> Self {
        Self { records: Mutex::new(HashMap::new()), grace }
    }

    /// Any authenticated command from `username` counts as activity.
    pub fn on_request(&self, username: &str) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(username.to_string()).or_insert_with(|| Record {
            state: State::Active,
            last_seen: Utc::now(),
            subscriptions: 0,
            had_subscription: false,
        });
        record.state = State::Active;
        record.last_seen = Utc::now();
    }

    pub fn on_subscribe(&self, username: &str) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(username.to_string()).or_insert_with(|| Record {
            state: State::Active,
            last_seen: Utc::now(),
            subscriptions: 0,
            had_subscription: false,
        });
        record.subscriptions += 1;
        record.had_subscription = true;
        record.state = State::Active;
        record.last_seen = Utc::now();
    }

    /// A dropped subscription alone does not make a principal absent — it
    /// only starts the grace countdown once it's the last thing keeping
    /// them active.
    pub fn on_unsubscribe(&self, username: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(username) {
            record.subscriptions = record.subscriptions.saturating_sub(1);
            record.last_seen = Utc::now();
        }
    }

    /// Explicit logout (spec.md §6.1: "presence → Absent"): drop the record
    /// outright rather than let it decay through Grace.
    pub fn on_logout(&self, username: &str) {
        self.records.lock().unwrap().remove(username);
    }

    /// Advance the state machine and return the usernames that just crossed
    /// into `Absent` this sweep — the caller (the Command Router's
    /// background task) is responsible for forcing their writer lock release.
    pub fn sweep(&self) -> Vec<String> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        let mut went_absent = Vec::new();

        records.retain(|username, record| {
            if record.subscriptions > 0 || !record.had_subscription {
                record.state = State::Active;
                return true;
            }

            match record.state {
                State::Active => {
                    if now - record.last_seen >= chrono_grace(self.grace) {
                        record.state = State::Grace;
                    }
                    true
                }
                State::Grace => {
                    if now - record.last_seen >= chrono_grace(self.grace) {
                        went_absent.push(username.clone());
                        false // drop the record; re-entering is a fresh Active
                    } else {
                        true
                    }
                }
            }
        });

        went_absent
    }
}

fn chrono_grace(grace: Duration) -> chrono::Duration {
    chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_principal_with_subscription_never_goes_absent() {
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        tracker.on_subscribe("alice");
        assert!(tracker.sweep().is_empty());
        assert!(tracker.sweep().is_empty());
    }

    #[test]
    fn request_only_principal_never_goes_absent_via_sweep() {
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        tracker.on_request("alice");
        // A write-only client that never opens a subscription must never be
        // swept into Grace/Absent — only token expiry or logout may reclaim it.
        assert!(tracker.sweep().is_empty());
        assert!(tracker.sweep().is_empty());
        assert!(tracker.sweep().is_empty());
    }

    #[test]
    fn unsubscribed_principal_goes_absent_after_two_sweeps_past_grace() {
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        tracker.on_subscribe("alice");
        tracker.on_unsubscribe("alice");
        // first sweep: Active -> Grace (grace already elapsed since duration is 0)
        assert!(tracker.sweep().is_empty());
        // second sweep: Grace -> Absent
        let absent = tracker.sweep();
        assert_eq!(absent, vec!["alice".to_string()]);
    }

    #[test]
    fn fresh_subscription_resets_the_grace_countdown() {
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        tracker.on_subscribe("alice");
        tracker.on_unsubscribe("alice");
        assert!(tracker.sweep().is_empty()); // now in Grace
        tracker.on_subscribe("alice"); // revived
        assert!(tracker.sweep().is_empty());
    }

    #[test]
    fn logout_removes_the_record_outright() {
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        tracker.on_subscribe("alice");
        tracker.on_unsubscribe("alice");
        tracker.on_logout("alice");
        // No record left to decay, so sweep must never report alice absent.
        assert!(tracker.sweep().is_empty());
    }
}
