use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use roost_types::models::UserSummary;

/// How long a typing signal stays visible without renewal.
pub const TYPING_TTL: Duration = Duration::from_secs(2);

/// Presence Signal state for one open conversation: which remote users are
/// currently typing.
///
/// Each observed event restarts the user's countdown; entries decay
/// [`TYPING_TTL`] after the last event. The map lives inside the active
/// conversation's context and is torn down with it on navigation. There
/// are no ambient timers; expiry is checked against deadlines on read and
/// on the session's sweep tick.
#[derive(Debug)]
pub struct TypingTracker {
    local_user: Uuid,
    deadlines: HashMap<Uuid, (UserSummary, Instant)>,
}

impl TypingTracker {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            deadlines: HashMap::new(),
        }
    }

    /// Record a typing event received at `at`. Events for the local user
    /// are ignored. Returns whether the set of visible typers changed.
    pub fn observe(&mut self, user: UserSummary, at: Instant) -> bool {
        if user.id == self.local_user {
            return false;
        }
        let id = user.id;
        self.deadlines.insert(id, (user, at + TYPING_TTL)).is_none()
    }

    /// Drop expired entries. Returns whether any were removed.
    pub fn sweep(&mut self, now: Instant) -> bool {
        let before = self.deadlines.len();
        self.deadlines.retain(|_, (_, deadline)| *deadline > now);
        self.deadlines.len() != before
    }

    /// Users whose signal has not yet expired, in stable (username) order.
    pub fn active(&self, now: Instant) -> Vec<UserSummary> {
        let mut users: Vec<UserSummary> = self
            .deadlines
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn user(name: &str) -> UserSummary {
        UserSummary {
            id: Uuid::new_v4(),
            username: name.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn signal_expires_after_ttl() {
        let me = Uuid::new_v4();
        let mut tracker = TypingTracker::new(me);
        let bob = user("bob");

        tracker.observe(bob.clone(), Instant::now());

        advance(Duration::from_millis(1900)).await;
        assert_eq!(tracker.active(Instant::now()), vec![bob]);

        advance(Duration::from_millis(200)).await;
        assert!(tracker.active(Instant::now()).is_empty());
        assert!(tracker.sweep(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_restarts_the_countdown() {
        let me = Uuid::new_v4();
        let mut tracker = TypingTracker::new(me);
        let bob = user("bob");

        tracker.observe(bob.clone(), Instant::now());
        advance(Duration::from_millis(1500)).await;
        tracker.observe(bob.clone(), Instant::now());

        // 1.5s after the second event the first one alone would have
        // expired already.
        advance(Duration::from_millis(1500)).await;
        assert_eq!(tracker.active(Instant::now()), vec![bob]);

        advance(Duration::from_millis(600)).await;
        assert!(tracker.active(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn local_user_is_never_shown_typing() {
        let me = user("me");
        let mut tracker = TypingTracker::new(me.id);

        assert!(!tracker.observe(me.clone(), Instant::now()));
        assert!(tracker.active(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_events_do_not_duplicate_membership() {
        let me = Uuid::new_v4();
        let mut tracker = TypingTracker::new(me);
        let bob = user("bob");

        assert!(tracker.observe(bob.clone(), Instant::now()));
        assert!(!tracker.observe(bob.clone(), Instant::now()));
        assert_eq!(tracker.active(Instant::now()).len(), 1);
    }
}
