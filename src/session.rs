//! Per-user chat context: who is logged in and what input they owe us.
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::model::Action;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Any masterlist role other than freshman; may submit IDs and read points.
    Staff { name: String, role: String },
    /// May only explore clubs.
    Freshman { name: String },
    /// Logged in but not on the masterlist.
    Denied,
}

impl Access {
    pub fn from_role(name: String, role: String) -> Self {
        if role.trim().eq_ignore_ascii_case("freshman") {
            Access::Freshman { name }
        } else {
            Access::Staff { name, role }
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Access::Staff { .. })
    }
}

/// The next text message from the user answers this prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Submit(Action),
    Points,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub access: Access,
    pub pending: Option<Pending>,
    last_seen: Instant,
}

/// All live sessions, keyed by Telegram user id.
pub struct Sessions {
    idle: Duration,
    inner: Mutex<HashMap<i64, Session>>,
}

impl Sessions {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fresh session, replacing any previous one.
    pub async fn login(&self, user: i64, access: Access) {
        self.inner.lock().await.insert(
            user,
            Session {
                access,
                pending: None,
                last_seen: Instant::now(),
            },
        );
    }

    pub async fn logout(&self, user: i64) -> bool {
        self.inner.lock().await.remove(&user).is_some()
    }

    /// Current session, if any; idle sessions are dropped and touched ones refreshed.
    pub async fn get(&self, user: i64) -> Option<Session> {
        let mut map = self.inner.lock().await;
        let expired = map
            .get(&user)
            .is_some_and(|s| s.last_seen.elapsed() >= self.idle);
        if expired {
            map.remove(&user);
            return None;
        }
        let session = map.get_mut(&user)?;
        session.last_seen = Instant::now();
        Some(session.clone())
    }

    /// Set the pending prompt; false when the user has no session.
    pub async fn set_pending(&self, user: i64, pending: Option<Pending>) -> bool {
        match self.inner.lock().await.get_mut(&user) {
            Some(session) => {
                session.pending = pending;
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Clear the pending prompt only if it is still `expected`; a newer
    /// choice made in the meantime is kept.
    pub async fn clear_pending_if(&self, user: i64, expected: Pending) -> bool {
        match self.inner.lock().await.get_mut(&user) {
            Some(session) if session.pending == Some(expected) => {
                session.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Drop every session idle for longer than the configured timeout.
    pub async fn sweep(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, s| s.last_seen.elapsed() < self.idle);
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_access() {
        assert_eq!(
            Access::from_role("Alice".into(), "Freshman".into()),
            Access::Freshman {
                name: "Alice".into()
            }
        );
        assert!(Access::from_role("Bob".into(), "OGL".into()).is_staff());
    }

    #[tokio::test]
    async fn login_pending_logout() {
        let sessions = Sessions::new(Duration::from_secs(60));
        assert!(sessions.get(1).await.is_none());
        assert!(!sessions.set_pending(1, Some(Pending::Points)).await);

        sessions
            .login(1, Access::from_role("Bob".into(), "OGL".into()))
            .await;
        assert!(
            sessions
                .set_pending(1, Some(Pending::Submit(Action::LateSignIn)))
                .await
        );
        let session = sessions.get(1).await.unwrap();
        assert_eq!(session.pending, Some(Pending::Submit(Action::LateSignIn)));

        assert!(sessions.logout(1).await);
        assert!(sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn clear_keeps_a_newer_choice() {
        let sessions = Sessions::new(Duration::from_secs(60));
        sessions
            .login(1, Access::from_role("Bob".into(), "OGL".into()))
            .await;
        let submitted = Pending::Submit(Action::Registration);
        sessions.set_pending(1, Some(submitted)).await;

        // User moved on to late sign-in before the registration finished.
        sessions
            .set_pending(1, Some(Pending::Submit(Action::LateSignIn)))
            .await;
        assert!(!sessions.clear_pending_if(1, submitted).await);
        assert_eq!(
            sessions.get(1).await.unwrap().pending,
            Some(Pending::Submit(Action::LateSignIn))
        );

        assert!(
            sessions
                .clear_pending_if(1, Pending::Submit(Action::LateSignIn))
                .await
        );
        assert_eq!(sessions.get(1).await.unwrap().pending, None);
        assert!(!sessions.clear_pending_if(2, submitted).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let sessions = Sessions::new(Duration::from_secs(60));
        sessions.login(1, Access::Denied).await;
        sessions.login(2, Access::Denied).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(sessions.get(2).await.is_some());

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(sessions.get(1).await.is_none());
        assert_eq!(sessions.sweep().await, 0);
        assert!(sessions.get(2).await.is_some());
    }
}
