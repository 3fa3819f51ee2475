use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::RetentionPolicy,
    dao::{
        models::{SessionEntity, SessionQuery},
        session_store::SessionStore,
    },
};

/// Sessions removed by one [`sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Older than the maximum age.
    pub expired: usize,
    /// Oldest sessions dropped to make room under the session cap.
    pub overflow: usize,
    /// Ids of every deleted session, so callers can drop what they keep per session.
    pub removed: Vec<Uuid>,
}

/// Delete expired sessions, then the oldest ones until a new session fits
/// under the cap. Errors are logged and never surfaced to the caller.
pub async fn sweep(
    store: &dyn SessionStore,
    policy: RetentionPolicy,
    now_millis: i64,
) -> RetentionReport {
    let mut report = RetentionReport::default();

    let max_age = i64::try_from(policy.max_age.as_millis()).unwrap_or(i64::MAX);
    let expired_query = SessionQuery {
        created_before: Some(now_millis.saturating_sub(max_age)),
        limit: None,
    };
    match store.query_sessions(expired_query).await {
        Ok(expired) => report.expired = delete_all(store, &expired, &mut report.removed).await,
        Err(err) => warn!(error = %err, "retention sweep could not list expired sessions"),
    }

    match store.query_sessions(SessionQuery::default()).await {
        Ok(remaining) if remaining.len() >= policy.max_sessions => {
            let excess = (remaining.len() + 1 - policy.max_sessions).min(remaining.len());
            report.overflow = delete_all(store, &remaining[..excess], &mut report.removed).await;
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "retention sweep could not count sessions"),
    }

    if report != RetentionReport::default() {
        info!(
            expired = report.expired,
            overflow = report.overflow,
            "retention sweep removed sessions"
        );
    }
    report
}

async fn delete_all(
    store: &dyn SessionStore,
    sessions: &[SessionEntity],
    removed: &mut Vec<Uuid>,
) -> usize {
    let mut deleted = 0;
    for session in sessions {
        match store.delete_session(session.id).await {
            Ok(true) => {
                deleted += 1;
                removed.push(session.id);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "retention sweep failed to delete session")
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{dao::session_store::memory::MemorySessionStore, services::mutations::new_session};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    async fn seed(store: &MemorySessionStore, created_at: &[i64]) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for (index, at) in created_at.iter().enumerate() {
            let session = new_session(&format!("PM {index}"), *at).unwrap();
            store
                .create_session(SessionEntity::from(&session))
                .await
                .unwrap();
            ids.push(session.id);
        }
        ids
    }

    async fn remaining(store: &MemorySessionStore) -> Vec<i64> {
        store
            .query_sessions(SessionQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|session| session.created_at)
            .collect()
    }

    #[tokio::test]
    async fn expired_sessions_are_deleted() {
        let store = MemorySessionStore::new();
        let now = 100 * HOUR_MS;
        let ids = seed(&store, &[now - 30 * HOUR_MS, now - 25 * HOUR_MS, now - HOUR_MS]).await;

        let report = sweep(&store, RetentionPolicy::default(), now).await;

        assert_eq!(report.expired, 2);
        assert_eq!(report.removed, ids[..2].to_vec());
        assert_eq!(report.overflow, 0);
        assert_eq!(remaining(&store).await, vec![now - HOUR_MS]);
    }

    #[tokio::test]
    async fn oldest_sessions_make_room_at_the_cap() {
        let store = MemorySessionStore::new();
        let ids = seed(&store, &[50, 10, 40, 20, 30]).await;
        let policy = RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_sessions: 4,
        };

        let report = sweep(&store, policy, 60).await;

        // Five stored, cap of four: two go so the new session fits.
        assert_eq!(report.overflow, 2);
        assert_eq!(report.removed, vec![ids[1], ids[3]]);
        assert_eq!(remaining(&store).await, vec![30, 40, 50]);
    }

    #[tokio::test]
    async fn below_the_cap_nothing_is_removed() {
        let store = MemorySessionStore::new();
        seed(&store, &[10, 20]).await;

        let report = sweep(&store, RetentionPolicy::default(), 30).await;

        assert_eq!(report, RetentionReport::default());
        assert_eq!(remaining(&store).await.len(), 2);
    }
}
