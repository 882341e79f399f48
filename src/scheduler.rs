//! # Periodic drivers
//!
//! Three loops run for the lifetime of the process:
//!
//! - the broadcast scheduler coalesces votes into aggregate frames at a
//!   fixed cadence, gated per session by the dirty flag;
//! - the lifecycle controller walks sessions through
//!   waiting -> live -> ended against the clock and finalizes reveals;
//! - the reconciler re-syncs the in-memory registry with the cache.
//!
//! All three consult the registry first and do nothing (zero cache
//! commands) while it is empty. Ticks run to completion; a tick that
//! overruns its interval skips the missed fires instead of queueing them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as TimeDelta, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, trace, warn};

use crate::archive::ArchiveSink;
use crate::domain::{RevealEvent, Session, SessionStatus};
use crate::publish::{topics, Publisher};
use crate::registry::ActiveSessionRegistry;
use crate::repository::SessionRepository;

const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(1);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Sessions go live this long before their reveal instant.
const ACTIVATION_LEAD_SECONDS: i64 = 300;

/// Emits aggregate vote counts for sessions with voting activity since
/// the previous emission. The get-and-delete on the dirty flag makes one
/// frame cover every vote that landed in between.
pub struct BroadcastScheduler {
    repository: Arc<SessionRepository>,
    registry: Arc<ActiveSessionRegistry>,
    publisher: Arc<dyn Publisher>,
    interval: Duration,
}

impl BroadcastScheduler {
    pub fn new(
        repository: Arc<SessionRepository>,
        registry: Arc<ActiveSessionRegistry>,
        publisher: Arc<dyn Publisher>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            publisher,
            interval,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        if self.registry.is_empty() {
            return;
        }

        for session_id in self.registry.snapshot() {
            match self.repository.test_and_clear_dirty(&session_id).await {
                Ok(true) => match self.repository.get_votes(&session_id).await {
                    Ok(votes) => {
                        match serde_json::to_value(votes) {
                            Ok(payload) => self
                                .publisher
                                .publish(&topics::votes(&session_id), payload),
                            Err(e) => error!("failed to encode vote count: {e}"),
                        }
                        trace!("broadcast votes for session {session_id}: {votes:?}");
                    }
                    Err(e) => error!("vote count read failed for {session_id}: {e}"),
                },
                Ok(false) => {}
                Err(e) => error!("dirty check failed for {session_id}: {e}"),
            }
        }
    }
}

/// Drives status transitions from the clock and owns finalization.
pub struct LifecycleController {
    repository: Arc<SessionRepository>,
    registry: Arc<ActiveSessionRegistry>,
    publisher: Arc<dyn Publisher>,
    archive: Arc<dyn ArchiveSink>,
}

impl LifecycleController {
    pub fn new(
        repository: Arc<SessionRepository>,
        registry: Arc<ActiveSessionRegistry>,
        publisher: Arc<dyn Publisher>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Self {
        Self {
            repository,
            registry,
            publisher,
            archive,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(LIFECYCLE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        if self.registry.is_empty() {
            return;
        }

        let now = Utc::now();
        for session_id in self.registry.snapshot() {
            let session = match self.repository.get_session(&session_id).await {
                Ok(Some(session)) => session,
                // Expired or undecodable; the reconciler will drop it.
                Ok(None) => continue,
                Err(e) => {
                    error!("lifecycle read failed for {session_id}: {e}");
                    continue;
                }
            };

            if session.status == SessionStatus::Waiting
                && now >= session.reveal_time - TimeDelta::seconds(ACTIVATION_LEAD_SECONDS)
            {
                match self
                    .repository
                    .set_status(&session_id, SessionStatus::Live)
                    .await
                {
                    Ok(()) => info!("session {session_id} activated"),
                    Err(e) => error!("activation failed for {session_id}: {e}"),
                }
            }

            if session.status != SessionStatus::Ended && now >= session.reveal_time {
                self.finalize(&session).await;
            }
        }
    }

    /// Runs once per session: re-entry is fended off by the status guard
    /// in `tick` plus the removal from the registry and active set below.
    async fn finalize(&self, session: &Session) {
        let session_id = &session.session_id;
        info!("triggering reveal for session {session_id}");

        let votes = match self.repository.get_votes(session_id).await {
            Ok(votes) => votes,
            Err(e) => {
                error!("final count read failed for {session_id}: {e}");
                return;
            }
        };
        let chat_history = match self.repository.get_all_chat(session_id).await {
            Ok(history) => history,
            Err(e) => {
                error!("chat history read failed for {session_id}: {e}");
                return;
            }
        };

        if let Err(e) = self
            .archive
            .save_results(session, &votes, &chat_history)
            .await
        {
            error!("archive write failed for session {session_id}: {e}");
        }

        let event = RevealEvent::of(session.gender, votes);
        match serde_json::to_value(&event) {
            Ok(payload) => self.publisher.publish(&topics::votes(session_id), payload),
            Err(e) => error!("failed to encode reveal event: {e}"),
        }

        if let Err(e) = self
            .repository
            .set_status(session_id, SessionStatus::Ended)
            .await
        {
            error!("failed to mark {session_id} ended: {e}");
            return;
        }
        if let Err(e) = self.repository.remove_active(session_id).await {
            error!("failed to remove {session_id} from active set: {e}");
        }
        if let Err(e) = self.repository.apply_post_reveal_ttl(session_id).await {
            error!("failed to shorten TTLs for {session_id}: {e}");
        }
        self.registry.unregister(session_id);

        info!(
            "reveal completed for session {session_id}: gender={}, votes={votes:?}",
            session.gender.as_str()
        );
    }
}

/// Re-syncs the registry with the cache every minute, healing phantom
/// ids and bounding divergence after a restart.
pub async fn run_reconciler(
    registry: Arc<ActiveSessionRegistry>,
    repository: Arc<SessionRepository>,
) {
    let mut ticker = interval(RECONCILE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = registry.reconcile(&repository).await {
            warn!(
                "reconcile failed, keeping local state ({} sessions): {e}",
                registry.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{VoteCount, VoteOption, VoteRecord};
    use crate::testutil::{MemoryStore, RecordingArchive, RecordingPublisher};

    struct Fixture {
        repository: Arc<SessionRepository>,
        registry: Arc<ActiveSessionRegistry>,
        publisher: Arc<RecordingPublisher>,
        archive: Arc<RecordingArchive>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let repository = Arc::new(SessionRepository::new(
            store.clone(),
            Duration::from_secs(24 * 3600),
            Duration::from_secs(3600),
            500,
        ));
        Fixture {
            repository,
            registry: Arc::new(ActiveSessionRegistry::new()),
            publisher: Arc::new(RecordingPublisher::new()),
            archive: Arc::new(RecordingArchive::new()),
            store,
        }
    }

    impl Fixture {
        fn broadcast(&self) -> BroadcastScheduler {
            BroadcastScheduler::new(
                self.repository.clone(),
                self.registry.clone(),
                self.publisher.clone(),
                Duration::from_millis(500),
            )
        }

        fn lifecycle(&self) -> LifecycleController {
            LifecycleController::new(
                self.repository.clone(),
                self.registry.clone(),
                self.publisher.clone(),
                self.archive.clone(),
            )
        }

        async fn seed_session(&self, id: &str, status: SessionStatus, reveal_in_secs: i64) {
            let session = Session {
                session_id: id.to_string(),
                owner_id: "o1".to_string(),
                gender: VoteOption::Boy,
                status,
                reveal_time: Utc::now() + TimeDelta::seconds(reveal_in_secs),
                created_at: Utc::now(),
            };
            self.repository.save_session(&session).await.unwrap();
            self.repository.init_votes(id).await.unwrap();
            self.registry.register(id);
        }

        async fn vote(&self, id: &str, visitor: &str, option: VoteOption) {
            let record = VoteRecord::new(visitor.to_string(), "Guest".to_string(), option);
            assert!(self.repository.record_vote(id, &record).await.unwrap());
        }
    }

    #[tokio::test]
    async fn broadcast_coalesces_votes_into_one_frame() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Live, 3600).await;
        f.vote("s1", "v1", VoteOption::Boy).await;
        f.vote("s1", "v2", VoteOption::Girl).await;

        let scheduler = f.broadcast();
        scheduler.tick().await;

        let frames = f.publisher.frames_for("votes/s1");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["boy"], 1);
        assert_eq!(frames[0]["girl"], 1);
    }

    #[tokio::test]
    async fn quiet_sessions_are_not_rebroadcast() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Live, 3600).await;
        f.vote("s1", "v1", VoteOption::Boy).await;

        let scheduler = f.broadcast();
        scheduler.tick().await;
        scheduler.tick().await;

        assert_eq!(f.publisher.frames_for("votes/s1").len(), 1);
    }

    #[tokio::test]
    async fn idle_broadcast_tick_issues_zero_cache_commands() {
        let f = fixture();
        let scheduler = f.broadcast();

        let before = f.store.op_count();
        scheduler.tick().await;
        assert_eq!(f.store.op_count(), before);
    }

    #[tokio::test]
    async fn idle_lifecycle_tick_issues_zero_cache_commands() {
        let f = fixture();
        let controller = f.lifecycle();

        let before = f.store.op_count();
        controller.tick().await;
        assert_eq!(f.store.op_count(), before);
    }

    #[tokio::test]
    async fn waiting_session_activates_inside_lead_window() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Waiting, 120).await;

        f.lifecycle().tick().await;

        let session = f.repository.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Live);
    }

    #[tokio::test]
    async fn waiting_session_outside_lead_window_stays_waiting() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Waiting, 3600).await;

        f.lifecycle().tick().await;

        let session = f.repository.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn due_session_is_finalized_once() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Live, -1).await;
        f.vote("s1", "v1", VoteOption::Boy).await;
        f.vote("s1", "v2", VoteOption::Girl).await;

        let controller = f.lifecycle();
        controller.tick().await;

        let session = f.repository.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(!f.repository.active_sessions().await.unwrap().contains("s1"));
        assert!(f.registry.is_empty());

        let reveals: Vec<_> = f
            .publisher
            .frames_for("votes/s1")
            .into_iter()
            .filter(|frame| frame["type"] == "reveal")
            .collect();
        assert_eq!(reveals.len(), 1);
        assert_eq!(reveals[0]["gender"], "boy");
        assert_eq!(reveals[0]["finalVotes"]["boy"], 1);
        assert_eq!(reveals[0]["finalVotes"]["girl"], 1);

        let archived = f.archive.results();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].1, VoteCount { boy: 1, girl: 1 });

        // A second tick finds nothing to do.
        controller.tick().await;
        assert_eq!(f.archive.results().len(), 1);
        let reveal_count = f
            .publisher
            .frames_for("votes/s1")
            .into_iter()
            .filter(|frame| frame["type"] == "reveal")
            .count();
        assert_eq!(reveal_count, 1);
    }

    #[tokio::test]
    async fn waiting_session_past_reveal_goes_straight_to_ended() {
        let f = fixture();
        f.seed_session("s1", SessionStatus::Waiting, -5).await;

        f.lifecycle().tick().await;

        let session = f.repository.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
    }
}
