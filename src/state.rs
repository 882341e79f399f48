use std::sync::Arc;

use crate::archive::ArchiveSink;
use crate::cache::CacheStore;
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::publish::{BroadcastHub, Publisher};
use crate::ratelimit::RateLimiter;
use crate::registry::ActiveSessionRegistry;
use crate::repository::SessionRepository;
use crate::vote::VoteEngine;

/// All long-lived singletons, constructed once at startup and shared by
/// the handlers and schedulers. The registry is the only mutable piece.
pub struct AppState {
    pub config: Config,
    pub repository: Arc<SessionRepository>,
    pub registry: Arc<ActiveSessionRegistry>,
    pub vote: Arc<VoteEngine>,
    pub chat: Arc<ChatEngine>,
    pub hub: BroadcastHub,
    pub archive: Arc<dyn ArchiveSink>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Arc<Self> {
        let hub = BroadcastHub::new();
        let publisher: Arc<dyn Publisher> = Arc::new(hub.clone());

        let repository = Arc::new(SessionRepository::new(
            store.clone(),
            config.session_ttl(),
            config.post_reveal_ttl(),
            config.chat_max_messages,
        ));
        let limiter = Arc::new(RateLimiter::new(store));
        let registry = Arc::new(ActiveSessionRegistry::new());

        let vote = Arc::new(VoteEngine::new(
            repository.clone(),
            limiter.clone(),
            publisher.clone(),
            config.name_max_length,
        ));
        let chat = Arc::new(ChatEngine::new(
            repository.clone(),
            limiter,
            publisher,
            config.chat_max_length,
            config.name_max_length,
        ));

        Arc::new(Self {
            config,
            repository,
            registry,
            vote,
            chat,
            hub,
            archive,
        })
    }
}
