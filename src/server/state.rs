//! Shared server state.

use std::sync::Arc;

use super::config::ServerConfig;
use crate::codec::{CodecPool, CodecRegistry};
use crate::poll::PollQueue;
use crate::protocol::Greeting;
use crate::session::Dispatcher;

/// Everything connection workers share.
///
/// Built once at startup and handed to every worker behind an `Arc`; there
/// is no process-wide state.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    registry: Arc<CodecRegistry>,
    codecs: CodecPool,
    poll_queue: Arc<PollQueue>,
    dispatcher: Dispatcher,
}

impl ServerContext {
    /// Create the context. The registry is frozen from here on.
    pub fn new(config: ServerConfig, registry: CodecRegistry, dispatcher: Dispatcher) -> Self {
        let registry = Arc::new(registry);
        let codecs = CodecPool::new(Arc::clone(&registry), config.pool_size, config.pool_timeout);
        let dispatcher = dispatcher.with_max_login_attempts(config.max_login_attempts);

        Self {
            config,
            registry,
            codecs,
            poll_queue: Arc::new(PollQueue::new()),
            dispatcher,
        }
    }

    /// Use a poll queue shared with the embedding application.
    pub fn with_poll_queue(mut self, poll_queue: Arc<PollQueue>) -> Self {
        self.poll_queue = poll_queue;
        self
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Codec registry
    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// Codec pool
    pub fn codecs(&self) -> &CodecPool {
        &self.codecs
    }

    /// Poll queue
    pub fn poll_queue(&self) -> &Arc<PollQueue> {
        &self.poll_queue
    }

    /// Command dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Fresh greeting for a new connection.
    pub fn greeting(&self) -> Greeting {
        let mut greeting = self.registry.greeting(&self.config.server_id);
        greeting.languages = self.config.languages.clone();
        greeting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::DOMAIN_NS;
    use crate::protocol::TransIdGenerator;
    use crate::session::StaticAuthenticator;

    #[test]
    fn test_greeting_reflects_registry_and_config() {
        let config = ServerConfig::default()
            .with_server_id("Example EPP server")
            .with_languages(["en", "fr"]);
        let dispatcher = Dispatcher::new(
            Arc::new(StaticAuthenticator::default()),
            TransIdGenerator::new("SRV"),
        );
        let ctx = ServerContext::new(config, crate::objects::default_registry(), dispatcher);

        let greeting = ctx.greeting();
        assert_eq!(greeting.server_id, "Example EPP server");
        assert_eq!(greeting.languages, vec!["en", "fr"]);
        assert!(greeting.supports_object(DOMAIN_NS));
        assert_eq!(ctx.codecs().size(), ctx.config().pool_size);
    }
}
