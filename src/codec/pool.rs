//! Bounded pool of codec instances.
//!
//! A connection worker checks a codec out for exactly one encode or decode
//! and returns it when the guard drops. When every instance is in use the
//! checkout waits up to the configured timeout and then fails with
//! [`EppError::PoolTimeout`].

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::{DecodeError, EncodeError};
use super::registry::CodecRegistry;
use super::{envelope, xml};
use crate::error::{EppError, Result};
use crate::protocol::Message;

/// Initial output buffer capacity per codec.
const BUFFER_CAPACITY: usize = 8 * 1024;

/// Stateful document codec bound to a registry.
///
/// Keeps its output buffer between uses, which is why instances are pooled
/// rather than shared.
#[derive(Debug)]
pub struct XmlCodec {
    registry: Arc<CodecRegistry>,
    buffer: Vec<u8>,
}

impl XmlCodec {
    /// Create a codec over the registry.
    pub fn new(registry: Arc<CodecRegistry>) -> Self {
        Self {
            registry,
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// Parse and decode one document.
    pub fn decode(&mut self, document: &[u8]) -> std::result::Result<Message, DecodeError> {
        let root = xml::parse(document)?;
        self.registry.decode(&root)
    }

    /// Encode one message into a complete document.
    pub fn encode(&mut self, message: &Message) -> std::result::Result<Vec<u8>, EncodeError> {
        let root = self.registry.encode(message)?;
        self.buffer.clear();
        xml::write_document(&root, &mut self.buffer)?;
        Ok(self.buffer.clone())
    }

    /// Registry this codec resolves namespaces with.
    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }
}

/// What can still be read from a document that failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedDocument {
    /// Client transaction id, when present and well-formed
    pub client_trans_id: Option<String>,
    /// Verb of a `<command>` document; empty when the verb is unreadable
    pub command: Option<String>,
}

impl FailedDocument {
    /// Best-effort inspection of a raw document. Unparseable input yields
    /// the default (nothing recovered).
    pub fn inspect(document: &[u8]) -> Self {
        match xml::parse(document) {
            Ok(root) => Self {
                client_trans_id: envelope::find_client_trans_id(&root),
                command: envelope::find_command_verb(&root),
            },
            Err(_) => Self::default(),
        }
    }

    /// Whether the document was a command other than `login`.
    pub fn is_session_command(&self) -> bool {
        self.command.as_deref().is_some_and(|verb| verb != "login")
    }
}

/// Fixed-size pool of [`XmlCodec`] instances.
#[derive(Debug)]
pub struct CodecPool {
    registry: Arc<CodecRegistry>,
    idle: Mutex<Vec<XmlCodec>>,
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

impl CodecPool {
    /// Create a pool of `size` codecs (at least one).
    pub fn new(registry: Arc<CodecRegistry>, size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        let idle = (0..size).map(|_| XmlCodec::new(registry.clone())).collect();
        Self {
            registry,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    /// Borrow a codec, waiting up to the checkout timeout.
    pub async fn checkout(&self) -> Result<PooledCodec<'_>> {
        let permit = tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| EppError::PoolTimeout(self.timeout))?
            .map_err(|_| EppError::Server("codec pool closed".to_string()))?;

        let codec = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| XmlCodec::new(self.registry.clone()));

        Ok(PooledCodec {
            pool: self,
            codec: Some(codec),
            _permit: permit,
        })
    }

    /// Codecs currently available without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Total number of codecs.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    fn give_back(&self, codec: XmlCodec) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(codec);
    }
}

/// A checked-out codec; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledCodec<'a> {
    pool: &'a CodecPool,
    codec: Option<XmlCodec>,
    // Released after the codec is back in the idle list.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledCodec<'_> {
    type Target = XmlCodec;

    fn deref(&self) -> &XmlCodec {
        self.codec.as_ref().expect("codec is present until drop")
    }
}

impl DerefMut for PooledCodec<'_> {
    fn deref_mut(&mut self) -> &mut XmlCodec {
        self.codec.as_mut().expect("codec is present until drop")
    }
}

impl Drop for PooledCodec<'_> {
    fn drop(&mut self) {
        if let Some(codec) = self.codec.take() {
            self.pool.give_back(codec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize, timeout_ms: u64) -> CodecPool {
        CodecPool::new(
            Arc::new(CodecRegistry::new()),
            size,
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_checkout_returns_on_drop() {
        let pool = pool(2, 50);
        {
            let _a = pool.checkout().await.unwrap();
            let _b = pool.checkout().await.unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.idle.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1, 20);
        let _held = pool.checkout().await.unwrap();
        match pool.checkout().await {
            Err(EppError::PoolTimeout(t)) => assert_eq!(t, Duration::from_millis(20)),
            other => panic!("expected timeout, got {other:?}"),
        };
    }

    #[tokio::test]
    async fn test_codec_hello_roundtrip() {
        let pool = pool(1, 50);
        let mut codec = pool.checkout().await.unwrap();
        let bytes = codec.encode(&Message::Hello).unwrap();
        assert!(bytes.starts_with(b"<?xml"));
        assert_eq!(codec.decode(&bytes).unwrap(), Message::Hello);
    }

    #[test]
    fn test_inspect_failed_document() {
        let doc = br#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><command><nope/><clTRID>REC-1</clTRID></command></epp>"#;
        let failed = FailedDocument::inspect(doc);
        assert_eq!(failed.client_trans_id.as_deref(), Some("REC-1"));
        assert_eq!(failed.command.as_deref(), Some("nope"));
        assert!(failed.is_session_command());

        let login = br#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><command><login><clID/></login></command></epp>"#;
        assert!(!FailedDocument::inspect(login).is_session_command());

        assert_eq!(FailedDocument::inspect(b"<broken"), FailedDocument::default());
    }
}
