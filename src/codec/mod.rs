//! XML codec for protocol documents.
//!
//! Converts between raw documents and typed [`Message`](crate::protocol::Message)s.
//! Object and extension content is pluggable through the [`CodecRegistry`].
//!
//! # Layers
//!
//! | Layer        | Type             | Responsibility                          |
//! |--------------|------------------|-----------------------------------------|
//! | Tree         | [`Element`]      | Namespace-resolved XML, prefix handling |
//! | Envelope     | [`CodecRegistry`]| `<epp>` structure, delegating payloads  |
//! | Instances    | [`XmlCodec`]     | One reusable parser/writer              |
//! | Concurrency  | [`CodecPool`]    | Bounded checkout with timeout           |
//!
//! # Usage
//!
//! ```rust,ignore
//! use epp::codec::{CodecPool, CodecRegistry};
//! use epp::objects;
//!
//! let registry = Arc::new(objects::default_registry());
//! let pool = CodecPool::new(registry, 8, Duration::from_secs(5));
//!
//! let message = pool.checkout().await?.decode(&frame)?;
//! ```

mod envelope;
mod error;
mod pool;
mod registry;
mod xml;

pub use error::{DecodeError, EncodeError};
pub use pool::{CodecPool, FailedDocument, PooledCodec, XmlCodec};
pub use registry::{CodecRegistry, DecodeFn, RequiredExtension};
pub use xml::{parse, write_document, Element};
