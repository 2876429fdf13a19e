//! Per-message serialization cache for broadcasts.
//!
//! When one message goes to many connections, most of them share a handful
//! of protocols. The cache serializes the message once per protocol and
//! hands the same bytes to every recipient.
//!
//! The first two protocols live in inline slots, which covers the common
//! case without a map allocation; anything beyond that goes to an overflow
//! map. At most [`MAX_CACHED_PROTOCOLS`] entries are kept. Requests for
//! further protocols are still served, just serialized every time.
//!
//! A cache can also travel between servers: [`write_all_serialized_versions`]
//! packs every version into a small MessagePack map, and
//! [`read_all_serialized_versions`] restores a cache that has the bytes
//! but not the original message.
//!
//! [`write_all_serialized_versions`]: SerializationCache::write_all_serialized_versions
//! [`read_all_serialized_versions`]: SerializationCache::read_all_serialized_versions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::message::HubMessage;
use crate::msgpack;
use crate::protocol::HubProtocol;

/// Upper bound on cached protocol versions per message.
pub const MAX_CACHED_PROTOCOLS: usize = 10;

/// One protocol's encoding of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    protocol_name: String,
    payload: Bytes,
}

impl SerializedMessage {
    pub fn new(protocol_name: impl Into<String>, payload: Bytes) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            payload,
        }
    }

    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[derive(Debug, Default)]
struct Entries {
    first: Option<SerializedMessage>,
    second: Option<SerializedMessage>,
    overflow: HashMap<String, Bytes>,
}

impl Entries {
    fn get(&self, name: &str) -> Option<Bytes> {
        [&self.first, &self.second]
            .into_iter()
            .flatten()
            .find(|entry| entry.protocol_name == name)
            .map(|entry| entry.payload.clone())
            .or_else(|| self.overflow.get(name).cloned())
    }

    fn len(&self) -> usize {
        usize::from(self.first.is_some()) + usize::from(self.second.is_some()) + self.overflow.len()
    }

    /// Stores an entry unless the name is already present. Returns whether
    /// it was stored.
    fn insert(&mut self, name: &str, payload: Bytes) -> bool {
        if self.get(name).is_some() {
            return false;
        }
        let slot = if self.first.is_none() {
            &mut self.first
        } else if self.second.is_none() {
            &mut self.second
        } else {
            self.overflow.insert(name.to_string(), payload);
            return true;
        };
        *slot = Some(SerializedMessage::new(name, payload));
        true
    }
}

/// Caches the serialized forms of one [`HubMessage`].
///
/// Shared by reference between the tasks that deliver a broadcast; all
/// methods take `&self`.
#[derive(Debug)]
pub struct SerializationCache {
    message: Option<Arc<HubMessage>>,
    entries: Mutex<Entries>,
}

impl SerializationCache {
    /// Creates an empty cache for `message`.
    pub fn new(message: impl Into<Arc<HubMessage>>) -> Self {
        Self {
            message: Some(message.into()),
            entries: Mutex::default(),
        }
    }

    /// The message being cached, or `None` if the cache was restored from
    /// serialized versions.
    pub fn message(&self) -> Option<&HubMessage> {
        self.message.as_deref()
    }

    /// Number of cached versions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `protocol`'s encoding of the message, serializing it on the
    /// first request.
    pub fn get_serialized_message(
        &self,
        protocol: &dyn HubProtocol,
    ) -> Result<Bytes, ProtocolError> {
        let mut entries = self.lock();
        if let Some(cached) = entries.get(protocol.name()) {
            return Ok(cached);
        }

        let message = self.message.as_deref().ok_or(ProtocolError::NoOriginalMessage)?;
        let serialized = protocol.to_bytes(message)?;

        if entries.len() < MAX_CACHED_PROTOCOLS {
            entries.insert(protocol.name(), serialized.clone());
        } else {
            tracing::trace!(protocol = protocol.name(), "serialization cache full");
        }
        Ok(serialized)
    }

    /// Writes every protocol's version as a MessagePack map of
    /// `name (str) → payload (bin)`.
    pub fn write_all_serialized_versions(
        &self,
        protocols: &[Arc<dyn HubProtocol>],
        output: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        msgpack::write_map_header(protocols.len(), output)?;
        for protocol in protocols {
            let payload = self.get_serialized_message(protocol.as_ref())?;
            msgpack::write_str(protocol.name(), output)?;
            msgpack::write_bin(&payload, output)?;
        }
        Ok(())
    }

    /// Restores a cache from [`write_all_serialized_versions`] output.
    ///
    /// The result holds exactly the serialized versions that were written
    /// and no message, so requests for any other protocol fail with
    /// [`ProtocolError::NoOriginalMessage`]. `input` is advanced past the
    /// map.
    ///
    /// [`write_all_serialized_versions`]: Self::write_all_serialized_versions
    pub fn read_all_serialized_versions(input: &mut &[u8]) -> Result<Self, ProtocolError> {
        let count = msgpack::read_map_header(input)?;
        let mut entries = Entries::default();
        for _ in 0..count {
            let name = msgpack::read_str(input)?;
            let payload = Bytes::copy_from_slice(msgpack::read_bin(input)?);
            entries.insert(name, payload);
        }
        Ok(Self {
            message: None,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hubwire_transport::TransferFormat;

    use super::*;
    use crate::binder::InvocationBinder;
    use crate::json::JsonHubProtocol;
    use crate::message::CompletionMessage;

    /// Wraps the JSON protocol under another name and counts writes.
    struct Counting {
        name: String,
        writes: AtomicUsize,
    }

    impl Counting {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                writes: AtomicUsize::new(0),
            }
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl HubProtocol for Counting {
        fn name(&self) -> &str {
            &self.name
        }

        fn transfer_format(&self) -> TransferFormat {
            TransferFormat::Text
        }

        fn try_parse_message(
            &self,
            input: &mut &[u8],
            binder: &dyn InvocationBinder,
        ) -> Result<Option<HubMessage>, ProtocolError> {
            JsonHubProtocol::default().try_parse_message(input, binder)
        }

        fn write_message(
            &self,
            message: &HubMessage,
            output: &mut Vec<u8>,
        ) -> Result<(), ProtocolError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            JsonHubProtocol::default().write_message(message, output)
        }
    }

    fn cache() -> SerializationCache {
        SerializationCache::new(HubMessage::Completion(CompletionMessage::empty("1")))
    }

    #[test]
    fn test_get_serialized_message_serializes_once_per_protocol() {
        let cache = cache();
        let a = Counting::new("a");
        let b = Counting::new("b");

        let first = cache.get_serialized_message(&a).unwrap();
        let again = cache.get_serialized_message(&a).unwrap();
        cache.get_serialized_message(&b).unwrap();

        assert_eq!(first, again);
        assert_eq!(a.writes(), 1);
        assert_eq!(b.writes(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_serialized_message_overflow_map_beyond_two_slots() {
        let cache = cache();
        let protocols: Vec<Counting> = (0..5).map(|i| Counting::new(&format!("p{i}"))).collect();

        for protocol in &protocols {
            cache.get_serialized_message(protocol).unwrap();
            cache.get_serialized_message(protocol).unwrap();
        }

        assert_eq!(cache.len(), 5);
        assert!(protocols.iter().all(|p| p.writes() == 1));
    }

    #[test]
    fn test_get_serialized_message_beyond_limit_is_served_not_cached() {
        let cache = cache();
        let protocols: Vec<Counting> = (0..MAX_CACHED_PROTOCOLS + 1)
            .map(|i| Counting::new(&format!("p{i}")))
            .collect();

        for protocol in &protocols {
            cache.get_serialized_message(protocol).unwrap();
        }
        let extra = protocols.last().unwrap();
        cache.get_serialized_message(extra).unwrap();

        assert_eq!(cache.len(), MAX_CACHED_PROTOCOLS);
        assert_eq!(extra.writes(), 2);
        assert_eq!(protocols[0].writes(), 1);
    }

    #[test]
    fn test_write_all_serialized_versions_exact_layout() {
        let cache = cache();
        let protocols: Vec<Arc<dyn HubProtocol>> = vec![Arc::new(JsonHubProtocol::default())];

        let mut out = Vec::new();
        cache.write_all_serialized_versions(&protocols, &mut out).unwrap();

        let payload = b"{\"type\":3,\"invocationId\":\"1\"}\x1e";
        let mut expected = vec![0x81, 0xa4];
        expected.extend_from_slice(b"json");
        expected.extend_from_slice(&[0xc4, payload.len() as u8]);
        expected.extend_from_slice(payload);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_read_all_serialized_versions_restores_entries_without_message() {
        let original = cache();
        let protocols: Vec<Arc<dyn HubProtocol>> =
            vec![Arc::new(Counting::new("a")), Arc::new(Counting::new("b"))];
        let mut packed = Vec::new();
        original.write_all_serialized_versions(&protocols, &mut packed).unwrap();
        packed.push(0xff);

        let mut input: &[u8] = &packed;
        let restored = SerializationCache::read_all_serialized_versions(&mut input).unwrap();
        assert_eq!(input, [0xff]);
        assert!(restored.message().is_none());
        assert_eq!(restored.len(), 2);

        let fresh = Counting::new("a");
        assert_eq!(
            restored.get_serialized_message(&fresh).unwrap(),
            original.get_serialized_message(protocols[0].as_ref()).unwrap()
        );
        assert_eq!(fresh.writes(), 0);
    }

    #[test]
    fn test_get_serialized_message_restored_cache_unknown_protocol_fails() {
        let restored = SerializationCache::read_all_serialized_versions(&mut &[0x80][..]).unwrap();
        let err = restored
            .get_serialized_message(&JsonHubProtocol::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "This message was received from another server that did not have the requested protocol available."
        );
    }
}
