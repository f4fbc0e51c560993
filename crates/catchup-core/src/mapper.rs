//! Registry from event-type discriminant to decoder.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::MapperError;
use crate::stream::StreamEvent;

type DecodeFn<E> = Box<dyn Fn(&[u8]) -> Result<E, serde_json::Error> + Send + Sync>;

/// Maps an `event_type` string to the decoder for that type.
///
/// Build one per process at startup, then share it behind an `Arc`.
pub struct EventMapper<E> {
    decoders: HashMap<String, DecodeFn<E>>,
}

impl<E> EventMapper<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `decode` for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::AlreadyRegistered` if the type already has a decoder.
    pub fn register_mapper<F>(
        &mut self,
        event_type: impl Into<String>,
        decode: F,
    ) -> Result<(), MapperError>
    where
        F: Fn(&[u8]) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        if self.decoders.contains_key(&event_type) {
            return Err(MapperError::AlreadyRegistered(event_type));
        }
        self.decoders.insert(event_type, Box::new(decode));
        Ok(())
    }

    /// Registers a JSON decoder into `T`, converted into `E`.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::AlreadyRegistered` if the type already has a decoder.
    pub fn register_json<T>(&mut self, event_type: impl Into<String>) -> Result<(), MapperError>
    where
        T: DeserializeOwned + Into<E>,
    {
        self.register_mapper(event_type, |bytes| {
            serde_json::from_slice::<T>(bytes).map(Into::into)
        })
    }

    /// Decodes `bytes` with the decoder registered for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Unregistered` for unknown types and
    /// `MapperError::Decode` when the payload does not decode.
    pub fn map(&self, event_type: &str, bytes: &[u8]) -> Result<E, MapperError> {
        let decode = self
            .decoders
            .get(event_type)
            .ok_or_else(|| MapperError::Unregistered(event_type.to_owned()))?;
        decode(bytes).map_err(|source| MapperError::Decode {
            event_type: event_type.to_owned(),
            source,
        })
    }

    /// Decodes a persisted event's payload.
    ///
    /// # Errors
    ///
    /// Same as [`EventMapper::map`].
    pub fn map_stream_event(&self, event: &StreamEvent) -> Result<E, MapperError> {
        let bytes = serde_json::to_vec(&event.payload).map_err(|source| MapperError::Decode {
            event_type: event.event_type.clone(),
            source,
        })?;
        self.map(&event.event_type, &bytes)
    }

    /// Returns `true` if `event_type` has a decoder.
    #[must_use]
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Returns every registered event type, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.decoders.keys().cloned().collect();
        types.sort();
        types
    }
}

impl<E> Default for EventMapper<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventMapper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMapper")
            .field("event_types", &self.event_types())
            .finish()
    }
}
