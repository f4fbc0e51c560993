//! Shared test doubles and fixtures for the catch-up event substrate.

mod clock;
mod events;
mod store;

pub use clock::FixedClock;
pub use events::{
    MOCK_EVENT_TYPE, MOCK_STREAM_ID, MOCK_STREAM_TYPE, MockEvent, mock_event, mock_event_at,
    mock_mapper, mock_stream_event, mock_stream_key,
};
pub use store::{FailingEventPublisher, FailingEventStore, RecordingEventPublisher};
