//! Mock providers for engine and protocol tests
//!
//! - [`memory_device`]: in-memory duplex audio device with a scripted microphone
//! - [`session_mock`]: in-memory realtime session; the test plays the server
//! - [`websocket_mock`]: loopback WebSocket server speaking the realtime protocol

// Allow dead code in test infrastructure - not every test binary uses every mock
#![allow(dead_code)]

pub mod memory_device;
pub mod session_mock;
pub mod websocket_mock;

pub use memory_device::MemoryAudioDevice;
pub use session_mock::{MockSession, OutboundLog};
pub use websocket_mock::{MockAction, RealtimeMockServer};
