//! Test Fixtures Module
//!
//! This module provides test fixtures for WaaV Duplex testing:
//! - Audio fixtures (programmatically generated)
//! - Server event fixtures

// Allow dead code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]

pub mod audio_fixtures;
pub mod event_fixtures;

pub use audio_fixtures::*;
pub use event_fixtures::*;
