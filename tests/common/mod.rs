//! Shared test utilities for loop, chaos and integration tests.
//!
//! This module provides:
//! - MongoDB replica set testcontainer setup
//! - In-memory MockTarget recording every write
//! - ScriptedFeed and change event builders

#![allow(dead_code)]

pub mod containers;
pub mod mock_feed;
pub mod mock_target;

pub use containers::*;
pub use mock_feed::*;
pub use mock_target::*;
