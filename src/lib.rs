//! Homestream - home media streaming server
//!
//! This library crate exposes the core functionality for integration testing.

pub mod catalog;
pub mod config;
pub mod server;
pub mod streaming;
pub mod thumbnails;
