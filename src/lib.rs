//! Streamforge - convert media to streamable MP4 with lossless audio
//!
//! This library crate exposes the application layer (configuration, storage
//! and the end-to-end processor) for the binary and integration tests. The
//! process orchestration itself lives in `streamforge-av`.

pub mod config;
pub mod processor;
pub mod storage;
