// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Integration test runner.
//!
//! Cameras, detector and classifier are in-process fakes:
//!   cargo test --test integration

pub mod support;

mod detection_tests;
mod reconnect_tests;
mod registry_tests;
mod stream_tests;
