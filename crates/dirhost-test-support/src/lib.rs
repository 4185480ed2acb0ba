//! Test support utilities and fixtures for dirhost tests

pub mod fixtures;
pub mod mocks;
pub mod watch;

pub use fixtures::{blog_site, test_config, HangingApp, StaticApp};
pub use mocks::MockAppInstance;
pub use watch::RecordingWatchBackend;
