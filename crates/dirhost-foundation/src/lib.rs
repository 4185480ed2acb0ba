//! Foundation types shared by every dirhost crate
//!
//! Holds the host-wide error type and the path normalization rules that
//! turn filesystem paths into cache keys.

pub mod error;
pub mod path;

pub use error::{HostError, HostResult};
pub use path::{containing_directory, is_within, normalize_path, resolve_against};
