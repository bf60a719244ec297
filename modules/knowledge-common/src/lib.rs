pub mod config;
pub mod error;
pub mod platform;
pub mod types;

pub use config::{RenderBackend, Settings};
pub use error::{ErrorKind, IngestError};
pub use platform::{profile_for, Platform, PlatformProfile, ReadinessRule, RemediationCategory, WaitUntil};
pub use types::*;
