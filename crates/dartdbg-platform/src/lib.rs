pub mod error;
pub mod paths;
pub mod sdk;

pub use error::PlatformError;
pub use paths::{DefaultPaths, PlatformPaths};
pub use sdk::{find_dart_sdk, pub_cache_dir, DartSdk};
