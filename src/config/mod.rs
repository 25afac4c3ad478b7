//! Fleet configuration.
//!
//! One aggregate [`FleetConfig`] with a sub-struct per component, loaded
//! from and saved to TOML. Every field has a default so a missing or empty
//! config file yields a working setup.

mod settings;

pub use settings::{
    FleetConfig, MonitorConfig, RecoveryConfig, SafetyConfig, SessionConfig,
};
