//! Layered recorder configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (`~/.config/epi/recorder.toml`)
//! 3. Project config (`.epi/recorder.toml`)
//! 4. Programmatic overrides

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    user_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, PROJECT_CONFIG_PATH,
    USER_CONFIG_PATH,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    PackageSettings, RecorderConfig, RedactionSettings, SigningSettings, StoreBackend, StoreSettings,
};
