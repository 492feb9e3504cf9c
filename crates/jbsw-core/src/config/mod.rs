//! Configuration management.

pub mod finetune_config;

pub use finetune_config::{
    ConfigError, ConfigResult, DeviceConfig, FinetuneConfig, PathsConfig, CONFIG_ENV_VAR,
    DEFAULT_CONFIG_FILE,
};
