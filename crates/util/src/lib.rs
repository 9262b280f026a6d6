//! Configuration and text utilities shared by the viewer crates.

pub mod config;
pub mod text;

pub use config::{API_BASE_ENV, CONFIG_PATH_ENV, ConfigError, DEFAULT_API_BASE, ViewerConfig, default_config_path, expand_tilde};
pub use text::{bracketed_list, display_value, linkify};
