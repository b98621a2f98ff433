//! Expotion - plugin discovery and registration for a web application host

pub mod app;
pub mod config;
pub mod error;
pub mod plugins;

pub use app::Application;
pub use config::AppConfig;
pub use error::{ExpotionError, Result};
pub use plugins::{Plugin, PluginLoader};
