// Hangar 引擎库入口
pub mod ai;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod rules;
pub mod server;
pub mod subscription;
pub mod utils;
pub mod version;

pub use error::{HangarError, Result};
