pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{ForgeError, Result};
