pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod groups;
pub mod incidents;
pub mod logging;
pub mod models;
pub mod report;
pub mod store;
pub mod threshold;
pub mod window;
