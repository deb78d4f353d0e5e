pub mod classifier;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod model;
pub mod monitor;
pub mod ratio;
pub mod report;
pub mod window;
