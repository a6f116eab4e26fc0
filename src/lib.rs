pub mod auth;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod history;
pub mod jobs;
pub mod logging;
pub mod results;
