pub mod compose;
pub mod config;
pub mod cors;
pub mod error;
pub mod handler;
pub mod relay;
pub mod response;
pub mod secrets;
pub mod submission;
