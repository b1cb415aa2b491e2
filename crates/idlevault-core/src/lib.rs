pub mod app;
pub mod archive;
pub mod config;
pub mod error;
pub mod host;
pub mod monitor;
pub mod pipeline;
pub mod platform;

#[cfg(test)]
mod testutil;
