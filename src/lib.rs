pub mod bus;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod logging;
pub mod monitoring;
pub mod pipeline;
pub mod review;
pub mod taskcluster;
pub mod web;

#[cfg(test)]
mod testing;
