pub mod app;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod listener;
pub mod metrics;
pub mod producer;
pub mod shutdown;
