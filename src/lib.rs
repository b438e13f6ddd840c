pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod consts;
pub mod consumer;
pub mod dispatch;
pub mod events;
pub mod fetch;
pub mod generator;
pub mod job;
pub mod producer;
pub mod prompts;
pub mod queue;
pub mod sink;
pub mod store;
pub mod supervise;
pub mod telemetry;
