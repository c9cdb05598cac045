pub mod commands;
pub mod config;
pub mod evaluate;
pub mod inventory;
pub mod k8s;
pub mod manifest;
pub mod report;
pub mod requirements;
pub mod snapshot;
pub mod telemetry;
