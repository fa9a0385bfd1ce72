pub mod address;
pub mod chain;
pub mod config;
pub mod deploy_config;
pub mod errors;
pub mod orchestrator;
pub mod plan;
pub mod ui;
pub mod verify;

#[cfg(test)]
pub(crate) mod http_stub;
