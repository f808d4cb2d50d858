pub mod bar_utils;
pub mod bar_window;
pub mod config;
pub mod data_context;
pub mod error;
pub mod limit_up;
pub mod models;
pub mod param_utils;
pub mod run_status;
pub mod runner;
pub mod signals;
pub mod state_store;
pub mod strategy;

pub mod commands {
    pub mod export_market_data;
    pub mod market_data_snapshot;
    pub mod scan;
}
