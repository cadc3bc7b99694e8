pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod occupancy;
pub mod session;
pub mod state;
pub mod stream;
pub mod zone;
