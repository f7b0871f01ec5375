pub mod config;
pub mod demo;
pub mod downstream;
pub mod session;
pub mod state;
