//! Terminal client for a binary YES/NO freight price prediction market.

pub mod app;
pub mod backend;
pub mod chain;
pub mod config;
pub mod deployment;
pub mod error;
pub mod market;
pub mod session;
pub mod ui;
pub mod units;
pub mod view;
pub mod wallets;
pub mod watcher;
