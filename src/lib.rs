//! TradeGuard Strategy & Risk Engine Library
//!
//! Indicator-driven signal generation, portfolio risk monitoring and a
//! per-user automated trading loop for equities, exposed over HTTP.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
