// src/lib.rs
pub mod authorization;
pub mod bundler;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod creation;
pub mod distribution;
pub mod encoding;
pub mod error;
pub mod split;
pub mod sponsor;
pub mod types;
pub mod user_op;
