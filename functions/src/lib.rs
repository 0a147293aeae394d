// functions/src/lib.rs

pub mod config;
pub mod health;
pub mod listener;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod transform;
