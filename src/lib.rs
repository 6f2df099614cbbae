//! wa-courier — durable file-queue worker delivering messages through a
//! single automated WhatsApp Web session.

pub mod actuator;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod queue;
pub mod session;
pub mod task;
pub mod worker;
