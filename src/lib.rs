//! SES Intake — institution registration survey bot.

pub mod access;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod form;
pub mod photos;
pub mod report;
pub mod store;
