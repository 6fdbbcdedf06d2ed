// Vigil: scheduled content moderation
//
// This is the library root. Each module corresponds to a major subsystem
// of the moderation pipeline.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod status;

#[cfg(feature = "web")]
pub mod web;
