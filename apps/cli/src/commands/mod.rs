//! Command implementations for the JBSW CLI.

pub mod doctor;
pub mod list;
pub mod preview;
pub mod show_config;
pub mod train;
