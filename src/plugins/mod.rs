//! Conversion phases and the commands built on top of them.

pub mod admin;
pub mod classifier;
pub mod converter;
pub mod doctor;
pub mod reconciler;
pub mod state_saver;
pub mod stripper;
