//! Core types for the Endocrine control loop

pub mod modulation;
pub mod signal;
