//! `phase-sir` library crate.
//!
//! A phase-dependent SIR-derived ODE engine: observed records are cut into
//! phases of constant parameters (S-R change points), each phase is fitted,
//! and named scenarios extend the fitted timeline into the future.
//!
//! The binary (`psir`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable (e.g., future services, notebooks, etc.)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod dynamics;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod report;
pub mod scenario;
pub mod segment;
pub mod sim;
