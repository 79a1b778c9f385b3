//! # Triphase - automatic best-phase selector
//!
//! A Rust daemon for installations on unstable three-phase mains: it
//! continuously estimates the RMS voltage of all three incoming phases,
//! scores each for voltage quality and short-term stability, and keeps a
//! relay bank switched so that exactly one phase - the best one - feeds the
//! load at any time.
//!
//! ## Features
//!
//! - **RMS estimation**: burst sampling with DC-bias removal per phase
//! - **Quality scoring**: voltage/stability composite with hysteresis
//! - **Safety-gated switching**: interval lockout, under/overvoltage gates,
//!   strict break-before-make relay sequencing
//! - **Automatic and manual modes**: timer-driven selection or explicit
//!   operator control
//! - **Web Interface**: REST API, SSE event stream, and a small dashboard
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `hal`: Hardware boundary traits and the simulated backend
//! - `modbus`: Modbus TCP backend for the ADC front-end and relay board
//! - `phase`: Per-phase statistics and trend history
//! - `sampler`: Burst acquisition and RMS estimation
//! - `scorer`: Comparative phase quality scoring
//! - `switch`: Safety-gated relay switchover
//! - `driver`: Control loop and state ownership
//! - `web`: HTTP server and REST API

pub mod config;
pub mod driver;
pub mod error;
pub mod hal;
pub mod logging;
pub mod modbus;
pub mod phase;
pub mod sampler;
pub mod scorer;
pub mod switch;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use driver::PhaseDriver;
pub use error::{Result, TriphaseError};
