//! Register-level control of a PID heater module over Modbus RTU.
//!
//! The heater exposes its configuration as holding registers at fixed
//! addresses. This crate maps named operations onto those registers:
//!
//! ```text
//! HeaterController ──> registers (address + encoding) ──> RegisterTransport
//!                                                          ├─ RtuTransport (serial)
//!                                                          └─ RecordingTransport (tests, dry runs)
//! ```
//!
//! Every operation is a blocking sequence of transactions; nothing is
//! retried, cached or rolled back.

pub mod config;
pub mod controller;
pub mod mock;
pub mod reading;
pub mod registers;
pub mod rtu;
pub mod transport;

pub use controller::{AdaptiveDisablePolicy, FilterLevel, HeaterController, OutputMode, PidAction};
pub use transport::{RegisterTransport, TransportError};
