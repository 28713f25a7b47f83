//! Hardware-independent core library for skyvault
//!
//! This crate contains all platform-agnostic logic of the weather-station
//! display node: the persistent time-series vaults and their non-volatile
//! backup/restore protocol, time and solar utilities, sensor and renderer
//! trait definitions, UI navigation state and the long-lived station tasks.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod sensors;
pub mod solar;
pub mod storage;
pub mod sync;
pub mod tasks;
pub mod time;
pub mod ui;
