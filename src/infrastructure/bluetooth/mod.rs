//! Bluetooth Module
//!
//! Discovers the hotkey device, holds its GATT session and forwards every
//! notification to the input replayer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Command loop - owns watcher and session manager)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Watcher  │  │  Session   │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Registry│  │ - Connect  │  │ - UUIDs  │
//! │ - Stale   │  │ - Discover │  │ - Payload│
//! │   events  │  │ - CCCD     │  │   decode │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       ▼              ▼
//! ┌─────────────────────────────┐
//! │   Platform (BleStack, ...)   │
//! │   WinRT adapter on Windows   │
//! └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`platform`] - BLE stack traits the rest of the module is written against
//! - [`protocol`] - Target constants, payload decoding and hex formatting
//! - [`watcher`] - Device enumeration and the shared registry
//! - [`session`] - GATT session state machine
//! - [`pairing`] - One-shot pairing
//! - [`service`] - Main service coordinator

pub mod pairing;
pub mod platform;
pub mod protocol;
pub mod service;
pub mod session;
pub mod watcher;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
mod fake;

// Re-export main service for convenience
pub use service::{BluetoothService, ServiceOptions};
