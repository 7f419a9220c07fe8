//! Client library for the ThermoWorks Cloud service.
//!
//! Authenticates against the vendor's Firebase-backed API, keeps the
//! session's token fresh across concurrent requests, and decodes the
//! backend's document payloads into typed accounts, devices, and telemetry
//! readings.
//!
//! ```no_run
//! use thermoworks_cloud::{Credential, ThermoworksClient};
//!
//! # async fn run() -> thermoworks_cloud::Result<()> {
//! let client = ThermoworksClient::new(Credential::new("cook@example.com", "secret"));
//! client.login().await?;
//! for device in client.list_devices().await? {
//!     println!("{}: {:?}", device.serial, device.channels);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod types;

pub use auth::{AuthToken, Credential, Session, SessionState, TokenStore};
pub use client::ThermoworksClient;
pub use config::ClientConfig;
pub use document::Document;
pub use error::{Error, RejectionReason, Result};
pub use types::{Account, ChannelAlarm, Device, DeviceKind, TelemetryReading};
