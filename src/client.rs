use log::debug;
use reqwest::Method;
use std::collections::BTreeMap;

use crate::auth::{AuthToken, Credential, Session};
use crate::config::ClientConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{Account, Device, TelemetryReading};

/// Client for the ThermoWorks Cloud service.
///
/// One method per backend operation. All methods take `&self`; the client
/// is cheap to clone and clones share one session, so concurrent calls
/// share a single token.
#[derive(Clone)]
pub struct ThermoworksClient {
    session: Session,
}

impl ThermoworksClient {
    pub fn new(credential: Credential) -> Self {
        Self::with_config(credential, ClientConfig::default())
    }

    pub fn with_config(credential: Credential, config: ClientConfig) -> Self {
        Self {
            session: Session::new(credential, config),
        }
    }

    /// The underlying session, for observing auth state or restoring a
    /// persisted token.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sign in with the credential supplied at construction.
    pub async fn login(&self) -> Result<()> {
        self.session.login().await
    }

    /// Resume a session from a previously issued token without sending
    /// the password again.
    pub fn restore(&self, token: AuthToken) {
        self.session.restore(token)
    }

    /// Fetch the signed-in user's account.
    pub async fn get_account(&self) -> Result<Account> {
        let user_id = self.session.user_id()?;
        debug!("Fetching account for user {}", user_id);
        let document = self.get_document(&format!("users/{user_id}")).await?;
        Account::from_document(&document)
    }

    /// Fetch every device on the account, in the account's stored order.
    ///
    /// The backend has no bulk device endpoint; the account document is
    /// the source of truth for which devices exist.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let account = self.get_account().await?;
        debug!("Account lists {} devices", account.device_serials.len());

        let mut devices = Vec::with_capacity(account.device_serials.len());
        for serial in &account.device_serials {
            devices.push(self.get_device(serial).await?);
        }
        Ok(devices)
    }

    /// Fetch one device by serial, including last-known readings for every
    /// channel its kind is expected to carry.
    pub async fn get_device(&self, serial: &str) -> Result<Device> {
        debug!("Fetching device {}", serial);
        let document = self.get_document(&format!("devices/{serial}")).await?;
        let mut device = Device::from_document(&document)?;

        for channel in device.kind.expected_channels() {
            // A channel the backend has never stored keeps its invalid
            // placeholder from the decode.
            if let Some(reading) = self.fetch_channel(serial, channel).await? {
                device.channels.insert(channel.to_string(), reading);
            }
        }
        Ok(device)
    }

    /// Fetch readings for the requested channels of a device.
    ///
    /// Every requested channel appears in the result: channels the backend
    /// does not have, or that carry no value, map to invalid readings, so
    /// "no data yet" is distinguishable from a channel never asked for.
    pub async fn get_telemetry(
        &self,
        serial: &str,
        channels: &[&str],
    ) -> Result<BTreeMap<String, TelemetryReading>> {
        debug!("Fetching {} channels for device {}", channels.len(), serial);

        let mut readings = BTreeMap::new();
        for &channel in channels {
            let reading = match self.fetch_channel(serial, channel).await? {
                Some(reading) => reading,
                None => TelemetryReading::missing(channel),
            };
            readings.insert(channel.to_string(), reading);
        }
        Ok(readings)
    }

    async fn fetch_channel(
        &self,
        serial: &str,
        channel: &str,
    ) -> Result<Option<TelemetryReading>> {
        let path = format!("devices/{serial}/channels/{channel}");
        match self.get_document(&path).await {
            Ok(document) => Ok(Some(TelemetryReading::from_document(channel, &document))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// GET one document from the data plane, mapping 404 to `NotFound` and
    /// any other non-success status to `Api`. Auth expiry never reaches
    /// here; the session retries it once internally.
    async fn get_document(&self, path: &str) -> Result<Document> {
        let response = self.session.request(Method::GET, path).await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            Error::UnexpectedResponse(format!("invalid document from {path}: {e}"))
        })
    }
}
