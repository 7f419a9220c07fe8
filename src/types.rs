use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::document::{
    array_field, boolean_field, integer_field, map_element, map_field, number_field, string_field,
    timestamp_field, Document,
};
use crate::error::{Error, Result};

/// Hardware family of a device, from the document's `type` tag.
///
/// The tag drives which telemetry channels a device is expected to carry.
/// Tags this library has not seen before decode as `Unknown` with no
/// expected channels, so new hardware never breaks decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    Node,
    ThermaData,
    Smoke,
    Rxf,
    Unknown(String),
}

impl DeviceKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "node" => DeviceKind::Node,
            "thermadata" => DeviceKind::ThermaData,
            "smoke" => DeviceKind::Smoke,
            "rxf" => DeviceKind::Rxf,
            _ => DeviceKind::Unknown(tag.to_string()),
        }
    }

    /// Channel numbers a device of this kind reports. The backend names
    /// channels with 1-based strings.
    pub fn expected_channels(&self) -> &'static [&'static str] {
        match self {
            DeviceKind::Node | DeviceKind::Smoke => &["1", "2"],
            DeviceKind::ThermaData => &["1", "2", "3", "4"],
            DeviceKind::Rxf => &["1"],
            DeviceKind::Unknown(_) => &[],
        }
    }
}

/// The authenticated user's account, a read-only snapshot at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub time_zone: Option<String>,
    /// Preferred display units as the backend reports them, e.g. "F".
    pub preferred_units: Option<String>,
    /// Serials of the account's devices, in the backend's stored order.
    pub device_serials: Vec<String>,
}

impl Account {
    pub(crate) fn from_document(document: &Document) -> Result<Self> {
        let fields = &document.fields;
        let uid = string_field(fields, "uid")
            .ok_or_else(|| Error::decode(document.path(), "uid"))?;

        Ok(Account {
            uid,
            display_name: string_field(fields, "displayName"),
            email: string_field(fields, "email"),
            time_zone: string_field(fields, "timeZone"),
            preferred_units: string_field(fields, "preferredUnits"),
            device_serials: device_serials(document),
        })
    }
}

/// The `deviceOrder` field maps each account id to an ordered array of
/// `{deviceId, order}` entries. Entry order within an account is preserved.
fn device_serials(document: &Document) -> Vec<String> {
    let mut serials = Vec::new();
    let Some(order_map) = map_field(&document.fields, "deviceOrder") else {
        return serials;
    };
    for account_id in order_map.keys() {
        let Some(entries) = array_field(order_map, account_id) else {
            continue;
        };
        for entry in entries {
            if let Some(entry_fields) = map_element(entry) {
                if let Some(serial) = string_field(entry_fields, "deviceId") {
                    serials.push(serial);
                }
            }
        }
    }
    serials
}

/// A wireless thermometer registered to the account.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub serial: String,
    pub kind: DeviceKind,
    /// Customer-assigned name for the device.
    pub label: Option<String>,
    pub firmware: Option<String>,
    /// Battery charge percentage.
    pub battery: Option<i64>,
    pub battery_state: Option<String>,
    /// Wi-Fi signal strength in dBm.
    pub wifi_strength: Option<i64>,
    pub display_units: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Last-known reading per channel. Seeded with an invalid placeholder
    /// for every channel the device kind is expected to carry.
    pub channels: BTreeMap<String, TelemetryReading>,
}

impl Device {
    pub(crate) fn from_document(document: &Document) -> Result<Self> {
        let fields = &document.fields;
        let serial = string_field(fields, "serial")
            .ok_or_else(|| Error::decode(document.path(), "serial"))?;
        let kind = string_field(fields, "type")
            .map(|tag| DeviceKind::from_tag(&tag))
            .ok_or_else(|| Error::decode(document.path(), "type"))?;

        let channels = kind
            .expected_channels()
            .iter()
            .map(|&channel| (channel.to_string(), TelemetryReading::missing(channel)))
            .collect();

        Ok(Device {
            serial,
            kind,
            label: string_field(fields, "label"),
            firmware: string_field(fields, "firmware"),
            battery: integer_field(fields, "battery"),
            battery_state: string_field(fields, "batteryState"),
            // The backend misspells this field; it is not a typo here.
            wifi_strength: integer_field(fields, "wifi_stength"),
            display_units: string_field(fields, "deviceDisplayUnits"),
            last_seen: timestamp_field(fields, "lastSeen"),
            channels,
        })
    }
}

/// High or low alarm configured on a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelAlarm {
    pub enabled: bool,
    pub alarming: bool,
    /// Threshold value in `units`.
    pub value: Option<f64>,
    pub units: Option<String>,
}

impl ChannelAlarm {
    fn from_fields(fields: &serde_json::Map<String, serde_json::Value>) -> Self {
        ChannelAlarm {
            enabled: boolean_field(fields, "enabled").unwrap_or(false),
            alarming: boolean_field(fields, "alarming").unwrap_or(false),
            value: number_field(fields, "value"),
            units: string_field(fields, "units"),
        }
    }
}

/// A single telemetry value from one channel.
///
/// `valid` is false when the backend reported the channel without a value,
/// typically meaning no probe is attached, or when the channel was
/// requested but absent from the response entirely.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReading {
    pub channel: String,
    pub value: Option<f64>,
    pub units: Option<String>,
    /// Customer-assigned name for the channel.
    pub label: Option<String>,
    /// Channel status as the backend reports it; "NORMAL" is the only
    /// observed value.
    pub status: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub valid: bool,
    pub alarm_high: Option<ChannelAlarm>,
    pub alarm_low: Option<ChannelAlarm>,
}

impl TelemetryReading {
    /// Placeholder for a channel with no data.
    pub(crate) fn missing(channel: &str) -> Self {
        TelemetryReading {
            channel: channel.to_string(),
            value: None,
            units: None,
            label: None,
            status: None,
            timestamp: None,
            valid: false,
            alarm_high: None,
            alarm_low: None,
        }
    }

    /// Decode a channel document. Never fails: a document without a value
    /// yields an invalid reading carrying whatever metadata was present.
    pub(crate) fn from_document(channel: &str, document: &Document) -> Self {
        let fields = &document.fields;
        let value = number_field(fields, "value");

        TelemetryReading {
            channel: channel.to_string(),
            valid: value.is_some(),
            value,
            units: string_field(fields, "units"),
            label: string_field(fields, "label"),
            status: string_field(fields, "status"),
            timestamp: timestamp_field(fields, "lastSeen")
                .or_else(|| timestamp_field(fields, "lastTelemetrySaved")),
            alarm_high: map_field(fields, "alarmHigh").map(ChannelAlarm::from_fields),
            alarm_low: map_field(fields, "alarmLow").map(ChannelAlarm::from_fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_from(json: &str) -> Document {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_device_kind_from_tag() {
        assert_eq!(DeviceKind::from_tag("node"), DeviceKind::Node);
        assert_eq!(DeviceKind::from_tag("NODE"), DeviceKind::Node);
        assert_eq!(DeviceKind::from_tag("thermadata"), DeviceKind::ThermaData);
        assert_eq!(DeviceKind::from_tag("smoke"), DeviceKind::Smoke);
        assert_eq!(DeviceKind::from_tag("rxf"), DeviceKind::Rxf);
        assert_eq!(
            DeviceKind::from_tag("signals"),
            DeviceKind::Unknown("signals".to_string())
        );
    }

    #[test]
    fn test_expected_channel_sets() {
        assert_eq!(DeviceKind::Node.expected_channels(), &["1", "2"]);
        assert_eq!(
            DeviceKind::ThermaData.expected_channels(),
            &["1", "2", "3", "4"]
        );
        assert_eq!(DeviceKind::Smoke.expected_channels(), &["1", "2"]);
        assert_eq!(DeviceKind::Rxf.expected_channels(), &["1"]);
        assert!(DeviceKind::Unknown("x".into())
            .expected_channels()
            .is_empty());
    }

    #[test]
    fn test_account_decodes_with_device_order() {
        let document = document_from(
            r#"{
                "name": "projects/p/databases/(default)/documents/users/user-1",
                "fields": {
                    "uid": {"stringValue": "user-1"},
                    "displayName": {"stringValue": "Pit Master"},
                    "email": {"stringValue": "cook@example.com"},
                    "timeZone": {"stringValue": "America/Denver"},
                    "preferredUnits": {"stringValue": "F"},
                    "deviceOrder": {"mapValue": {"fields": {
                        "account-1": {"arrayValue": {"values": [
                            {"mapValue": {"fields": {
                                "deviceId": {"stringValue": "NODE001"},
                                "order": {"integerValue": "0"}
                            }}},
                            {"mapValue": {"fields": {
                                "deviceId": {"stringValue": "SMOKE01"},
                                "order": {"integerValue": "1"}
                            }}}
                        ]}}
                    }}}
                }
            }"#,
        );

        let account = Account::from_document(&document).unwrap();
        assert_eq!(account.uid, "user-1");
        assert_eq!(account.display_name, Some("Pit Master".to_string()));
        assert_eq!(account.preferred_units, Some("F".to_string()));
        assert_eq!(account.device_serials, vec!["NODE001", "SMOKE01"]);
    }

    #[test]
    fn test_account_missing_uid_is_decode_error() {
        let document = document_from(
            r#"{
                "name": "projects/p/databases/(default)/documents/users/user-1",
                "fields": {"displayName": {"stringValue": "Pit Master"}}
            }"#,
        );
        match Account::from_document(&document) {
            Err(Error::Decode { endpoint, field }) => {
                assert_eq!(endpoint, "users/user-1");
                assert_eq!(field, "uid");
            }
            other => panic!("expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_account_without_device_order_has_no_serials() {
        let document = document_from(
            r#"{"fields": {"uid": {"stringValue": "user-1"}}}"#,
        );
        let account = Account::from_document(&document).unwrap();
        assert!(account.device_serials.is_empty());
    }

    #[test]
    fn test_device_decodes_with_placeholder_channels() {
        let document = document_from(
            r#"{
                "name": "projects/p/databases/(default)/documents/devices/NODE001",
                "fields": {
                    "serial": {"stringValue": "NODE001"},
                    "type": {"stringValue": "node"},
                    "label": {"stringValue": "Brisket Node"},
                    "firmware": {"stringValue": "2.1.7"},
                    "battery": {"integerValue": "82"},
                    "batteryState": {"stringValue": "NORMAL"},
                    "wifi_stength": {"integerValue": "-61"},
                    "deviceDisplayUnits": {"stringValue": "F"},
                    "lastSeen": {"timestampValue": "2023-04-01T10:00:00Z"}
                }
            }"#,
        );

        let device = Device::from_document(&document).unwrap();
        assert_eq!(device.serial, "NODE001");
        assert_eq!(device.kind, DeviceKind::Node);
        assert_eq!(device.label, Some("Brisket Node".to_string()));
        assert_eq!(device.battery, Some(82));
        assert_eq!(device.wifi_strength, Some(-61));
        // Both expected channels are present and invalid until readings arrive.
        assert_eq!(device.channels.len(), 2);
        assert!(!device.channels["1"].valid);
        assert!(!device.channels["2"].valid);
    }

    #[test]
    fn test_device_missing_serial_is_decode_error() {
        let document = document_from(
            r#"{
                "name": "projects/p/databases/(default)/documents/devices/NODE001",
                "fields": {"type": {"stringValue": "node"}}
            }"#,
        );
        match Device::from_document(&document) {
            Err(Error::Decode { endpoint, field }) => {
                assert_eq!(endpoint, "devices/NODE001");
                assert_eq!(field, "serial");
            }
            other => panic!("expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_device_missing_type_is_decode_error() {
        let document = document_from(
            r#"{"fields": {"serial": {"stringValue": "NODE001"}}}"#,
        );
        match Device::from_document(&document) {
            Err(Error::Decode { field, .. }) => assert_eq!(field, "type"),
            other => panic!("expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_device_kind_decodes_without_channels() {
        let document = document_from(
            r#"{
                "fields": {
                    "serial": {"stringValue": "NEW001"},
                    "type": {"stringValue": "signals"}
                }
            }"#,
        );
        let device = Device::from_document(&document).unwrap();
        assert_eq!(device.kind, DeviceKind::Unknown("signals".to_string()));
        assert!(device.channels.is_empty());
    }

    #[test]
    fn test_reading_decodes_value_and_alarms() {
        let document = document_from(
            r#"{
                "fields": {
                    "value": {"doubleValue": 225.7},
                    "units": {"stringValue": "F"},
                    "label": {"stringValue": "Pit"},
                    "status": {"stringValue": "NORMAL"},
                    "number": {"stringValue": "1"},
                    "lastSeen": {"timestampValue": "2023-04-01T10:00:00Z"},
                    "alarmHigh": {"mapValue": {"fields": {
                        "enabled": {"booleanValue": true},
                        "alarming": {"booleanValue": false},
                        "value": {"integerValue": "275"},
                        "units": {"stringValue": "F"}
                    }}},
                    "alarmLow": {"mapValue": {"fields": {
                        "enabled": {"booleanValue": false}
                    }}}
                }
            }"#,
        );

        let reading = TelemetryReading::from_document("1", &document);
        assert!(reading.valid);
        assert_eq!(reading.value, Some(225.7));
        assert_eq!(reading.units, Some("F".to_string()));
        assert_eq!(reading.label, Some("Pit".to_string()));
        assert_eq!(reading.status, Some("NORMAL".to_string()));
        assert!(reading.timestamp.is_some());

        let high = reading.alarm_high.unwrap();
        assert!(high.enabled);
        assert!(!high.alarming);
        assert_eq!(high.value, Some(275.0));
        assert_eq!(high.units, Some("F".to_string()));

        let low = reading.alarm_low.unwrap();
        assert!(!low.enabled);
        assert_eq!(low.value, None);
    }

    #[test]
    fn test_reading_without_value_is_invalid_not_an_error() {
        // No probe attached: the channel document exists but carries no value.
        let document = document_from(
            r#"{
                "fields": {
                    "units": {"stringValue": "F"},
                    "label": {"stringValue": "Ambient"},
                    "lastTelemetrySaved": {"timestampValue": "2023-04-01T09:55:00Z"}
                }
            }"#,
        );
        let reading = TelemetryReading::from_document("2", &document);
        assert!(!reading.valid);
        assert_eq!(reading.value, None);
        assert_eq!(reading.label, Some("Ambient".to_string()));
        assert_eq!(reading.status, None);
        assert!(reading.timestamp.is_some());
    }

    #[test]
    fn test_reading_accepts_integer_values() {
        // Whole-degree readings arrive as integerValue rather than doubleValue.
        let document = document_from(
            r#"{"fields": {"value": {"integerValue": "225"}, "units": {"stringValue": "F"}}}"#,
        );
        let reading = TelemetryReading::from_document("1", &document);
        assert!(reading.valid);
        assert_eq!(reading.value, Some(225.0));
    }
}
