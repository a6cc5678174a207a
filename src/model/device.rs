//! # Device Identity
//!
//! Read-mostly view of the device registry's manufacturing record and
//! provisioning lifecycle state. This crate only reads device identities
//! and requests state transitions; the registry owns them.

use serde::{Deserialize, Serialize};

/// Manufacturing/provisioning lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceLifecycleState {
    Provisioned,
    ProvisionedAlive,
    ReadyToActivate,
    Active,
    Stolen,
    Faulty,
    Dummy,
}

impl DeviceLifecycleState {
    /// Returns the string representation used in logs and error details.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceLifecycleState::Provisioned => "PROVISIONED",
            DeviceLifecycleState::ProvisionedAlive => "PROVISIONED_ALIVE",
            DeviceLifecycleState::ReadyToActivate => "READY_TO_ACTIVATE",
            DeviceLifecycleState::Active => "ACTIVE",
            DeviceLifecycleState::Stolen => "STOLEN",
            DeviceLifecycleState::Faulty => "FAULTY",
            DeviceLifecycleState::Dummy => "DUMMY",
        }
    }

    /// States a fresh association may start from.
    pub fn is_associable(&self) -> bool {
        matches!(
            self,
            DeviceLifecycleState::Provisioned | DeviceLifecycleState::ProvisionedAlive
        )
    }

    /// States that make a device eligible as the defective side of a
    /// replacement.
    pub fn is_defective(&self) -> bool {
        matches!(
            self,
            DeviceLifecycleState::Stolen | DeviceLifecycleState::Faulty
        )
    }
}

impl std::fmt::Display for DeviceLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable device identity record as held by the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_data_ref: Option<String>,
    pub state: DeviceLifecycleState,
}

impl DeviceIdentity {
    /// Minimal identity for a freshly provisioned device.
    pub fn provisioned(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            imei: None,
            bssid: None,
            iccid: None,
            imsi: None,
            factory_data_ref: None,
            state: DeviceLifecycleState::Provisioned,
        }
    }

    /// Builder-style IMEI setter.
    pub fn with_imei(mut self, imei: impl Into<String>) -> Self {
        self.imei = Some(imei.into());
        self
    }

    /// Builder-style BSSID setter.
    pub fn with_bssid(mut self, bssid: impl Into<String>) -> Self {
        self.bssid = Some(bssid.into());
        self
    }

    /// Builder-style state setter.
    pub fn with_state(mut self, state: DeviceLifecycleState) -> Self {
        self.state = state;
        self
    }

    /// Builder-style factory-data reference setter.
    pub fn with_factory_data_ref(mut self, factory_ref: impl Into<String>) -> Self {
        self.factory_data_ref = Some(factory_ref.into());
        self
    }
}

/// Selector identifying a device by one or more of its identifiers.
///
/// Mutating operations require at least one field; the selector must
/// resolve to exactly one device identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
}

impl DeviceSelector {
    /// Select by serial number.
    pub fn by_serial(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: Some(serial_number.into()),
            ..Self::default()
        }
    }

    /// Select by IMEI.
    pub fn by_imei(imei: impl Into<String>) -> Self {
        Self {
            imei: Some(imei.into()),
            ..Self::default()
        }
    }

    /// Select by BSSID.
    pub fn by_bssid(bssid: impl Into<String>) -> Self {
        Self {
            bssid: Some(bssid.into()),
            ..Self::default()
        }
    }

    /// True when no identifying field is present.
    pub fn is_empty(&self) -> bool {
        self.serial_number.is_none() && self.imei.is_none() && self.bssid.is_none()
    }

    /// Whether every present field of the selector matches the identity.
    pub fn matches(&self, device: &DeviceIdentity) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(ref sn) = self.serial_number {
            if *sn != device.serial_number {
                return false;
            }
        }
        if let Some(ref imei) = self.imei {
            if device.imei.as_deref() != Some(imei.as_str()) {
                return false;
            }
        }
        if let Some(ref bssid) = self.bssid {
            if device.bssid.as_deref() != Some(bssid.as_str()) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref sn) = self.serial_number {
            parts.push(format!("serial={}", sn));
        }
        if let Some(ref imei) = self.imei {
            parts.push(format!("imei={}", imei));
        }
        if let Some(ref bssid) = self.bssid {
            parts.push(format!("bssid={}", bssid));
        }
        if parts.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}
