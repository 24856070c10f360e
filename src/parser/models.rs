//! Domain model for shipments parsed from GARP export files.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

// ── Carrier ─────────────────────────────────────────────────────────

/// Carriers recognized in GARP service codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    Dhl,
    PostNord,
}

impl CarrierKind {
    /// Parse the carrier token of an srvid (`DHL`, `PN`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DHL" => Some(Self::Dhl),
            "PN" => Some(Self::PostNord),
            _ => None,
        }
    }

    /// The srvid token for this carrier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Dhl => "DHL",
            Self::PostNord => "PN",
        }
    }

    /// Human-readable carrier name for emails and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Dhl => "DHL",
            Self::PostNord => "PostNord",
        }
    }
}

impl std::fmt::Display for CarrierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ── Parsed shipment parts ───────────────────────────────────────────

/// Receiving party of a shipment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Receiver {
    /// GARP receiver id (`rcvid` attribute).
    pub rcvid: String,
    pub name: String,
    pub address1: String,
    pub address2: String,
    pub zipcode: String,
    pub city: String,
    pub country: String,
    pub phone: String,
    pub email: String,
    pub contact: String,
    pub sms: String,
}

/// One package / pallet in a shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Container kind from the `type` attribute (default `parcel`).
    pub container_type: String,
    /// Unit of the dimension fields (`measure` attribute).
    pub measure: String,
    /// Number of identical packages.
    pub copies: u32,
    /// GARP package code (e.g. `PKT`, `PC`, pallet codes).
    pub package_code: String,
    pub contents: String,
    /// Weight in kg.
    pub weight: f64,
    /// Volume in m³.
    pub volume: f64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            container_type: "parcel".to_string(),
            measure: String::new(),
            copies: 1,
            package_code: "PC".to_string(),
            contents: String::new(),
            weight: 0.0,
            volume: 0.0,
            length: 0.0,
            width: 0.0,
            height: 0.0,
        }
    }
}

/// Pickup booking request attached to a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingInfo {
    pub pickup_booking: bool,
    /// ISO date string (`YYYY-MM-DD`), empty if none given.
    pub pickup_date: String,
}

/// A notification option from the `<ufonline>` block.
///
/// `enot` requests a customer email with tracking information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationOption {
    pub opt_id: String,
    pub message: String,
}

/// Service selection parsed from the srvid attribute.
///
/// srvid format: `CARRIER:PRODUCT[:ADDON]`, e.g. `DHL:104`, `DHL:104:AVIS`,
/// `PN:19`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub carrier: CarrierKind,
    pub product_code: String,
    /// Optional addon token (third srvid segment), empty if none.
    pub addon: String,
    /// The raw srvid as it appeared in the file.
    pub raw_srvid: String,
    pub booking: Option<BookingInfo>,
}

impl ServiceInfo {
    /// Split an srvid into carrier, product code and addon.
    pub fn parse_srvid(srvid: &str) -> Result<(CarrierKind, String, String), ParseError> {
        let mut parts = srvid.split(':');
        let carrier_str = parts.next().unwrap_or("").trim().to_uppercase();
        let product = match parts.next() {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => {
                return Err(ParseError::InvalidSrvid {
                    srvid: srvid.to_string(),
                })
            }
        };
        let addon = parts.next().map(|a| a.trim().to_string()).unwrap_or_default();

        let carrier = CarrierKind::from_code(&carrier_str).ok_or(ParseError::UnknownCarrier {
            carrier: carrier_str,
            srvid: srvid.to_string(),
        })?;

        Ok((carrier, product, addon))
    }
}

/// One shipping request parsed from a GARP export file.
///
/// A single XML file may carry several shipments; a root-level receiver
/// is shared by shipments that do not declare their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    /// GARP order number (`orderno` attribute).
    pub order_no: String,
    pub sender_name: String,
    pub reference: String,
    pub term_code: String,
    pub delivery_instruction: String,
    pub service: ServiceInfo,
    pub receiver: Option<Receiver>,
    pub containers: Vec<Container>,
    pub notifications: Vec<NotificationOption>,
}

impl Shipment {
    /// Whether a notification option with the given id is present.
    pub fn has_notification(&self, opt_id: &str) -> bool {
        self.notifications.iter().any(|n| n.opt_id == opt_id)
    }

    /// Custom message of a notification option, if any.
    pub fn notification_message(&self, opt_id: &str) -> Option<&str> {
        self.notifications
            .iter()
            .find(|n| n.opt_id == opt_id)
            .map(|n| n.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srvid_plain() {
        let (carrier, product, addon) = ServiceInfo::parse_srvid("DHL:104").unwrap();
        assert_eq!(carrier, CarrierKind::Dhl);
        assert_eq!(product, "104");
        assert!(addon.is_empty());
    }

    #[test]
    fn srvid_with_addon() {
        let (carrier, product, addon) = ServiceInfo::parse_srvid("DHL:104:AVIS").unwrap();
        assert_eq!(carrier, CarrierKind::Dhl);
        assert_eq!(product, "104");
        assert_eq!(addon, "AVIS");
    }

    #[test]
    fn srvid_postnord() {
        let (carrier, product, _) = ServiceInfo::parse_srvid("PN:19").unwrap();
        assert_eq!(carrier, CarrierKind::PostNord);
        assert_eq!(product, "19");
    }

    #[test]
    fn srvid_lowercase_carrier_accepted() {
        let (carrier, _, _) = ServiceInfo::parse_srvid("dhl:102").unwrap();
        assert_eq!(carrier, CarrierKind::Dhl);
    }

    #[test]
    fn srvid_missing_product_rejected() {
        assert!(matches!(
            ServiceInfo::parse_srvid("DHL"),
            Err(ParseError::InvalidSrvid { .. })
        ));
        assert!(matches!(
            ServiceInfo::parse_srvid(""),
            Err(ParseError::InvalidSrvid { .. })
        ));
    }

    #[test]
    fn srvid_unknown_carrier_rejected() {
        let err = ServiceInfo::parse_srvid("UPS:55").unwrap_err();
        match err {
            ParseError::UnknownCarrier { carrier, srvid } => {
                assert_eq!(carrier, "UPS");
                assert_eq!(srvid, "UPS:55");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn notification_lookup() {
        let shipment = Shipment {
            order_no: "1".into(),
            sender_name: String::new(),
            reference: String::new(),
            term_code: String::new(),
            delivery_instruction: String::new(),
            service: ServiceInfo {
                carrier: CarrierKind::Dhl,
                product_code: "102".into(),
                addon: String::new(),
                raw_srvid: "DHL:102".into(),
                booking: None,
            },
            receiver: None,
            containers: vec![],
            notifications: vec![NotificationOption {
                opt_id: "enot".into(),
                message: "Thanks!".into(),
            }],
        };
        assert!(shipment.has_notification("enot"));
        assert!(!shipment.has_notification("sms"));
        assert_eq!(shipment.notification_message("enot"), Some("Thanks!"));
    }
}
