//! Carrier API clients.
//!
//! Each carrier implements [`CarrierClient`] — pure API I/O, no pipeline
//! logic. The registry dispatches a shipment to the client matching its
//! parsed service code.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CarrierError;
use crate::parser::{CarrierKind, Shipment};

pub mod dhl;

pub use dhl::DhlClient;

/// Result of creating a shipment at a carrier.
#[derive(Debug, Clone)]
pub struct CreatedShipment {
    /// Carrier-side shipment id, used for document and pickup calls.
    pub shipment_id: String,
    /// Parcel tracking number for the customer.
    pub tracking_number: String,
}

/// Documents fetched for a created shipment. DHL always renders PDF.
#[derive(Debug, Clone)]
pub struct ShipmentDocuments {
    /// Shipping label.
    pub label: Vec<u8>,
    /// Shipment list / waybill, when the product provides one.
    pub shipment_list: Option<Vec<u8>>,
}

/// Trait all carrier clients implement.
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Which carrier this client talks to.
    fn kind(&self) -> CarrierKind;

    /// Create a shipment at the carrier.
    async fn create_shipment(&self, shipment: &Shipment) -> Result<CreatedShipment, CarrierError>;

    /// Fetch label and optional shipment list for a created shipment.
    async fn fetch_documents(&self, shipment_id: &str)
        -> Result<ShipmentDocuments, CarrierError>;

    /// Book a pickup for a created shipment.
    async fn request_pickup(
        &self,
        shipment_id: &str,
        pickup_date: &str,
    ) -> Result<(), CarrierError>;
}

/// Dispatches shipments to the client registered for their carrier.
#[derive(Default)]
pub struct CarrierRegistry {
    clients: Vec<Arc<dyn CarrierClient>>,
}

impl CarrierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn CarrierClient>) {
        self.clients.push(client);
    }

    /// Look up the client for a carrier. Parsed-but-unregistered carriers
    /// (e.g. `PN` before the PostNord client exists) are a terminal error.
    pub fn get(&self, kind: CarrierKind) -> Result<Arc<dyn CarrierClient>, CarrierError> {
        self.clients
            .iter()
            .find(|c| c.kind() == kind)
            .cloned()
            .ok_or_else(|| CarrierError::Unsupported {
                carrier: kind.code().to_string(),
            })
    }
}
