//! DHL Freight API Farm client.
//!
//! Talks to three of the farm's APIs, all rooted at the configured base URL
//! and authenticated with a `client-key` header:
//!
//! - TransportInstruction — create a shipment (IFTMIN)
//! - Print — render label / shipment list as PDF
//! - PickupRequest — book a pickup (IFTMBF)
//!
//! The TransportInstruction response is cached per shipment id because the
//! Print API wants the full TI object back, not just the id.
//!
//! Reference: DHL Produktmanual v5.23.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::carriers::{CarrierClient, CreatedShipment, ShipmentDocuments};
use crate::config::{DhlConfig, SenderConfig};
use crate::error::CarrierError;
use crate::parser::{CarrierKind, Shipment};

const CARRIER: &str = "DHL";

const TRANSPORT_INSTRUCTION_PATH: &str =
    "/transportinstructionapi/v1/transportinstruction/sendtransportinstruction";
const PRINT_DOCUMENTS_PATH: &str = "/printapi/v1/print/printdocuments";
const PRINT_BY_ID_PATH: &str = "/printapi/v1/print/printdocumentsbyid";
const PICKUP_REQUEST_PATH: &str = "/pickuprequestapi/v1/pickuprequest/pickuprequest";

/// Map an srvid addon token to the DHL additional-service flag.
///
/// Known flags pass through unchanged (notification, preAdviceDelivery,
/// tailLiftUnloading, tailLiftLoading, indoorDelivery, dangerousGoods,
/// insurance, collectionAtTerminal, nonStackable); GARP's legacy `AVIS`
/// token means notification.
fn addon_service_code(addon: &str) -> &str {
    match addon {
        "AVIS" => "notification",
        other => other,
    }
}

/// Default package type per product code when GARP gives none.
/// 210 (pallet) ships on EUR pallets; everything else is a standard parcel.
fn default_package_type(product_code: &str) -> &'static str {
    match product_code {
        "210" => "701",
        _ => "PKT",
    }
}

/// Strip a country prefix from a postal code.
///
/// GARP can export codes like `DK-5220`; the DHL API wants `5220`.
pub fn clean_postal_code(zipcode: &str) -> String {
    let cleaned = zipcode.trim();
    let bytes = cleaned.as_bytes();
    if bytes.len() > 3
        && bytes[2] == b'-'
        && bytes[0].is_ascii_alphabetic()
        && bytes[1].is_ascii_alphabetic()
    {
        cleaned[3..].to_string()
    } else {
        cleaned.to_string()
    }
}

fn transient(reason: impl std::fmt::Display) -> CarrierError {
    CarrierError::Transient {
        carrier: CARRIER.to_string(),
        reason: reason.to_string(),
    }
}

fn protocol(reason: impl std::fmt::Display) -> CarrierError {
    CarrierError::Protocol {
        carrier: CARRIER.to_string(),
        reason: reason.to_string(),
    }
}

/// Classify a non-success HTTP status into the retry taxonomy.
fn classify_status(status: u16, body: &str) -> CarrierError {
    let snippet: String = body.chars().take(300).collect();
    let message = format!("status {status}: {snippet}");
    match status {
        401 | 403 => CarrierError::Auth {
            carrier: CARRIER.to_string(),
            reason: message,
        },
        408 | 429 => transient(message),
        s if s >= 500 => transient(message),
        _ => CarrierError::Validation {
            carrier: CARRIER.to_string(),
            message,
        },
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Tracking number lives in `pieces[0].id[0]`, with `barcodeId` as the
/// legacy fallback.
fn extract_tracking(ti: &Value) -> String {
    let Some(first) = ti.get("pieces").and_then(Value::as_array).and_then(|p| p.first()) else {
        return String::new();
    };
    if let Some(id) = first
        .get("id")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .map(value_to_string)
        .filter(|s| !s.is_empty())
    {
        return id;
    }
    first.get("barcodeId").map(value_to_string).unwrap_or_default()
}

/// Pull one document of the given report type out of a Print API response.
fn extract_report(data: &Value, doc_type: &str) -> Option<Vec<u8>> {
    let reports = data.get("reports")?.as_array()?;
    let report = reports.iter().find(|r| {
        r.get("type").and_then(Value::as_str) == Some(doc_type)
    })?;
    let content = report.get("content")?.as_str()?;
    BASE64.decode(content).ok()
}

/// Pull the label out of a Print API JSON response: prefer the report with
/// `type == "Label"`, fall back to the first report.
fn extract_label(data: &Value) -> Result<Vec<u8>, CarrierError> {
    let reports = data
        .get("reports")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| protocol("print response carried no reports"))?;

    let report = reports
        .iter()
        .find(|r| r.get("type").and_then(Value::as_str) == Some("Label"))
        .unwrap_or(&reports[0]);

    let content = report
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| protocol("label report has empty content"))?;

    BASE64
        .decode(content)
        .map_err(|e| protocol(format!("label content is not valid base64: {e}")))
}

/// A Print API response body: either raw PDF bytes or a JSON report list.
enum PrintResponse {
    Binary(Vec<u8>),
    Reports(Value),
}

/// Build the TransportInstruction payload for a shipment.
///
/// Shape verified against the DHL sandbox: party addresses are nested
/// objects, `references` is a string array, `additionalServices` maps flag
/// names to booleans, and `pieces[].id` is a string array.
fn build_transport_instruction(
    sender: &SenderConfig,
    shipment: &Shipment,
) -> Result<Value, CarrierError> {
    let recv = shipment.receiver.as_ref().ok_or_else(|| CarrierError::Validation {
        carrier: CARRIER.to_string(),
        message: format!("order {}: shipment has no receiver", shipment.order_no),
    })?;
    let container = shipment.containers.first();
    let product_code = &shipment.service.product_code;

    let weight = container.map(|c| c.weight).unwrap_or(1.0);
    // DHL rejects a volume of zero.
    let mut volume = container.map(|c| c.volume).unwrap_or(0.001);
    if volume <= 0.0 {
        volume = 0.001;
    }
    let copies = container.map(|c| c.copies).unwrap_or(1);

    let shipping_date = shipment
        .service
        .booking
        .as_ref()
        .map(|b| b.pickup_date.clone())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| chrono::Local::now().date_naive().to_string());

    let sender_country = if sender.country.is_empty() {
        "SE"
    } else {
        sender.country.as_str()
    };

    let references: Vec<&str> = if shipment.reference.is_empty() {
        vec![]
    } else {
        vec![shipment.reference.as_str()]
    };

    let parties = json!([
        {
            "id": sender.customer_number_dhl,
            "type": "Consignor",
            "name": sender.name,
            "references": references,
            "address": {
                "street": sender.address1,
                "cityName": sender.city,
                "postalCode": clean_postal_code(&sender.zipcode),
                "countryCode": sender_country,
            },
            "phone": sender.phone,
            "email": sender.email,
        },
        {
            "type": "Consignee",
            "name": recv.name,
            "references": [],
            "address": {
                "street": recv.address1,
                "cityName": recv.city,
                "postalCode": clean_postal_code(&recv.zipcode),
                "countryCode": recv.country,
            },
            "phone": recv.phone,
            "email": recv.email,
        },
    ]);

    let package_type = match container {
        Some(c) if !c.package_code.is_empty() => c.package_code.clone(),
        _ => default_package_type(product_code).to_string(),
    };

    let mut piece = json!({
        "id": [""],
        "packageType": package_type,
        "numberOfPieces": copies,
        "weight": weight,
        "volume": volume,
    });
    if let Some(c) = container {
        if c.length > 0.0 {
            piece["length"] = json!(c.length);
        }
        if c.width > 0.0 {
            piece["width"] = json!(c.width);
        }
        if c.height > 0.0 {
            piece["height"] = json!(c.height);
        }
    }

    let mut additional_services = serde_json::Map::new();
    if !shipment.service.addon.is_empty() {
        let code = addon_service_code(&shipment.service.addon);
        additional_services.insert(code.to_string(), json!(true));
    }

    Ok(json!({
        "id": "",
        "productCode": product_code,
        "shippingDate": shipping_date,
        "deliveryInstruction": shipment.delivery_instruction,
        "pickupInstruction": "",
        "totalNumberOfPieces": copies,
        "totalWeight": weight,
        "totalVolume": volume,
        "payerCode": {
            // 1 = Consignor pays.
            "code": "1",
            "location": "",
        },
        "parties": parties,
        "additionalServices": additional_services,
        "pieces": [piece],
    }))
}

/// Client for the DHL Freight API Farm.
pub struct DhlClient {
    config: DhlConfig,
    sender: SenderConfig,
    base_url: String,
    client: reqwest::Client,
    /// TransportInstruction responses by shipment id — the Print API wants
    /// the full TI object back.
    ti_cache: RwLock<HashMap<String, Value>>,
}

impl DhlClient {
    pub fn new(config: DhlConfig, sender: SenderConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(config.timeout())
            .build()
            .expect("failed to build HTTP client");
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            config,
            sender,
            base_url,
            client,
            ti_cache: RwLock::new(HashMap::new()),
        }
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<reqwest::Response, CarrierError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("client-key", self.config.api_key.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, CarrierError> {
        let response = self.post(path, payload).await?;
        response
            .json()
            .await
            .map_err(|e| protocol(format!("invalid JSON response: {e}")))
    }

    async fn post_print(&self, path: &str, payload: &Value) -> Result<PrintResponse, CarrierError> {
        let response = self.post(path, payload).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("json") {
            let data = response
                .json()
                .await
                .map_err(|e| protocol(format!("invalid JSON response: {e}")))?;
            return Ok(PrintResponse::Reports(data));
        }

        // Direct binary PDF, or an unknown content type we pass through.
        if !content_type.contains("application/pdf")
            && !content_type.contains("application/octet-stream")
        {
            warn!(%content_type, "DHL print API returned unexpected content type");
        }
        let bytes = response.bytes().await.map_err(transient)?;
        Ok(PrintResponse::Binary(bytes.to_vec()))
    }

    /// Render the label from the full cached TI object.
    async fn print_documents(&self, ti: &Value) -> Result<Vec<u8>, CarrierError> {
        let payload = json!({ "shipment": ti, "options": { "label": true } });
        match self.post_print(PRINT_DOCUMENTS_PATH, &payload).await? {
            PrintResponse::Binary(bytes) => Ok(bytes),
            PrintResponse::Reports(data) => extract_label(&data),
        }
    }

    /// Render the label by TI id — fallback when the TI object is gone.
    async fn print_documents_by_id(&self, shipment_id: &str) -> Result<Vec<u8>, CarrierError> {
        let payload = json!({
            "transportInstructionId": shipment_id,
            "options": { "label": true },
        });
        match self.post_print(PRINT_BY_ID_PATH, &payload).await? {
            PrintResponse::Binary(bytes) => Ok(bytes),
            PrintResponse::Reports(data) => extract_label(&data),
        }
    }

    async fn fetch_shipment_list(&self, ti: &Value) -> Option<Vec<u8>> {
        let payload = json!({ "shipment": ti, "options": { "shipmentList": true } });
        match self.post_print(PRINT_DOCUMENTS_PATH, &payload).await {
            Ok(PrintResponse::Reports(data)) => extract_report(&data, "ShipmentList"),
            Ok(PrintResponse::Binary(_)) => None,
            Err(e) => {
                debug!("DHL: no shipment list available: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl CarrierClient for DhlClient {
    fn kind(&self) -> CarrierKind {
        CarrierKind::Dhl
    }

    async fn create_shipment(&self, shipment: &Shipment) -> Result<CreatedShipment, CarrierError> {
        let payload = build_transport_instruction(&self.sender, shipment)?;
        info!(
            order_no = %shipment.order_no,
            product = %shipment.service.product_code,
            "DHL: creating shipment"
        );
        debug!(payload = %payload, "DHL: transport instruction payload");

        let data = self.post_json(TRANSPORT_INSTRUCTION_PATH, &payload).await?;

        // The TI may come wrapped in {"transportInstruction": {...}}.
        let ti = match data {
            Value::Object(mut obj) => match obj.remove("transportInstruction") {
                Some(inner) => inner,
                None => Value::Object(obj),
            },
            other => other,
        };

        let shipment_id = ti.get("id").map(value_to_string).unwrap_or_default();
        if shipment_id.is_empty() {
            return Err(protocol("response carried no transport instruction id"));
        }
        let tracking_number = extract_tracking(&ti);

        self.ti_cache
            .write()
            .await
            .insert(shipment_id.clone(), ti);

        info!(
            shipment_id = %shipment_id,
            tracking = %tracking_number,
            "DHL: shipment created"
        );

        Ok(CreatedShipment {
            shipment_id,
            tracking_number,
        })
    }

    async fn fetch_documents(
        &self,
        shipment_id: &str,
    ) -> Result<ShipmentDocuments, CarrierError> {
        info!(shipment_id, "DHL: fetching documents");

        let ti = self.ti_cache.read().await.get(shipment_id).cloned();

        let label = match &ti {
            Some(ti_data) => match self.print_documents(ti_data).await {
                Ok(label) => label,
                Err(e) => {
                    warn!("DHL: printdocuments failed, falling back to by-id: {e}");
                    self.print_documents_by_id(shipment_id).await?
                }
            },
            None => self.print_documents_by_id(shipment_id).await?,
        };

        // The shipment list is optional — not every product has one.
        let shipment_list = match &ti {
            Some(ti_data) => self.fetch_shipment_list(ti_data).await,
            None => None,
        };

        info!(
            shipment_id,
            label_bytes = label.len(),
            has_shipment_list = shipment_list.is_some(),
            "DHL: documents fetched"
        );

        Ok(ShipmentDocuments {
            label,
            shipment_list,
        })
    }

    async fn request_pickup(
        &self,
        shipment_id: &str,
        pickup_date: &str,
    ) -> Result<(), CarrierError> {
        info!(shipment_id, pickup_date, "DHL: booking pickup");
        self.post_json(
            PICKUP_REQUEST_PATH,
            &json!({
                "transportInstructionId": shipment_id,
                "pickupDate": pickup_date,
            }),
        )
        .await?;
        info!(shipment_id, "DHL: pickup booked");
        Ok(())
    }
}
