//! Parser for GARP XML export files.
//!
//! GARP exports shipments in a Unifaun-OnlineConnect-style format: a root
//! element containing `<shipment>` blocks whose fields are `<val n="key">`
//! children. A `<receiver>` at root level is shared by every shipment that
//! does not declare its own. Files are written ISO-8859-1; the declared
//! encoding is honored.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::ParseError;
use crate::parser::models::{
    BookingInfo, Container, NotificationOption, Receiver, ServiceInfo, Shipment,
};

// ── Lightweight element tree ────────────────────────────────────────

/// A parsed XML element. GARP files are small, so the whole document is
/// read into a tree before extraction.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Extract all `<val n="key">value</val>` children into a map.
    ///
    /// GARP pads values with whitespace; everything is trimmed.
    fn vals(&self) -> HashMap<String, String> {
        self.children_named("val")
            .filter_map(|v| {
                v.attr("n")
                    .map(|n| (n.to_string(), v.text.trim().to_string()))
            })
            .collect()
    }
}

fn malformed(reason: impl std::fmt::Display) -> ParseError {
    ParseError::Malformed {
        reason: reason.to_string(),
    }
}

fn decode_text(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String, ParseError> {
    let decoded = reader.decoder().decode(raw).map_err(malformed)?;
    let unescaped = quick_xml::escape::unescape(&decoded).map_err(malformed)?;
    Ok(unescaped.into_owned())
}

fn element_from_start(reader: &Reader<&[u8]>, e: &BytesStart) -> Result<Element, ParseError> {
    let name = reader
        .decoder()
        .decode(e.name().as_ref())
        .map_err(malformed)?
        .into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(malformed)?
            .into_owned();
        let value = decode_text(reader, &attr.value)?;
        attrs.push((key, value));
    }

    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Parse a full document into an element tree.
fn parse_tree(bytes: &[u8]) -> Result<Element, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                stack.push(element_from_start(&reader, &e)?);
            }
            Event::Empty(e) => {
                let element = element_from_start(&reader, &e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => return Err(malformed("multiple root elements")),
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => return Err(malformed("multiple root elements")),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&decode_text(&reader, t.as_ref())?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = reader.decoder().decode(c.as_ref()).map_err(malformed)?;
                    top.text.push_str(&decoded);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| malformed("empty document"))
}

// ── GARP extraction ─────────────────────────────────────────────────

/// Parses XML files exported from GARP into [`Shipment`] values.
#[derive(Debug, Default)]
pub struct GarpXmlParser;

impl GarpXmlParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an XML file. One file may contain several shipments.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<Shipment>, ParseError> {
        let bytes = std::fs::read(path)?;
        self.parse_bytes(&bytes)
    }

    /// Parse XML from a string.
    pub fn parse_str(&self, xml: &str) -> Result<Vec<Shipment>, ParseError> {
        self.parse_bytes(xml.as_bytes())
    }

    /// Parse XML from raw bytes, honoring the declared encoding.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<Shipment>, ParseError> {
        let root = parse_tree(bytes)?;

        // A receiver at root level is shared by all shipments.
        let shared_receiver = root.child("receiver").map(parse_receiver);

        let mut shipments = Vec::new();
        for ship_elem in root.children_named("shipment") {
            let receiver = ship_elem
                .child("receiver")
                .map(parse_receiver)
                .or_else(|| shared_receiver.clone());
            shipments.push(parse_shipment(ship_elem, receiver)?);
        }

        Ok(shipments)
    }
}

fn parse_receiver(elem: &Element) -> Receiver {
    let vals = elem.vals();
    let get = |key: &str| vals.get(key).cloned().unwrap_or_default();
    Receiver {
        rcvid: elem.attr("rcvid").unwrap_or_default().trim().to_string(),
        name: get("name"),
        address1: get("address1"),
        address2: get("address2"),
        zipcode: get("zipcode"),
        city: get("city"),
        country: get("country"),
        phone: get("phone"),
        email: get("email"),
        contact: get("contact"),
        sms: get("sms"),
    }
}

fn parse_shipment(elem: &Element, receiver: Option<Receiver>) -> Result<Shipment, ParseError> {
    let vals = elem.vals();
    let get = |key: &str| vals.get(key).cloned().unwrap_or_default();

    let service = parse_service(elem.child("service"))?;
    let containers = elem
        .children_named("container")
        .map(parse_container)
        .collect::<Result<Vec<_>, _>>()?;
    let notifications = parse_notifications(elem.child("ufonline"));

    Ok(Shipment {
        order_no: elem.attr("orderno").unwrap_or_default().trim().to_string(),
        sender_name: get("from"),
        reference: get("reference"),
        term_code: get("termcode"),
        delivery_instruction: get("deliveryinstruction"),
        service,
        receiver,
        containers,
        notifications,
    })
}

fn parse_service(elem: Option<&Element>) -> Result<ServiceInfo, ParseError> {
    let elem = elem.ok_or_else(|| ParseError::MissingElement {
        element: "service".to_string(),
    })?;

    let raw_srvid = elem.attr("srvid").unwrap_or_default().trim().to_string();
    let (carrier, product_code, addon) = ServiceInfo::parse_srvid(&raw_srvid)?;

    let booking = elem.child("booking").map(|book| {
        let bvals = book.vals();
        BookingInfo {
            pickup_booking: bvals
                .get("pickupbooking")
                .is_some_and(|v| v.eq_ignore_ascii_case("YES")),
            pickup_date: bvals.get("pickupdate").cloned().unwrap_or_default(),
        }
    });

    Ok(ServiceInfo {
        carrier,
        product_code,
        addon,
        raw_srvid,
        booking,
    })
}

fn parse_number(vals: &HashMap<String, String>, field: &str, default: &str) -> Result<f64, ParseError> {
    let raw = vals.get(field).map(String::as_str).unwrap_or(default);
    let raw = if raw.is_empty() { default } else { raw };
    raw.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

fn parse_container(elem: &Element) -> Result<Container, ParseError> {
    let vals = elem.vals();

    // GARP writes copies as a decimal string ("1.0").
    let copies = parse_number(&vals, "copies", "1")? as u32;

    Ok(Container {
        container_type: elem.attr("type").unwrap_or("parcel").to_string(),
        measure: elem.attr("measure").unwrap_or_default().to_string(),
        copies,
        package_code: vals
            .get("packagecode")
            .cloned()
            .unwrap_or_else(|| "PC".to_string()),
        contents: vals.get("contents").cloned().unwrap_or_default(),
        weight: parse_number(&vals, "weight", "0")?,
        volume: parse_number(&vals, "volume", "0")?,
        length: parse_number(&vals, "length", "0")?,
        width: parse_number(&vals, "width", "0")?,
        height: parse_number(&vals, "height", "0")?,
    })
}

fn parse_notifications(elem: Option<&Element>) -> Vec<NotificationOption> {
    let Some(elem) = elem else {
        return Vec::new();
    };
    elem.children_named("option")
        .map(|opt| NotificationOption {
            opt_id: opt.attr("optid").unwrap_or_default().trim().to_string(),
            message: opt.vals().get("message").cloned().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::CarrierKind;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<data>
  <receiver rcvid="7631">
    <val n="name">Testbutiken AB</val>
    <val n="address1">Storgatan 10</val>
    <val n="zipcode">11122</val>
    <val n="city">STOCKHOLM</val>
    <val n="country">SE</val>
    <val n="phone">0812345678</val>
    <val n="email">anna@testbutiken.se</val>
  </receiver>
  <shipment orderno="107739-132888">
    <val n="from">Ernst P AB</val>
    <val n="reference">107739-132888</val>
    <val n="termcode">S</val>
    <service srvid="DHL:102">
      <booking>
        <val n="pickupbooking">YES</val>
        <val n="pickupdate">2026-02-19</val>
      </booking>
    </service>
    <container type="parcel">
      <val n="copies">1.0</val>
      <val n="packagecode">PKT</val>
      <val n="contents">material</val>
      <val n="weight">5.5</val>
      <val n="volume">0.02</val>
    </container>
    <ufonline>
      <option optid="enot">
        <val n="message">Order shipped, thank you!</val>
      </option>
    </ufonline>
  </shipment>
</data>
"#;

    #[test]
    fn parses_full_sample() {
        let shipments = GarpXmlParser::new().parse_str(SAMPLE).unwrap();
        assert_eq!(shipments.len(), 1);
        let s = &shipments[0];

        assert_eq!(s.order_no, "107739-132888");
        assert_eq!(s.sender_name, "Ernst P AB");
        assert_eq!(s.reference, "107739-132888");
        assert_eq!(s.term_code, "S");

        let r = s.receiver.as_ref().unwrap();
        assert_eq!(r.rcvid, "7631");
        assert_eq!(r.name, "Testbutiken AB");
        assert_eq!(r.address1, "Storgatan 10");
        assert_eq!(r.zipcode, "11122");
        assert_eq!(r.city, "STOCKHOLM");
        assert_eq!(r.country, "SE");
        assert_eq!(r.email, "anna@testbutiken.se");

        assert_eq!(s.service.carrier, CarrierKind::Dhl);
        assert_eq!(s.service.product_code, "102");
        assert!(s.service.addon.is_empty());
        assert_eq!(s.service.raw_srvid, "DHL:102");

        let booking = s.service.booking.as_ref().unwrap();
        assert!(booking.pickup_booking);
        assert_eq!(booking.pickup_date, "2026-02-19");

        assert_eq!(s.containers.len(), 1);
        let c = &s.containers[0];
        assert_eq!(c.copies, 1);
        assert_eq!(c.package_code, "PKT");
        assert_eq!(c.contents, "material");
        assert_eq!(c.weight, 5.5);
        assert_eq!(c.volume, 0.02);

        assert!(s.has_notification("enot"));
        assert_eq!(
            s.notification_message("enot"),
            Some("Order shipped, thank you!")
        );
    }

    #[test]
    fn shared_receiver_used_when_shipment_has_none() {
        let xml = r#"<data>
  <receiver rcvid="1"><val n="name">Shared AB</val></receiver>
  <shipment orderno="A">
    <service srvid="DHL:102"/>
  </shipment>
  <shipment orderno="B">
    <receiver rcvid="2"><val n="name">Own AB</val></receiver>
    <service srvid="DHL:103"/>
  </shipment>
</data>"#;
        let shipments = GarpXmlParser::new().parse_str(xml).unwrap();
        assert_eq!(shipments.len(), 2);
        assert_eq!(shipments[0].receiver.as_ref().unwrap().name, "Shared AB");
        assert_eq!(shipments[1].receiver.as_ref().unwrap().name, "Own AB");
    }

    #[test]
    fn values_are_stripped_of_padding() {
        let xml = r#"<data>
  <shipment orderno="  123  ">
    <val n="from">   Padded Sender AB   </val>
    <service srvid="  DHL:102  "/>
  </shipment>
</data>"#;
        let shipments = GarpXmlParser::new().parse_str(xml).unwrap();
        assert_eq!(shipments[0].order_no, "123");
        assert_eq!(shipments[0].sender_name, "Padded Sender AB");
        assert_eq!(shipments[0].service.product_code, "102");
    }

    #[test]
    fn missing_service_is_an_error() {
        let xml = r#"<data><shipment orderno="1"/></data>"#;
        let err = GarpXmlParser::new().parse_str(xml).unwrap_err();
        assert!(matches!(err, ParseError::MissingElement { element } if element == "service"));
    }

    #[test]
    fn invalid_srvid_is_an_error() {
        let xml = r#"<data><shipment orderno="1"><service srvid="DHL"/></shipment></data>"#;
        assert!(matches!(
            GarpXmlParser::new().parse_str(xml).unwrap_err(),
            ParseError::InvalidSrvid { .. }
        ));
    }

    #[test]
    fn unknown_carrier_is_an_error() {
        let xml = r#"<data><shipment orderno="1"><service srvid="UPS:1"/></shipment></data>"#;
        assert!(matches!(
            GarpXmlParser::new().parse_str(xml).unwrap_err(),
            ParseError::UnknownCarrier { .. }
        ));
    }

    #[test]
    fn bad_number_is_an_error() {
        let xml = r#"<data><shipment orderno="1">
  <service srvid="DHL:102"/>
  <container><val n="weight">heavy</val></container>
</shipment></data>"#;
        assert!(matches!(
            GarpXmlParser::new().parse_str(xml).unwrap_err(),
            ParseError::InvalidNumber { field, .. } if field == "weight"
        ));
    }

    #[test]
    fn entities_are_unescaped() {
        let xml = r#"<data><shipment orderno="1">
  <val n="from">Smith &amp; Sons</val>
  <service srvid="DHL:102"/>
</shipment></data>"#;
        let shipments = GarpXmlParser::new().parse_str(xml).unwrap();
        assert_eq!(shipments[0].sender_name, "Smith & Sons");
    }

    #[test]
    fn latin1_encoding_is_decoded() {
        // "Göteborg" with ö as the single ISO-8859-1 byte 0xF6.
        let mut xml: Vec<u8> = Vec::new();
        xml.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n");
        xml.extend_from_slice(b"<data><receiver rcvid=\"1\"><val n=\"city\">G");
        xml.push(0xF6);
        xml.extend_from_slice(b"teborg</val></receiver>");
        xml.extend_from_slice(b"<shipment orderno=\"1\"><service srvid=\"DHL:102\"/></shipment></data>");

        let shipments = GarpXmlParser::new().parse_bytes(&xml).unwrap();
        assert_eq!(
            shipments[0].receiver.as_ref().unwrap().city,
            "G\u{f6}teborg"
        );
    }

    #[test]
    fn empty_data_yields_no_shipments() {
        let shipments = GarpXmlParser::new().parse_str("<data></data>").unwrap();
        assert!(shipments.is_empty());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            GarpXmlParser::new().parse_str("<data><shipment></data>").unwrap_err(),
            ParseError::Malformed { .. }
        ));
    }
}
