//! GARP XML export parsing — domain model and file parser.

pub mod models;
pub mod xml;

pub use models::{
    BookingInfo, CarrierKind, Container, NotificationOption, Receiver, ServiceInfo, Shipment,
};
pub use xml::GarpXmlParser;
