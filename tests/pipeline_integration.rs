//! Integration tests for the ingest pipeline.
//!
//! Each test builds the real pipeline over a temp directory tree and a
//! wiremock DHL API, then drops GARP XML files in and asserts on which
//! terminal directory they end up in and which artifacts get written.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use garp_shipping_connector::carriers::{CarrierRegistry, DhlClient};
use garp_shipping_connector::config::{
    DhlConfig, PathsConfig, PipelineConfig, PrinterConfig, SenderConfig, WatcherConfig,
};
use garp_shipping_connector::pipeline::{
    Processor, ProcessorDeps, WorkItem, spawn_watcher, spawn_workers,
};
use garp_shipping_connector::printing::LabelPrinter;

const TI_PATH: &str = "/transportinstructionapi/v1/transportinstruction/sendtransportinstruction";
const PRINT_PATH: &str = "/printapi/v1/print/printdocuments";
const PICKUP_PATH: &str = "/pickuprequestapi/v1/pickuprequest/pickuprequest";

const LABEL_PDF: &[u8] = b"%PDF-1.4 test label";

/// Maximum time any polling assertion is allowed to take.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    _root: tempfile::TempDir,
    paths: PathsConfig,
    processor: Arc<Processor>,
    server: MockServer,
}

async fn harness() -> Harness {
    harness_with(PipelineConfig {
        backoff_base_secs: 0,
        ..PipelineConfig::default()
    })
    .await
}

async fn harness_with(pipeline: PipelineConfig) -> Harness {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let paths = PathsConfig {
        watch_dir: root.path().join("Outgoing"),
        processing_dir: root.path().join("Processing"),
        done_dir: root.path().join("Done"),
        error_dir: root.path().join("Error"),
        label_cache_dir: root.path().join("Labels"),
        log_dir: root.path().join("logs"),
    };
    paths.ensure_all().unwrap();

    let dhl = DhlClient::new(
        DhlConfig {
            base_url: server.uri(),
            api_key: SecretString::from("test-key"),
            timeout_secs: 5,
        },
        SenderConfig {
            name: "Ernst P AB".into(),
            customer_number_dhl: "101733".into(),
            ..SenderConfig::default()
        },
    );
    let mut carriers = CarrierRegistry::new();
    carriers.register(Arc::new(dhl));

    let processor = Arc::new(Processor::new(
        paths.clone(),
        pipeline,
        ProcessorDeps {
            carriers: Arc::new(carriers),
            printer: Arc::new(LabelPrinter::new(PrinterConfig::default())),
            mailer: None,
        },
    ));

    Harness {
        _root: root,
        paths,
        processor,
        server,
    }
}

impl Harness {
    fn drop_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.paths.watch_dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn entries(&self, dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// The invariant behind every scenario: a processed file rests in
    /// exactly one terminal directory and nowhere else.
    fn assert_single_terminal_location(&self, expect_done: usize, expect_error_files: usize) {
        assert!(self.entries(&self.paths.watch_dir).is_empty(), "Outgoing not empty");
        assert!(
            self.entries(&self.paths.processing_dir).is_empty(),
            "Processing not empty"
        );
        assert_eq!(self.entries(&self.paths.done_dir).len(), expect_done, "Done");
        let error_xml = self
            .entries(&self.paths.error_dir)
            .iter()
            .filter(|n| n.ends_with(".xml"))
            .count();
        assert_eq!(error_xml, expect_error_files, "Error");
    }
}

fn garp_xml(order_no: &str, srvid: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<data>
  <receiver rcvid="7631">
    <val n="name">Testbutiken AB</val>
    <val n="address1">Storgatan 10</val>
    <val n="zipcode">11122</val>
    <val n="city">STOCKHOLM</val>
    <val n="country">SE</val>
    <val n="email">anna@testbutiken.se</val>
  </receiver>
  <shipment orderno="{order_no}">
    <val n="from">Ernst P AB</val>
    <val n="reference">{order_no}</val>
    <service srvid="{srvid}"/>
    <container type="parcel">
      <val n="copies">1</val>
      <val n="packagecode">PKT</val>
      <val n="weight">5.5</val>
      <val n="volume">0.02</val>
    </container>
  </shipment>
</data>
"#
    )
}

async fn mock_create_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transportInstruction": {
                "id": "ti-1001",
                "pieces": [{ "id": ["JJD0099"] }],
            }
        })))
        .mount(server)
        .await;
}

async fn mock_print_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(PRINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reports": [{ "type": "Label", "content": BASE64.encode(LABEL_PDF) }]
        })))
        .mount(server)
        .await;
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn valid_file_ends_in_done_with_label() {
    let h = harness().await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;

    let source = h.drop_file("order123.xml", &garp_xml("order123", "DHL:102"));
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(1, 0);
    let done = h.entries(&h.paths.done_dir);
    assert!(done[0].ends_with("_order123.xml"), "got {done:?}");

    let label = std::fs::read(h.paths.label_cache_dir.join("order123.pdf")).unwrap();
    assert_eq!(label, LABEL_PDF);
}

#[tokio::test]
async fn validation_error_ends_in_error_without_retry() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(TI_PATH))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid postal code"))
        .expect(1) // terminal — must not be retried
        .mount(&h.server)
        .await;

    let source = h.drop_file("order124.xml", &garp_xml("order124", "DHL:102"));
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(0, 1);
    let marker = h.paths.error_dir.join("order124.xml.error.txt");
    let body = std::fs::read_to_string(marker).unwrap();
    assert!(body.contains("order order124"), "got: {body}");
    assert!(body.contains("422"), "got: {body}");
    assert!(body.contains("invalid postal code"), "got: {body}");
}

#[tokio::test]
async fn transient_errors_retry_until_success() {
    // Three timeouts, then success, with max_attempts = 4.
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(TI_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&h.server)
        .await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;

    let source = h.drop_file("order125.xml", &garp_xml("order125", "DHL:102"));
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(1, 0);
    // Retry idempotence: one shipment, one label artifact.
    assert_eq!(h.entries(&h.paths.label_cache_dir), vec!["order125.pdf"]);
}

#[tokio::test]
async fn transient_errors_exhaust_attempts_and_fail() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(TI_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(4) // max_attempts
        .mount(&h.server)
        .await;

    let source = h.drop_file("order126.xml", &garp_xml("order126", "DHL:102"));
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(0, 1);
    let body =
        std::fs::read_to_string(h.paths.error_dir.join("order126.xml.error.txt")).unwrap();
    assert!(body.contains("503"), "got: {body}");
}

#[tokio::test]
async fn unparseable_file_ends_in_error() {
    let h = harness().await;

    let source = h.drop_file("garbage.xml", "not xml at all");
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(0, 1);
    assert!(h.paths.error_dir.join("garbage.xml.error.txt").exists());
}

#[tokio::test]
async fn unsupported_carrier_ends_in_error() {
    let h = harness().await;

    let source = h.drop_file("pn.xml", &garp_xml("55", "PN:19"));
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(0, 1);
    let body = std::fs::read_to_string(h.paths.error_dir.join("pn.xml.error.txt")).unwrap();
    assert!(body.contains("not supported"), "got: {body}");
}

#[tokio::test]
async fn concurrent_claims_yield_one_terminal_file() {
    let h = harness().await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;

    let source = h.drop_file("raced.xml", &garp_xml("raced", "DHL:102"));

    // Two workers pick up the same discovery: one claim wins, the other
    // sees a benign conflict.
    let first = h.processor.process(WorkItem::new(source.clone()));
    let second = h.processor.process(WorkItem::new(source.clone()));
    tokio::join!(first, second);

    h.assert_single_terminal_location(1, 0);
}

#[tokio::test]
async fn pickup_is_booked_when_requested() {
    let h = harness().await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;
    Mock::given(method("POST"))
        .and(path(PICKUP_PATH))
        .and(body_partial_json(json!({
            "transportInstructionId": "ti-1001",
            "pickupDate": "2026-02-19",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<data>
  <receiver rcvid="1"><val n="name">Testbutiken AB</val><val n="zipcode">11122</val></receiver>
  <shipment orderno="book1">
    <service srvid="DHL:102">
      <booking>
        <val n="pickupbooking">YES</val>
        <val n="pickupdate">2026-02-19</val>
      </booking>
    </service>
    <container><val n="weight">1</val><val n="volume">0.01</val></container>
  </shipment>
</data>"#;
    let source = h.drop_file("book1.xml", xml);
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(1, 0);
}

#[tokio::test]
async fn multi_shipment_file_fails_whole_file_on_one_bad_order() {
    let h = harness().await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;

    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<data>
  <receiver rcvid="1"><val n="name">Testbutiken AB</val><val n="zipcode">11122</val></receiver>
  <shipment orderno="ok-1">
    <service srvid="DHL:102"/>
    <container><val n="weight">1</val><val n="volume">0.01</val></container>
  </shipment>
  <shipment orderno="bad-2">
    <service srvid="PN:19"/>
  </shipment>
</data>"#;
    let source = h.drop_file("mixed.xml", xml);
    h.processor.process(WorkItem::new(source)).await;

    h.assert_single_terminal_location(0, 1);
    let body = std::fs::read_to_string(h.paths.error_dir.join("mixed.xml.error.txt")).unwrap();
    assert!(body.contains("bad-2"), "got: {body}");
}

// ── Full pipeline: watcher + workers ────────────────────────────────

#[tokio::test]
async fn watcher_and_workers_move_dropped_file_to_done() {
    let h = harness().await;
    mock_create_success(&h.server).await;
    mock_print_success(&h.server).await;

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let (watcher_handle, watcher_shutdown) = spawn_watcher(
        h.paths.watch_dir.clone(),
        WatcherConfig {
            scan_interval_secs: 1,
            quiet_period_secs: 0,
        },
        tx,
    );
    let (worker_handles, _worker_shutdown) = spawn_workers(2, rx, Arc::clone(&h.processor));

    h.drop_file("live.xml", &garp_xml("live", "DHL:102"));

    // Poll until the file lands in Done.
    let done_dir = h.paths.done_dir.clone();
    tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            if std::fs::read_dir(&done_dir).unwrap().next().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("file never reached Done");

    watcher_shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    watcher_handle.await.unwrap();
    for handle in worker_handles {
        handle.await.unwrap();
    }

    h.assert_single_terminal_location(1, 0);
    assert!(h.paths.label_cache_dir.join("live.pdf").exists());
}
