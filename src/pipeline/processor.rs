//! Work item processing — the claim → submit → finalize state machine.
//!
//! A worker owns one item end to end:
//!
//! 1. claim the file (atomic rename into Processing)
//! 2. parse it and submit every shipment to its carrier, retrying
//!    transient errors with exponential backoff
//! 3. store and print the returned documents, email the customer
//! 4. move the file to Done or Error — every exit from submission ends in
//!    a directory move, so no file is ever silently dropped
//!
//! Failure taxonomy: parse errors, carrier auth/validation errors and
//! label print errors are terminal; only transient carrier errors retry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::carriers::CarrierRegistry;
use crate::config::{PathsConfig, PipelineConfig};
use crate::error::{CarrierError, ClaimError, Error, PipelineError};
use crate::notifications::Mailer;
use crate::parser::{GarpXmlParser, Shipment};
use crate::pipeline::{claim, CompletedShipment, ProcessingOutcome, WorkItem, WorkItemState};
use crate::printing::LabelPrinter;

/// Collaborators the processor drives.
pub struct ProcessorDeps {
    pub carriers: Arc<CarrierRegistry>,
    pub printer: Arc<LabelPrinter>,
    /// Absent when no `[smtp]` section is configured.
    pub mailer: Option<Arc<Mailer>>,
}

/// Processes claimed work items through submission to a terminal
/// directory.
pub struct Processor {
    parser: GarpXmlParser,
    paths: PathsConfig,
    retry: PipelineConfig,
    deps: ProcessorDeps,
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)`, scaled by a
/// random factor in [0.5, 1.5).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    let exp_ms = base.as_millis() as u64 * (1u64 << shift);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((exp_ms as f64 * jitter).round() as u64)
}

/// `20260207_143000_order1.xml` — keeps repeated exports of the same
/// order distinct in the done directory.
fn timestamped_name(name: &str) -> String {
    format!("{}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"), name)
}

impl Processor {
    pub fn new(paths: PathsConfig, retry: PipelineConfig, deps: ProcessorDeps) -> Self {
        Self {
            parser: GarpXmlParser::new(),
            paths,
            retry,
            deps,
        }
    }

    /// Process one work item end to end. Never leaves the file in the
    /// processing directory on a normal exit.
    pub async fn process(&self, mut item: WorkItem) {
        let claimed_path = match claim::claim(&item, &self.paths.processing_dir) {
            Ok(path) => path,
            Err(ClaimError::Conflict { .. }) => {
                debug!(file = %item.file_name(), "Already claimed by another worker, skipping");
                return;
            }
            Err(e) => {
                warn!(file = %item.file_name(), "Claim failed: {e}");
                return;
            }
        };
        item.advance(WorkItemState::Claimed);

        let outcome = self.submit(&mut item, &claimed_path).await;
        self.finalize(&mut item, &claimed_path, outcome).await;
    }

    /// Parse the file and submit every shipment in it.
    async fn submit(&self, item: &mut WorkItem, path: &Path) -> ProcessingOutcome {
        item.advance(WorkItemState::Submitting);

        let shipments = match self.parser.parse_file(path) {
            Ok(shipments) => shipments,
            Err(e) => {
                return ProcessingOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        info!(file = %item.file_name(), count = shipments.len(), "Parsed shipments");

        let mut completed = Vec::new();
        for shipment in &shipments {
            match self.submit_shipment(item, shipment).await {
                Ok(done) => completed.push(done),
                Err(e) => {
                    // First terminal shipment error fails the whole file;
                    // the order number pins down which one.
                    return ProcessingOutcome::Failed {
                        reason: format!("order {}: {e}", shipment.order_no),
                    };
                }
            }
        }

        ProcessingOutcome::Succeeded {
            shipments: completed,
        }
    }

    /// One shipment through the whole chain: create, documents, pickup,
    /// store, print, customer mail.
    async fn submit_shipment(
        &self,
        item: &mut WorkItem,
        shipment: &Shipment,
    ) -> Result<CompletedShipment, Error> {
        info!(
            order_no = %shipment.order_no,
            srvid = %shipment.service.raw_srvid,
            "Submitting shipment"
        );

        let client = self.deps.carriers.get(shipment.service.carrier)?;

        let created = self
            .with_retry(item, "create_shipment", || client.create_shipment(shipment))
            .await?;

        let documents = self
            .with_retry(item, "fetch_documents", || {
                client.fetch_documents(&created.shipment_id)
            })
            .await?;

        if let Some(booking) = &shipment.service.booking {
            if booking.pickup_booking && !booking.pickup_date.is_empty() {
                self.with_retry(item, "request_pickup", || {
                    client.request_pickup(&created.shipment_id, &booking.pickup_date)
                })
                .await?;
            }
        }

        // Store the label before any print attempt: the artifact on disk
        // is the fallback when no printer is configured.
        let label_path = self
            .paths
            .label_cache_dir
            .join(format!("{}.pdf", shipment.order_no));
        tokio::fs::write(&label_path, &documents.label)
            .await
            .map_err(PipelineError::Io)?;
        info!(order_no = %shipment.order_no, path = %label_path.display(), "Label stored");

        self.deps
            .printer
            .print_label(&label_path, &shipment.order_no)
            .await?;

        if let Some(list) = &documents.shipment_list {
            let list_path = self
                .paths
                .label_cache_dir
                .join(format!("{}_shipmentlist.pdf", shipment.order_no));
            tokio::fs::write(&list_path, list)
                .await
                .map_err(PipelineError::Io)?;
            // The shipment list is auxiliary — if it does not print, the
            // stored copy is enough.
            if let Err(e) = self
                .deps
                .printer
                .print_document(&list_path, &shipment.order_no)
                .await
            {
                warn!(order_no = %shipment.order_no, "Shipment list not printed: {e}");
            }
        }

        self.send_customer_email(shipment, &created.tracking_number)
            .await;

        info!(
            order_no = %shipment.order_no,
            tracking = %created.tracking_number,
            "Shipment complete"
        );

        Ok(CompletedShipment {
            order_no: shipment.order_no.clone(),
            tracking_number: created.tracking_number.clone(),
            carrier: shipment.service.carrier,
        })
    }

    /// Run a carrier call, retrying transient errors with backoff.
    ///
    /// Each call gets its own attempt budget, so a retried document fetch
    /// never re-creates the shipment it belongs to.
    async fn with_retry<T, F, Fut>(
        &self,
        item: &mut WorkItem,
        what: &str,
        mut op: F,
    ) -> Result<T, CarrierError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CarrierError>>,
    {
        let max = self.retry.max_attempts;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            item.attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max => {
                    item.advance(WorkItemState::Retrying);
                    let delay = backoff_delay(self.retry.backoff_base(), attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        "Transient carrier error, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    item.advance(WorkItemState::Submitting);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Customer tracking mail — only with the `enot` option and a
    /// receiver address, and never fatal for the shipment.
    async fn send_customer_email(&self, shipment: &Shipment, tracking: &str) {
        let Some(mailer) = &self.deps.mailer else {
            return;
        };
        if !shipment.has_notification("enot") {
            return;
        }
        let Some(email) = shipment
            .receiver
            .as_ref()
            .map(|r| r.email.as_str())
            .filter(|e| !e.is_empty())
        else {
            return;
        };

        let message = shipment.notification_message("enot").unwrap_or("");
        if let Err(e) = mailer
            .send_tracking_email(
                email,
                &shipment.order_no,
                tracking,
                shipment.service.carrier,
                message,
            )
            .await
        {
            warn!(order_no = %shipment.order_no, "Tracking email failed: {e}");
        }
    }

    /// Move the file to its terminal directory and record the outcome.
    async fn finalize(
        &self,
        item: &mut WorkItem,
        claimed_path: &Path,
        outcome: ProcessingOutcome,
    ) {
        let file_name = item.file_name();
        let elapsed_ms = (chrono::Utc::now() - item.discovered_at)
            .num_milliseconds()
            .max(0);
        match outcome {
            ProcessingOutcome::Succeeded { shipments } => {
                item.advance(WorkItemState::Succeeded);
                let dest = self.paths.done_dir.join(timestamped_name(&file_name));
                match std::fs::rename(claimed_path, &dest) {
                    Ok(()) => {
                        info!(
                            file = %file_name,
                            orders = shipments.len(),
                            attempts = item.attempts,
                            elapsed_ms,
                            "Moved to Done"
                        );
                    }
                    Err(e) => {
                        // The file stays in Processing and is re-queued by
                        // stale-claim recovery at the next startup.
                        error!(file = %file_name, "Failed to move to Done: {e}");
                    }
                }
            }
            ProcessingOutcome::Failed { reason } => {
                item.advance(WorkItemState::Failed);
                let dest = self.paths.error_dir.join(&file_name);
                if let Err(e) = std::fs::rename(claimed_path, &dest) {
                    error!(file = %file_name, "Failed to move to Error: {e}");
                }

                let marker = self.paths.error_dir.join(format!("{file_name}.error.txt"));
                let body = format!(
                    "Tid: {}\nFil: {}\nFel: {}\n",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    file_name,
                    reason
                );
                if let Err(e) = std::fs::write(&marker, body) {
                    error!(file = %file_name, "Failed to write error marker: {e}");
                }

                error!(file = %file_name, %reason, attempts = item.attempts, "Moved to Error");

                if let Some(mailer) = &self.deps.mailer {
                    if let Err(e) = mailer.send_failure_notice(&file_name, &reason).await {
                        warn!(file = %file_name, "Failure notice not sent: {e}");
                    }
                }
            }
        }
    }
}
