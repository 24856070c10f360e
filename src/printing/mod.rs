//! Printing of labels and accompanying documents.
//!
//! Two logical printer queues: the label printer (Zebra) gets shipping
//! labels, the document printer (A4) gets shipment lists. Spooling runs an
//! external command built from the configured template; DHL renders
//! everything as PDF, so a silent PDF printer (SumatraPDF on Windows,
//! `lp` elsewhere) does the actual work.
//!
//! An unconfigured label printer is not an error — the label artifact is
//! already stored on disk and the operator can print it manually.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::PrinterConfig;
use crate::error::PrintError;

/// What happened to a print request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintOutcome {
    /// Spooled to the printer.
    Printed,
    /// No printer configured — artifact stays on disk only.
    Skipped,
}

/// Build the spool command argv from the template.
///
/// The template is split on whitespace first, then placeholders are
/// substituted per token, so paths with spaces stay a single argument.
fn build_command_args(template: &str, printer: &str, file: &Path) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| {
            token
                .replace("{printer}", printer)
                .replace("{file}", &file.display().to_string())
        })
        .collect()
}

/// Spools labels and documents to their configured printers.
pub struct LabelPrinter {
    config: PrinterConfig,
}

impl LabelPrinter {
    pub fn new(config: PrinterConfig) -> Self {
        Self { config }
    }

    /// Print a shipping label for an order.
    pub async fn print_label(
        &self,
        file: &Path,
        order_no: &str,
    ) -> Result<PrintOutcome, PrintError> {
        if self.config.label_printer_name.is_empty() {
            info!(order_no, "No label printer configured, label kept on disk");
            return Ok(PrintOutcome::Skipped);
        }
        self.spool(&self.config.label_printer_name, file, order_no, "label")
            .await
    }

    /// Print a shipment list / waybill for an order.
    pub async fn print_document(
        &self,
        file: &Path,
        order_no: &str,
    ) -> Result<PrintOutcome, PrintError> {
        if self.config.document_printer_name.is_empty() {
            debug!(order_no, "No document printer configured, skipping document");
            return Ok(PrintOutcome::Skipped);
        }
        self.spool(&self.config.document_printer_name, file, order_no, "document")
            .await
    }

    async fn spool(
        &self,
        printer: &str,
        file: &Path,
        order_no: &str,
        doc_type: &str,
    ) -> Result<PrintOutcome, PrintError> {
        let args = build_command_args(&self.config.print_command, printer, file);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| PrintError::Spawn {
                printer: printer.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty print command",
                ),
            })?;

        debug!(order_no, printer, command = ?args, "Spooling {doc_type}");

        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| PrintError::Spawn {
                printer: printer.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(order_no, printer, %stderr, "Print command failed for {doc_type}");
            return Err(PrintError::CommandFailed {
                printer: printer.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        info!(order_no, printer, "Printed {doc_type}");
        Ok(PrintOutcome::Printed)
    }
}
