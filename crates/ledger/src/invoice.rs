use std::fmt::Write;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use fiscalchain_core::{DomainError, DomainResult};

/// Kind of fiscal record carried by a chain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Registration of an issued invoice.
    Alta,
    /// Cancellation of a previously registered invoice.
    Anulacion,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Alta => "alta",
            RecordKind::Anulacion => "anulacion",
        }
    }
}

/// Raw invoice fields handed to the record factory.
///
/// Amounts are in the smallest currency unit (cents) and may be negative for
/// corrective invoices. Tax computation happens upstream; these are taken as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub kind: RecordKind,
    /// Issuer tax identifier (NIF).
    pub issuer_tax_id: String,
    pub issuer_name: String,
    /// Series + number, e.g. `VF-2025-000123`.
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    /// Invoice type code (`F1`, `F2`, `R1`, ...).
    pub invoice_type: String,
    /// VAT regime key (`01` = general regime).
    pub regime_key: String,
    pub tax_base: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    /// Moment the record is generated; part of the signed payload.
    pub generated_at: DateTime<Utc>,
}

impl InvoiceData {
    /// Reject data that cannot produce a meaningful canonical payload.
    pub fn validate(&self) -> DomainResult<()> {
        require_text("issuer_tax_id", &self.issuer_tax_id)?;
        require_text("invoice_number", &self.invoice_number)?;
        if self.kind == RecordKind::Alta {
            require_text("issuer_name", &self.issuer_name)?;
            require_text("invoice_type", &self.invoice_type)?;
            require_text("regime_key", &self.regime_key)?;
            if self.tax_base.checked_add(self.tax_amount) != Some(self.total_amount) {
                return Err(DomainError::validation(format!(
                    "total_amount {} must equal tax_base {} + tax_amount {}",
                    self.total_amount, self.tax_base, self.tax_amount
                )));
            }
        }
        Ok(())
    }

    /// Deterministic serialization used as both signature and hash input.
    ///
    /// Stable field order, `key=value` pairs joined by `&`, UTF-8, trimmed
    /// text values, amounts with exactly two decimals. `%`, `&`, `=` and control
    /// characters inside values are percent-encoded, so every value parses back
    /// unambiguously. Re-serializing the same data always yields identical bytes.
    pub fn canonical_payload(&self) -> DomainResult<CanonicalPayload> {
        self.validate()?;

        let issue_date = self.issue_date.format("%d-%m-%Y").to_string();
        let generated_at = self
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Secs, false);

        let fields: Vec<(&str, String)> = match self.kind {
            RecordKind::Alta => vec![
                ("TipoRegistro", self.kind.as_str().to_string()),
                ("IDEmisorFactura", escape_value(&self.issuer_tax_id)),
                ("NombreRazonEmisor", escape_value(&self.issuer_name)),
                ("NumSerieFactura", escape_value(&self.invoice_number)),
                ("FechaExpedicionFactura", issue_date),
                ("TipoFactura", escape_value(&self.invoice_type)),
                ("ClaveRegimen", escape_value(&self.regime_key)),
                ("BaseImponible", format_amount(self.tax_base)),
                ("CuotaTotal", format_amount(self.tax_amount)),
                ("ImporteTotal", format_amount(self.total_amount)),
                ("FechaHoraHusoGenRegistro", generated_at),
            ],
            RecordKind::Anulacion => vec![
                ("TipoRegistro", self.kind.as_str().to_string()),
                ("IDEmisorFacturaAnulada", escape_value(&self.issuer_tax_id)),
                ("NumSerieFacturaAnulada", escape_value(&self.invoice_number)),
                ("FechaExpedicionFacturaAnulada", issue_date),
                ("FechaHoraHusoGenRegistro", generated_at),
            ],
        };

        let text = fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        Ok(CanonicalPayload {
            kind: self.kind,
            invoice_number: self.invoice_number.trim().to_string(),
            text,
        })
    }
}

/// Canonical byte representation of one invoice, plus the metadata the
/// ledger keeps alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalPayload {
    kind: RecordKind,
    invoice_number: String,
    text: String,
}

impl CanonicalPayload {
    /// Wrap an already-canonical payload (e.g. when reloading from storage).
    pub fn from_parts(
        kind: RecordKind,
        invoice_number: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            invoice_number: invoice_number.into(),
            text: text.into(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn require_text(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Trim, then percent-encode the separators and anything non-printable.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if matches!(ch, '%' | '&' | '=') || ch.is_control() {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{byte:02X}");
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Cents → `"1234.50"`; negative amounts keep a leading `-`.
fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
