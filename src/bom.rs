//! The canonical Bill-of-Materials data model.
//!
//! Everything downstream of normalization is fully typed: the loose,
//! model-shaped JSON from the extraction service is decided once at the
//! normalization boundary ([`crate::pipeline::normalize`]) and never leaks
//! past it. A [`Bom`] is immutable after creation — re-extraction produces
//! a fresh value (and, if stored, a fresh session id) rather than mutating
//! an existing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Measurement unit for a BOM line item.
///
/// Parsing is case-insensitive and accepts the synonyms drawing tables
/// commonly use ("pcs", "mt", "kgs", ...). Anything outside the table
/// fails that line's normalization; unit meanings are never guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Discrete pieces ("pcs", "pc", "ea", "each", "pieces").
    Piece,
    /// Length in meters ("m", "mt", "metre", "meters").
    Meter,
    /// Mass in kilograms ("kg", "kgs", "kilo", "kilograms").
    Kg,
    /// Generic unit ("un", "u") when the drawing gives no dimension.
    Unit,
}

impl FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "piece" | "pieces" | "pc" | "pcs" | "ea" | "each" => Ok(Unit::Piece),
            "meter" | "meters" | "metre" | "metres" | "m" | "mt" => Ok(Unit::Meter),
            "kg" | "kgs" | "kilo" | "kilos" | "kilogram" | "kilograms" => Ok(Unit::Kg),
            "unit" | "units" | "un" | "u" => Ok(Unit::Unit),
            other => Err(UnknownUnit(other.to_string())),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Piece => "piece",
            Unit::Meter => "meter",
            Unit::Kg => "kg",
            Unit::Unit => "unit",
        };
        f.write_str(s)
    }
}

/// A unit string that did not match the recognized enum or synonym table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl fmt::Display for UnknownUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized unit '{}'", self.0)
    }
}

impl std::error::Error for UnknownUnit {}

/// One validated line of a Bill of Materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomLineItem {
    /// Part identifier, unique within a single BOM (duplicates are merged
    /// at normalization time).
    pub identifier: String,
    /// Free-text part description.
    pub description: String,
    /// Non-negative quantity in `unit`s.
    pub quantity: u32,
    /// Measurement unit.
    pub unit: Unit,
    /// Weight of one unit in kilograms, when the drawing states it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_weight_kg: Option<f64>,
    /// Annotations carried over from the drawing (finish, material, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Where a BOM came from: the source artifact and, for PDFs, the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Path to the source image, or to the PDF the page was rasterized from.
    pub path: PathBuf,
    /// 1-indexed page number for PDF-derived units; `None` for plain images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<usize>,
}

impl SourceRef {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_index: None,
        }
    }

    pub fn page(path: impl Into<PathBuf>, page: usize) -> Self {
        Self {
            path: path.into(),
            page_index: Some(page),
        }
    }

    /// Human-readable label, e.g. `drawing.pdf (page 3)`.
    pub fn label(&self) -> String {
        match self.page_index {
            Some(p) => format!("{} (page {})", self.path.display(), p),
            None => self.path.display().to_string(),
        }
    }
}

/// A per-line normalization diagnostic.
///
/// Recorded whenever a candidate line is dropped or merged. Diagnostics
/// are part of the BOM so partial results surface their gaps instead of
/// silently shrinking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 0-indexed position of the candidate in the raw output.
    pub line: usize,
    /// What went wrong or what was done ("dropped: negative quantity",
    /// "merged duplicate identifier 'A1'", ...).
    pub reason: String,
}

/// A normalized Bill of Materials extracted from one drawing image.
///
/// Item order is extraction order (first occurrence in the raw output);
/// the normalizer never reorders. `partial`, once true, is never cleared
/// on this value — only a fresh extraction produces a clean BOM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bom {
    /// The source image or PDF page this BOM was extracted from.
    pub source: SourceRef,
    /// Validated line items in extraction order.
    pub items: Vec<BomLineItem>,
    /// When the extraction service produced the raw output.
    pub extracted_at: DateTime<Utc>,
    /// True when one or more candidate lines failed validation and were
    /// dropped (each drop leaves a diagnostic).
    pub partial: bool,
    /// Per-line diagnostics for dropped or merged candidates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl Bom {
    /// Total quantity across all items, for quick summaries.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// Metadata linking a stored result back to its source and extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Path of the original input artifact as given by the user.
    pub source_path: PathBuf,
    /// 1-indexed page for PDF-derived results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<usize>,
    /// Model identifier that produced the extraction, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extraction timestamp.
    pub extracted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_synonyms_parse() {
        assert_eq!("pcs".parse::<Unit>().unwrap(), Unit::Piece);
        assert_eq!("PCS".parse::<Unit>().unwrap(), Unit::Piece);
        assert_eq!("each".parse::<Unit>().unwrap(), Unit::Piece);
        assert_eq!("mt".parse::<Unit>().unwrap(), Unit::Meter);
        assert_eq!("m".parse::<Unit>().unwrap(), Unit::Meter);
        assert_eq!("kgs".parse::<Unit>().unwrap(), Unit::Kg);
        assert_eq!("un".parse::<Unit>().unwrap(), Unit::Unit);
    }

    #[test]
    fn unknown_unit_rejected() {
        let err = "furlong".parse::<Unit>().unwrap_err();
        assert_eq!(err, UnknownUnit("furlong".into()));
        assert!(err.to_string().contains("furlong"));
    }

    #[test]
    fn unit_serde_roundtrip() {
        let json = serde_json::to_string(&Unit::Piece).unwrap();
        assert_eq!(json, "\"piece\"");
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Unit::Piece);
    }

    #[test]
    fn source_ref_label() {
        assert_eq!(SourceRef::image("plan.png").label(), "plan.png");
        assert_eq!(
            SourceRef::page("doors.pdf", 3).label(),
            "doors.pdf (page 3)"
        );
    }

    #[test]
    fn total_quantity_sums_items() {
        let bom = Bom {
            source: SourceRef::image("plan.png"),
            items: vec![
                BomLineItem {
                    identifier: "A1".into(),
                    description: "Bracket".into(),
                    quantity: 2,
                    unit: Unit::Piece,
                    unit_weight_kg: None,
                    notes: None,
                },
                BomLineItem {
                    identifier: "A2".into(),
                    description: "Rail".into(),
                    quantity: 5,
                    unit: Unit::Meter,
                    unit_weight_kg: Some(1.2),
                    notes: None,
                },
            ],
            extracted_at: Utc::now(),
            partial: false,
            diagnostics: vec![],
        };
        assert_eq!(bom.total_quantity(), 7);
    }
}
