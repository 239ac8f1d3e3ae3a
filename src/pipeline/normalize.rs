//! Normalization: decide the model's loose output into a typed [`Bom`].
//!
//! ## Why is this the only place that reads model JSON?
//!
//! The extraction service is not contractually bound to the schema we
//! ask for. Rather than letting half-trusted JSON leak through the crate,
//! the raw output is decided exactly once here: either it yields typed
//! line items, or it is reported as unparsable. Downstream code never
//! touches `serde_json::Value`.
//!
//! ## Degradation policy
//!
//! A single bad line never fails the BOM. Each candidate is validated
//! independently; failures drop that line, record a [`Diagnostic`], and
//! set the `partial` flag. Only total parse failure of the raw output —
//! no JSON object at all — is an error
//! ([`BomError::UnparsableExtraction`]).

use crate::bom::{Bom, BomLineItem, Diagnostic, SourceRef, Unit};
use crate::error::BomError;
use crate::pipeline::extract::RawExtractionResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Validate and normalize a raw extraction result into a [`Bom`].
///
/// # Errors
/// - [`BomError::UnparsableExtraction`] — the output contains no
///   parsable JSON object
/// - [`BomError::MalformedResponse`] — JSON parsed but lacks the
///   `items` array the schema contract requires
pub fn normalize(raw: RawExtractionResult, source: SourceRef) -> Result<Bom, BomError> {
    let document = parse_document(&raw.model_output_text)?;

    let candidates = match document.get("items") {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(BomError::MalformedResponse {
                detail: "response JSON has no 'items' array".into(),
            })
        }
    };

    if let Some(confidence) = document.get("confidence").and_then(Value::as_f64) {
        debug!("{}: service confidence {:.2}", source.label(), confidence);
    }

    let mut items: Vec<BomLineItem> = Vec::with_capacity(candidates.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut partial = false;

    for (line, candidate) in candidates.iter().enumerate() {
        match validate_candidate(candidate) {
            Ok(item) => match positions.get(&item.identifier) {
                // First occurrence keeps its position; duplicates fold in.
                Some(&at) => {
                    let merged = &mut items[at];
                    if merged.unit == item.unit {
                        merged.quantity += item.quantity;
                        merged.notes = concat_notes(merged.notes.take(), item.notes);
                        diagnostics.push(Diagnostic {
                            line,
                            reason: format!(
                                "merged duplicate identifier '{}' (quantities summed)",
                                item.identifier
                            ),
                        });
                    } else {
                        partial = true;
                        diagnostics.push(Diagnostic {
                            line,
                            reason: format!(
                                "dropped: duplicate identifier '{}' with conflicting unit ({} vs {})",
                                item.identifier, item.unit, merged.unit
                            ),
                        });
                    }
                }
                None => {
                    positions.insert(item.identifier.clone(), items.len());
                    items.push(item);
                }
            },
            Err(reason) => {
                partial = true;
                warn!("{}: line {} dropped: {}", source.label(), line, reason);
                diagnostics.push(Diagnostic {
                    line,
                    reason: format!("dropped: {reason}"),
                });
            }
        }
    }

    Ok(Bom {
        source,
        items,
        extracted_at: raw.extracted_at,
        partial,
        diagnostics,
    })
}

// Models often wrap output in fences despite being told not to.
static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*)\n```\s*$").unwrap());

/// Locate and parse the JSON object in the raw output.
///
/// Strips outer code fences, then takes the substring from the first `{`
/// to the last `}` so prose before or after the object is tolerated.
fn parse_document(text: &str) -> Result<Value, BomError> {
    let trimmed = text.trim();
    let unfenced = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };

    let start = unfenced.find('{');
    let end = unfenced.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e > s => &unfenced[s..=e],
        _ => {
            return Err(BomError::UnparsableExtraction {
                detail: "no JSON object found in model output".into(),
            })
        }
    };

    serde_json::from_str(json_str).map_err(|e| BomError::UnparsableExtraction {
        detail: format!("JSON parse failed: {e}"),
    })
}

/// Validate one candidate line item; the error string becomes the
/// diagnostic reason.
fn validate_candidate(candidate: &Value) -> Result<BomLineItem, String> {
    let obj = candidate
        .as_object()
        .ok_or_else(|| "candidate is not an object".to_string())?;

    let identifier = obj
        .get("identifier")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing or empty identifier".to_string())?
        .to_string();

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    let quantity = parse_quantity(obj.get("quantity"))
        .map_err(|reason| format!("identifier '{identifier}': {reason}"))?;

    let unit_str = obj
        .get("unit")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("identifier '{identifier}': missing unit"))?;
    let unit: Unit = unit_str
        .parse()
        .map_err(|e| format!("identifier '{identifier}': {e}"))?;

    let unit_weight_kg = match obj.get("unit_weight_kg") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            parse_weight(v).map_err(|reason| format!("identifier '{identifier}': {reason}"))?,
        ),
    };

    let notes = obj
        .get("notes")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(BomLineItem {
        identifier,
        description,
        quantity,
        unit,
        unit_weight_kg,
        notes,
    })
}

/// Parse a quantity that may arrive as a JSON number or numeric string.
///
/// Must be a non-negative integer; negative values, fractions, and
/// non-numeric strings fail the line.
fn parse_quantity(value: Option<&Value>) -> Result<u32, String> {
    let value = value.ok_or_else(|| "missing quantity".to_string())?;
    match value {
        Value::Number(n) => {
            if let Some(q) = n.as_u64() {
                u32::try_from(q).map_err(|_| format!("quantity {q} out of range"))
            } else if let Some(f) = n.as_f64() {
                if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
                    Ok(f as u32)
                } else {
                    Err(format!("quantity {f} is not a non-negative integer"))
                }
            } else {
                Err(format!("quantity {n} is negative"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u32>()
                .map_err(|_| format!("quantity '{s}' is not a non-negative integer"))
        }
        other => Err(format!("quantity has unexpected type: {other}")),
    }
}

/// Parse a per-unit weight (kg) from a number or numeric string.
fn parse_weight(value: &Value) -> Result<f64, String> {
    let w = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("unit_weight_kg {n} unreadable"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("unit_weight_kg '{s}' is not a number"))?,
        other => return Err(format!("unit_weight_kg has unexpected type: {other}")),
    };
    if w.is_finite() && w >= 0.0 {
        Ok(w)
    } else {
        Err(format!("unit_weight_kg {w} is not a non-negative number"))
    }
}

fn concat_notes(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => Some(format!("{a}; {b}")),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}
