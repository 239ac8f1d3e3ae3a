//! Extraction prompts for the vision analysis service.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the JSON shape the normalizer expects is
//!    stated in exactly one place; changing a field name means editing the
//!    prompt and [`crate::pipeline::normalize`] together.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live model call.
//!
//! Callers can override the default via
//! [`crate::config::AnalysisConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// Default system prompt for extracting a Bill of Materials from a
/// drawing image.
///
/// The JSON shape requested here is the schema contract the normalizer
/// validates against. The service is not contractually bound to it, which
/// is why validation happens entirely on our side: any deviation is
/// reported, never guessed around.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert reader of engineering drawings. Your task is to extract the Bill of Materials (BOM) from the drawing image.

Follow these rules precisely:

1. WHAT TO EXTRACT
   - Every row of every parts/materials table on the sheet
   - Part identifiers exactly as printed (do not invent or renumber)
   - Quantities as printed; descriptions verbatim
   - Units as printed (pcs, m, kg, ...); do not convert between units
   - Per-unit weights in kilograms when the table states them

2. WHAT NOT TO DO
   - Do not guess values that are illegible or absent — omit the field
   - Do not merge or deduplicate rows
   - Do not reorder rows; keep the table's top-to-bottom order

3. OUTPUT FORMAT
   Return a single JSON object, and nothing else:
   {
     "items": [
       {
         "identifier": "A1",
         "description": "Steel bracket",
         "quantity": 2,
         "unit": "pcs",
         "unit_weight_kg": 0.45,
         "notes": "anodized"
       }
     ],
     "confidence": 0.9
   }

   - "quantity" may be a number or a numeric string
   - "unit_weight_kg", "notes" and "confidence" are optional
   - If the sheet has no BOM table, return {"items": []}
   - Do not wrap the response in ```json or ```"#;

/// Build the user context message when the caller supplied free text.
///
/// Sent as a separate message before the image so the model reads the
/// hint first (e.g. a plan summary from an earlier analysis pass).
pub fn context_message(context: &str) -> String {
    format!("DRAWING CONTEXT:\n{context}\n\nUse this context to improve extraction accuracy.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_states_the_schema() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"items\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"identifier\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"quantity\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"unit\""));
    }

    #[test]
    fn context_message_embeds_text() {
        let msg = context_message("door schedule, metric");
        assert!(msg.contains("door schedule, metric"));
        assert!(msg.starts_with("DRAWING CONTEXT:"));
    }
}
