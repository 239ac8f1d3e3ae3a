//! Offline integration tests: the normalize → store → assemble path,
//! with no network and no external tools.

use chrono::Utc;
use planbom::pipeline::normalize::normalize;
use planbom::{
    assemble, BomError, Provenance, RawExtractionResult, ResultStore, SessionContext, SourceRef,
    Unit,
};

fn raw_output(text: &str) -> RawExtractionResult {
    RawExtractionResult {
        model_output_text: text.to_string(),
        confidence_hint: None,
        extracted_at: Utc::now(),
        input_tokens: 120,
        output_tokens: 60,
        retries: 0,
    }
}

const SAMPLE_OUTPUT: &str = r#"{
  "items": [
    {"identifier": "D-01", "description": "Entry door, oak", "quantity": 1, "unit": "pcs",
     "unit_weight_kg": 42.0},
    {"identifier": "H-12", "description": "Hinge set", "quantity": "3", "unit": "pcs"},
    {"identifier": "S-03", "description": "Door seal", "quantity": 5, "unit": "mt"}
  ],
  "confidence": 0.92
}"#;

#[test]
fn normalize_store_reload_assemble() {
    let dir = tempfile::tempdir().unwrap();

    let bom = normalize(raw_output(SAMPLE_OUTPUT), SourceRef::page("doors.pdf", 1)).unwrap();
    assert_eq!(bom.items.len(), 3);
    assert!(!bom.partial);
    assert_eq!(bom.items[1].quantity, 3);
    assert_eq!(bom.items[2].unit, Unit::Meter);

    let session = SessionContext::with_store(dir.path()).unwrap();
    let store = session.store().unwrap();
    let provenance = Provenance {
        source_path: "doors.pdf".into(),
        page_index: Some(1),
        model: Some("gpt-4o".into()),
        extracted_at: bom.extracted_at,
    };
    let id = store.save(&bom, &provenance, SAMPLE_OUTPUT).unwrap();

    // Reload through a fresh store handle, as a later process would.
    let reopened = ResultStore::open(dir.path()).unwrap();
    let record = reopened.load(&id).unwrap();
    assert_eq!(record.bom, bom);
    assert_eq!(record.provenance.model.as_deref(), Some("gpt-4o"));
    assert_eq!(reopened.load_raw(&id).unwrap(), SAMPLE_OUTPUT);

    // Assemble a report from the stored BOM.
    let doc = assemble(vec![record.bom], None, "Door schedule").unwrap();
    let latex = doc.to_latex();
    assert!(latex.contains("D-01"));
    assert!(latex.contains("doors.pdf (page 1)"));
    assert!(latex.contains("\\begin{longtable}"));
    // Deterministic rendering.
    assert_eq!(latex, doc.to_latex());
}

#[test]
fn store_survives_reopen_and_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let bom = normalize(raw_output(SAMPLE_OUTPUT), SourceRef::image("plan.png")).unwrap();
    let provenance = Provenance {
        source_path: "plan.png".into(),
        page_index: None,
        model: None,
        extracted_at: bom.extracted_at,
    };

    let ids: Vec<String> = {
        let store = ResultStore::open(dir.path()).unwrap();
        (0..3)
            .map(|i| store.save(&bom, &provenance, &format!("raw-{i}")).unwrap())
            .collect()
    };

    let reopened = ResultStore::open(dir.path()).unwrap();
    assert_eq!(reopened.list().unwrap(), ids);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(reopened.load_raw(id).unwrap(), format!("raw-{i}"));
    }
}

#[test]
fn degraded_extraction_survives_the_whole_path() {
    let dir = tempfile::tempdir().unwrap();
    let degraded = r#"```json
{"items": [
  {"identifier": "A1", "description": "ok", "quantity": 2, "unit": "pcs"},
  {"identifier": "A2", "description": "bad qty", "quantity": -3, "unit": "pcs"}
]}
```"#;

    let bom = normalize(raw_output(degraded), SourceRef::image("plan.png")).unwrap();
    assert!(bom.partial);
    assert_eq!(bom.items.len(), 1);
    assert_eq!(bom.diagnostics.len(), 1);

    let store = ResultStore::open(dir.path()).unwrap();
    let provenance = Provenance {
        source_path: "plan.png".into(),
        page_index: None,
        model: None,
        extracted_at: bom.extracted_at,
    };
    let id = store.save(&bom, &provenance, degraded).unwrap();

    // Partial flag and diagnostics round-trip through the store.
    let record = store.load(&id).unwrap();
    assert!(record.bom.partial);
    assert_eq!(record.bom.diagnostics.len(), 1);

    // And the report notes the degradation.
    let latex = assemble(vec![record.bom], None, "R").unwrap().to_latex();
    assert!(latex.contains("Partial extraction"));
}

#[test]
fn assemble_nothing_is_empty_document() {
    let err = assemble(vec![], None, "Empty").unwrap_err();
    assert!(matches!(err, BomError::EmptyDocument));
}
