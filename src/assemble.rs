//! Document assembly: combine extracted BOMs into a LaTeX report.
//!
//! Assembly is a pure, deterministic function of its inputs: the same
//! BOMs in the same order always yield byte-identical LaTeX source. No
//! timestamps, no randomness, no filesystem reads during rendering other
//! than an existence check for the optional source-image figure. That
//! makes reports diffable and re-running a report on stored sessions
//! reproducible.
//!
//! Structure is one section per source image, items in extraction order.
//! The assembler never merges or reorders across BOMs — a drawing's
//! section reflects exactly what was extracted from that drawing.

use crate::bom::{Bom, SourceRef};
use crate::error::BomError;
use std::fmt::Write as _;

/// One section of an assembled report: a source drawing plus its BOM.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSection {
    pub heading: String,
    pub source: SourceRef,
    pub bom: Bom,
}

/// A report assembled from one or more extraction results.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDocument {
    pub title: String,
    pub summary_text: Option<String>,
    pub sections: Vec<DocumentSection>,
}

/// Assemble BOMs (and optional free summary text) into a document.
///
/// Section order follows input order. Returns
/// [`BomError::EmptyDocument`] when there is nothing to put in the
/// report at all.
pub fn assemble(
    boms: Vec<Bom>,
    summary_text: Option<String>,
    title: impl Into<String>,
) -> Result<AssembledDocument, BomError> {
    let summary_text = summary_text.filter(|s| !s.trim().is_empty());
    if boms.is_empty() && summary_text.is_none() {
        return Err(BomError::EmptyDocument);
    }

    let sections = boms
        .into_iter()
        .map(|bom| DocumentSection {
            heading: bom.source.label(),
            source: bom.source.clone(),
            bom,
        })
        .collect();

    Ok(AssembledDocument {
        title: title.into(),
        summary_text,
        sections,
    })
}

impl AssembledDocument {
    /// Render the document to LaTeX source.
    ///
    /// Pure function of `self`: rendering twice yields identical bytes.
    /// Source images are embedded with `\includegraphics` only when the
    /// file still exists at render time (stored sessions may outlive
    /// their rasterized page files).
    pub fn to_latex(&self) -> String {
        let mut out = String::new();

        out.push_str("\\documentclass[11pt]{article}\n");
        out.push_str("\\usepackage[margin=2cm]{geometry}\n");
        out.push_str("\\usepackage{longtable}\n");
        out.push_str("\\usepackage{graphicx}\n");
        out.push_str("\\usepackage[utf8]{inputenc}\n");
        out.push_str("\\begin{document}\n\n");

        let _ = writeln!(out, "\\title{{{}}}", escape(&self.title));
        out.push_str("\\date{}\n\\maketitle\n\n");

        if let Some(ref summary) = self.summary_text {
            out.push_str("\\section*{Summary}\n");
            let _ = writeln!(out, "{}\n", escape(summary));
        }

        for section in &self.sections {
            let _ = writeln!(out, "\\section*{{{}}}", escape(&section.heading));

            if section.source.path.exists() && section.source.page_index.is_none() {
                let _ = writeln!(
                    out,
                    "\\begin{{center}}\n\\includegraphics[width=0.9\\textwidth]{{{}}}\n\\end{{center}}",
                    section.source.path.display()
                );
            }

            render_bom_table(&mut out, &section.bom);

            if section.bom.partial {
                out.push_str(
                    "\\noindent\\textit{Partial extraction: some table lines could not be validated.}\n",
                );
            }
            out.push('\n');
        }

        out.push_str("\\end{document}\n");
        out
    }
}

fn render_bom_table(out: &mut String, bom: &Bom) {
    if bom.items.is_empty() {
        out.push_str("\\noindent No line items were extracted from this drawing.\n");
        return;
    }

    out.push_str("\\begin{longtable}{l p{5.5cm} r l r p{3.5cm}}\n");
    out.push_str("\\hline\n");
    out.push_str("Identifier & Description & Qty & Unit & Weight (kg) & Notes \\\\\n");
    out.push_str("\\hline\n\\endhead\n");

    for item in &bom.items {
        let weight = item
            .unit_weight_kg
            .map(|w| format!("{w:.2}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{} & {} & {} & {} & {} & {} \\\\",
            escape(&item.identifier),
            escape(&item.description),
            item.quantity,
            item.unit,
            weight,
            escape(item.notes.as_deref().unwrap_or("")),
        );
    }

    out.push_str("\\hline\n");
    let _ = writeln!(
        out,
        "\\multicolumn{{2}}{{l}}{{Total quantity}} & {} & & & \\\\",
        bom.total_quantity()
    );
    out.push_str("\\hline\n\\end{longtable}\n");
}

/// Escape text for safe inclusion in LaTeX body content.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' => out.push_str("\\&"),
            '%' => out.push_str("\\%"),
            '$' => out.push_str("\\$"),
            '#' => out.push_str("\\#"),
            '_' => out.push_str("\\_"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::{BomLineItem, Unit};
    use chrono::{TimeZone, Utc};

    fn bom(path: &str, page: Option<usize>, identifiers: &[&str]) -> Bom {
        Bom {
            source: match page {
                Some(p) => SourceRef::page(path, p),
                None => SourceRef::image(path),
            },
            items: identifiers
                .iter()
                .map(|id| BomLineItem {
                    identifier: (*id).to_string(),
                    description: format!("Part {id}"),
                    quantity: 2,
                    unit: Unit::Piece,
                    unit_weight_kg: None,
                    notes: None,
                })
                .collect(),
            extracted_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
            partial: false,
            diagnostics: vec![],
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = assemble(vec![], None, "Report").unwrap_err();
        assert!(matches!(err, BomError::EmptyDocument));
        // Whitespace-only summary counts as empty too.
        let err = assemble(vec![], Some("   ".into()), "Report").unwrap_err();
        assert!(matches!(err, BomError::EmptyDocument));
    }

    #[test]
    fn summary_alone_is_enough() {
        let doc = assemble(vec![], Some("Three door types.".into()), "Report").unwrap();
        assert!(doc.sections.is_empty());
        assert!(doc.to_latex().contains("Three door types."));
    }

    #[test]
    fn sections_follow_input_order() {
        let doc = assemble(
            vec![
                bom("doors.pdf", Some(2), &["B1"]),
                bom("doors.pdf", Some(1), &["A1"]),
            ],
            None,
            "Door schedule",
        )
        .unwrap();
        assert_eq!(doc.sections[0].heading, "doors.pdf (page 2)");
        assert_eq!(doc.sections[1].heading, "doors.pdf (page 1)");

        let latex = doc.to_latex();
        let first = latex.find("page 2").unwrap();
        let second = latex.find("page 1").unwrap();
        assert!(first < second);
    }

    #[test]
    fn rendering_is_byte_identical() {
        let doc = assemble(
            vec![bom("plan.png", None, &["A1", "A2"])],
            Some("Summary.".into()),
            "Report",
        )
        .unwrap();
        assert_eq!(doc.to_latex(), doc.to_latex());
    }

    #[test]
    fn special_characters_are_escaped() {
        let mut b = bom("plan.png", None, &[]);
        b.items.push(BomLineItem {
            identifier: "A_1".into(),
            description: "Bracket 50% steel & zinc #3".into(),
            quantity: 1,
            unit: Unit::Piece,
            unit_weight_kg: None,
            notes: Some("cost $4 {net}".into()),
        });
        let latex = assemble(vec![b], None, "R").unwrap().to_latex();
        assert!(latex.contains("A\\_1"));
        assert!(latex.contains("50\\% steel \\& zinc \\#3"));
        assert!(latex.contains("\\$4 \\{net\\}"));
        assert!(!latex.contains("50% "));
    }

    #[test]
    fn partial_bom_gets_a_caveat() {
        let mut b = bom("plan.png", None, &["A1"]);
        b.partial = true;
        let latex = assemble(vec![b], None, "R").unwrap().to_latex();
        assert!(latex.contains("Partial extraction"));
    }

    #[test]
    fn empty_bom_section_renders_placeholder() {
        let latex = assemble(vec![bom("plan.png", None, &[])], None, "R")
            .unwrap()
            .to_latex();
        assert!(latex.contains("No line items"));
        assert!(!latex.contains("\\begin{longtable}"));
    }
}
