//! Printable documents: exam labels, order receipts and result reports.
//!
//! Data is gathered from the services and laid out with `printpdf` builtin
//! fonts. Rendering is split from loading so the layouts can be produced from
//! plain values.

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{ExamDetail, OrderDetail, ReferenceKind};
use crate::repositories::exams::ExamService;
use crate::repositories::orders::OrderService;
use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};
use std::io::BufWriter;

const A4_WIDTH: f32 = 210.0;
const A4_HEIGHT: f32 = 297.0;
const LABEL_WIDTH: f32 = 50.0;
const LABEL_HEIGHT: f32 = 25.0;
const TOP: f32 = 280.0;
const BOTTOM_MARGIN: f32 = 20.0;
const LEFT: f32 = 20.0;
const LABEL_TEXT_CHARS: usize = 30;

fn pdf_err(context: &str, e: impl std::fmt::Display) -> LabError {
    LabError::Pdf(format!("{context}: {e}"))
}

fn finish(doc: PdfDocumentReference) -> LabResult<Vec<u8>> {
    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf).map_err(|e| pdf_err("PDF save error", e))?;
    buf.into_inner().map_err(|e| pdf_err("PDF buffer error", e))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars - 1).chain(['.']).collect()
    }
}

fn dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("-")
}

/// A4 writer that moves down the page and breaks onto new pages.
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl<'a> PageWriter<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: PdfLayerReference) -> LabResult<Self> {
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| pdf_err("PDF font error", e))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| pdf_err("PDF font error", e))?;
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: TOP,
            pages: 1,
        })
    }

    fn text(&mut self, text: &str, size: f32, indent: f32, bold: bool) {
        if self.y < BOTTOM_MARGIN {
            self.pages += 1;
            let (page, layer) =
                self.doc
                    .add_page(Mm(A4_WIDTH), Mm(A4_HEIGHT), format!("Layer {}", self.pages));
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
        }
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(text, size, Mm(LEFT + indent), Mm(self.y), font);
        self.y -= size * 0.45 + 1.0;
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }
}

// ============================================================================
// LAYOUTS
// ============================================================================

/// Values printed on an adhesive tube label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelData {
    pub patient_name: String,
    pub exam_name: String,
    pub exam_code: String,
    pub material: String,
    pub date: String,
}

/// Renders a label sized for the lab's label printer.
pub fn render_label(label: &LabelData) -> LabResult<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Etiqueta {}", label.exam_code),
        Mm(LABEL_WIDTH),
        Mm(LABEL_HEIGHT),
        "Layer 1",
    );
    let layer = doc.get_page(page).get_layer(layer);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| pdf_err("PDF font error", e))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| pdf_err("PDF font error", e))?;

    layer.use_text(
        truncate(&label.patient_name, LABEL_TEXT_CHARS),
        7.0,
        Mm(2.0),
        Mm(20.0),
        &bold,
    );
    layer.use_text(
        truncate(&label.exam_name, LABEL_TEXT_CHARS),
        6.0,
        Mm(2.0),
        Mm(15.5),
        &font,
    );
    layer.use_text(
        truncate(&label.material, LABEL_TEXT_CHARS),
        6.0,
        Mm(2.0),
        Mm(11.5),
        &font,
    );
    layer.use_text(&label.exam_code, 9.0, Mm(2.0), Mm(6.0), &bold);
    layer.use_text(&label.date, 5.0, Mm(34.0), Mm(2.0), &font);

    finish(doc)
}

/// Renders the front-desk receipt for an order.
pub fn render_receipt(clinic_name: &str, detail: &OrderDetail) -> LabResult<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Atendimento {}", detail.order.id),
        Mm(A4_WIDTH),
        Mm(A4_HEIGHT),
        "Layer 1",
    );
    let layer = doc.get_page(page).get_layer(layer);
    let mut w = PageWriter::new(&doc, layer)?;

    w.text(clinic_name, 14.0, 0.0, true);
    w.gap(4.0);
    w.text(&format!("Atendimento no {}", detail.order.id), 11.0, 0.0, true);
    w.text(&format!("Paciente: {}", detail.patient_name), 10.0, 0.0, false);
    w.text(
        &format!("Data: {}", detail.order.registered_on.format("%d/%m/%Y")),
        10.0,
        0.0,
        false,
    );
    w.gap(4.0);

    w.text("EXAMES", 11.0, 0.0, true);
    for line in &detail.exams {
        let (plan, price) = match &line.plan {
            Some(plan) => (plan.name.as_str(), format!("R$ {:.2}", plan.price)),
            None => ("sem plano", "-".to_string()),
        };
        w.text(
            &format!(
                "{}  {}  ({})  {}",
                line.exam.code, line.exam.name, plan, price
            ),
            9.0,
            5.0,
            false,
        );
    }
    w.gap(4.0);

    w.text(
        &format!("Total: R$ {:.2}", detail.order.total),
        11.0,
        0.0,
        true,
    );
    w.text(
        &format!("Forma de pagamento: {}", detail.order.payment_method),
        9.0,
        0.0,
        false,
    );
    w.text(
        &format!("Pagamento: {}", detail.order.payment_status),
        9.0,
        0.0,
        false,
    );
    if let Some(comment) = detail.order.comment.as_deref() {
        w.text(&format!("Obs.: {comment}"), 9.0, 0.0, false);
    }

    drop(w);
    finish(doc)
}

/// Header values of a result report that do not live on the exam itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportHeader {
    pub clinic_name: String,
    pub patient_name: String,
    pub technician_name: Option<String>,
}

/// Renders the result report of a completed exam.
pub fn render_result_report(header: &ReportHeader, detail: &ExamDetail) -> LabResult<Vec<u8>> {
    let (doc, _pages) = layout_result_report(header, detail)?;
    finish(doc)
}

/// Lays out the result report; returns the document and its page count.
fn layout_result_report(
    header: &ReportHeader,
    detail: &ExamDetail,
) -> LabResult<(PdfDocumentReference, usize)> {
    let exam = &detail.exam;
    let (doc, page, layer) = PdfDocument::new(
        format!("Laudo {}", exam.code),
        Mm(A4_WIDTH),
        Mm(A4_HEIGHT),
        "Layer 1",
    );
    let layer = doc.get_page(page).get_layer(layer);
    let mut w = PageWriter::new(&doc, layer)?;

    w.text(&header.clinic_name, 14.0, 0.0, true);
    w.gap(4.0);
    w.text(&format!("Paciente: {}", header.patient_name), 10.0, 0.0, false);
    w.text(&format!("Código: {}", exam.code), 10.0, 0.0, false);
    w.text(
        &format!("Data: {}", exam.created_at.format("%d/%m/%Y")),
        10.0,
        0.0,
        false,
    );
    w.gap(4.0);

    w.text(&exam.name.to_uppercase(), 12.0, 0.0, true);
    w.text(&format!("Material: {}", exam.material), 9.0, 0.0, false);
    w.text(&format!("Método: {}", exam.method), 9.0, 0.0, false);
    w.gap(3.0);

    for item in &detail.references {
        let reference = &item.reference;
        match item.kind {
            ReferenceKind::Plain => {
                w.text(
                    &format!(
                        "{}: {}    Referência: {} a {}",
                        reference.label,
                        dash(reference.obtained_value.as_deref()),
                        dash(reference.lower_bound.as_deref()),
                        dash(reference.upper_bound.as_deref()),
                    ),
                    9.0,
                    0.0,
                    false,
                );
            }
            _ => {
                w.text(
                    &format!(
                        "{}: {}",
                        reference.label,
                        dash(reference.obtained_value.as_deref())
                    ),
                    9.0,
                    0.0,
                    true,
                );
            }
        }

        for factor in &item.factors {
            w.text(
                &format!(
                    "{} {}  {} a {}  obtido: {}",
                    dash(factor.label.as_deref()),
                    factor.age_bracket.as_deref().unwrap_or(""),
                    dash(factor.lower_bound.as_deref()),
                    dash(factor.upper_bound.as_deref()),
                    dash(factor.obtained_factor.as_deref()),
                ),
                8.0,
                6.0,
                false,
            );
        }
        for expected in &item.expected {
            w.text(
                &format!(
                    "{}: esperado {}  obtido: {}",
                    expected.value_type,
                    expected.expected_value,
                    dash(expected.obtained_value.as_deref()),
                ),
                8.0,
                6.0,
                false,
            );
        }
        w.gap(1.5);
    }

    if let Some(comment) = exam.comment.as_deref() {
        w.gap(3.0);
        w.text(&format!("Observações: {comment}"), 9.0, 0.0, false);
    }

    w.gap(10.0);
    w.text("______________________________", 9.0, 0.0, false);
    w.text(
        &format!("Responsável: {}", dash(header.technician_name.as_deref())),
        9.0,
        0.0,
        false,
    );

    let pages = w.pages;
    drop(w);
    Ok((doc, pages))
}

// ============================================================================
// DOCUMENT SERVICE
// ============================================================================

/// Loads document data and renders it.
#[derive(Clone, Debug)]
pub struct DocumentService {
    db: Database,
    clinic_name: String,
}

impl DocumentService {
    pub fn new(db: Database, cfg: &CoreConfig) -> Self {
        Self {
            db,
            clinic_name: cfg.clinic_name().to_string(),
        }
    }

    async fn order_of(&self, exam_id: i64) -> LabResult<OrderDetail> {
        let orders = OrderService::new(self.db.clone());
        let order = orders.order_for_exam(exam_id).await?.ok_or_else(|| {
            LabError::InvalidInput(format!("exam {exam_id} is not part of any order"))
        })?;
        orders.get_order(order.id).await
    }

    /// Label for an exam that belongs to an order.
    pub async fn exam_label_pdf(&self, exam_id: i64) -> LabResult<Vec<u8>> {
        let exam = ExamService::new(self.db.clone()).get_exam(exam_id).await?;
        let order = self.order_of(exam_id).await?;

        render_label(&LabelData {
            patient_name: order.patient_name,
            exam_name: exam.name,
            exam_code: exam.code,
            material: exam.material,
            date: order.order.registered_on.format("%d/%m/%Y").to_string(),
        })
    }

    pub async fn order_receipt_pdf(&self, order_id: i64) -> LabResult<Vec<u8>> {
        let detail = OrderService::new(self.db.clone()).get_order(order_id).await?;
        render_receipt(&self.clinic_name, &detail)
    }

    pub async fn result_report_pdf(&self, exam_id: i64) -> LabResult<Vec<u8>> {
        let detail = ExamService::new(self.db.clone())
            .get_exam_detail(exam_id)
            .await?;
        let order = self.order_of(exam_id).await?;

        let technician_name = match detail.exam.technician_id {
            Some(id) => sqlx::query_scalar("SELECT name FROM patients WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?,
            None => None,
        };

        render_result_report(
            &ReportHeader {
                clinic_name: self.clinic_name.clone(),
                patient_name: order.patient_name,
                technician_name,
            },
            &detail,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::models::{NewFactor, NewOrder, PaymentMethod, PaymentStatus};
    use crate::repositories::exams::test_support::{reference, seed_template};
    use crate::repositories::patients::test_support::seed_patient;
    use chrono::NaiveDate;
    use lab_types::NonEmptyText;

    fn config() -> CoreConfig {
        CoreConfig::new(
            "sqlite://unused.db".into(),
            1,
            NonEmptyText::new("Lab Vida").unwrap(),
        )
        .unwrap()
    }

    async fn seed_order(db: &Database, references: usize) -> (i64, i64, i64) {
        let patient = seed_patient(db, "Maria Souza").await;
        let (template, plan) = seed_template(db, "Hemograma completo", 3500).await;
        let exams = ExamService::new(db.clone());
        for i in 0..references {
            let range = exams
                .add_reference(template, reference(&format!("Item {i}"), Some("1"), Some("2")))
                .await
                .unwrap();
            if i % 5 == 0 {
                exams
                    .add_factor(range.id, NewFactor::default())
                    .await
                    .unwrap();
            }
        }

        let order = OrderService::new(db.clone())
            .create_order(NewOrder {
                patient_id: patient,
                exam_ids: vec![template],
                plan_ids: vec![plan],
                payment_method: PaymentMethod::Pix,
                payment_status: PaymentStatus::Paid,
                comment: None,
                registered_on: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                queue_entry_id: None,
            })
            .await
            .unwrap();
        (order.order.id, order.exams[0].exam.id, template)
    }

    #[test]
    fn test_truncate_marks_cut_text() {
        assert_eq!(truncate("Glicose", 30), "Glicose");
        assert_eq!(truncate("abcdef", 4), "abc.");
    }

    #[test]
    fn test_render_label_produces_pdf() {
        let bytes = render_label(&LabelData {
            patient_name: "Maria Aparecida de Souza Lima Ferreira".into(),
            exam_name: "Glicose".into(),
            exam_code: "102026000001".into(),
            material: "Sangue".into(),
            date: "19/10/2026".into(),
        })
        .expect("label should render");
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_documents_for_ordered_exam() {
        let (db, _temp_dir) = setup_test_db().await;
        let (order_id, clone_id, _) = seed_order(&db, 3).await;
        let docs = DocumentService::new(db, &config());

        let label = docs.exam_label_pdf(clone_id).await.unwrap();
        let receipt = docs.order_receipt_pdf(order_id).await.unwrap();
        let report = docs.result_report_pdf(clone_id).await.unwrap();

        for bytes in [label, receipt, report] {
            assert!(bytes.starts_with(b"%PDF"));
        }
    }

    #[tokio::test]
    async fn test_long_report_spills_onto_more_pages() {
        let (db, _temp_dir) = setup_test_db().await;
        let (_, clone_id, _) = seed_order(&db, 120).await;
        let docs = DocumentService::new(db.clone(), &config());

        let report = docs.result_report_pdf(clone_id).await.unwrap();
        assert!(report.starts_with(b"%PDF"));

        let detail = ExamService::new(db.clone())
            .get_exam_detail(clone_id)
            .await
            .unwrap();
        let header = ReportHeader {
            clinic_name: "Lab Teste".into(),
            patient_name: "Maria".into(),
            technician_name: None,
        };
        let (_, pages) = layout_result_report(&header, &detail).unwrap();
        assert!(pages > 1, "120 references should need more than one page, got {pages}");
    }

    #[tokio::test]
    async fn test_label_requires_an_order() {
        let (db, _temp_dir) = setup_test_db().await;
        let (_, _, template) = seed_order(&db, 0).await;
        let docs = DocumentService::new(db, &config());

        assert!(matches!(
            docs.exam_label_pdf(template).await,
            Err(LabError::InvalidInput(_))
        ));
        assert!(matches!(
            docs.order_receipt_pdf(404).await,
            Err(LabError::NotFound { .. })
        ));
    }
}
