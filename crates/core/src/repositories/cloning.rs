//! Per-visit copies of exam templates.
//!
//! A template is never billed directly. When an exam is ordered, the template
//! is copied into a fresh exam row that owns:
//!
//! - its own plan rows, one per selected template plan (a price snapshot, so
//!   later template edits leave existing orders untouched);
//! - its own reference ranges, each with the same flags as the template range
//!   and copies of the factor and expected-value rows that the flags call for.
//!
//! Obtained values on factor and expected rows are visit results and start
//! empty on the copy.

use crate::error::{LabError, LabResult};
use crate::models::ReferenceRange;
use crate::repositories::exams::{fetch_exam, insert_exam, insert_plan, ExamFields};
use sqlx::SqliteConnection;

/// Copies template `template_id` into a new billable exam and returns its id.
///
/// Only template plans whose ids appear in `selected_plan_ids` are copied;
/// ids belonging to other templates are ignored. An empty or non-matching
/// selection leaves the copy without plans, which billing reports as
/// `LabError::MissingPrice`.
///
/// Runs on the caller's connection so it commits or rolls back with the
/// surrounding order transaction.
///
/// # Errors
///
/// - `LabError::NotFound` if the template does not exist.
/// - `LabError::InvalidInput` if `template_id` is not a template.
pub async fn clone_template(
    conn: &mut SqliteConnection,
    template_id: i64,
    selected_plan_ids: &[i64],
) -> LabResult<i64> {
    let template = fetch_exam(&mut *conn, template_id).await?;
    if !template.is_template {
        return Err(LabError::InvalidInput(format!(
            "exam {template_id} is not a template"
        )));
    }

    let clone_id = insert_exam(
        conn,
        &ExamFields {
            name: &template.name,
            material: &template.material,
            method: &template.method,
            comment: template.comment.as_deref(),
            outsourced: template.outsourced,
            template_id: Some(template_id),
        },
    )
    .await?;

    let plans: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT p.id, p.name, p.price
         FROM pricing_plans p
         JOIN exam_plans ep ON ep.plan_id = p.id
         WHERE ep.exam_id = ?1
         ORDER BY p.id",
    )
    .bind(template_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut copied_plans = 0;
    for (plan_id, name, price) in plans {
        if selected_plan_ids.contains(&plan_id) {
            insert_plan(conn, clone_id, &name, &price, true).await?;
            copied_plans += 1;
        }
    }

    let references: Vec<ReferenceRange> =
        sqlx::query_as("SELECT * FROM reference_ranges WHERE exam_id = ?1 ORDER BY id")
            .bind(template_id)
            .fetch_all(&mut *conn)
            .await?;
    let reference_count = references.len();

    for reference in references {
        clone_reference(conn, &reference, clone_id).await?;
    }

    tracing::info!(
        template_id,
        clone_id,
        plans = copied_plans,
        references = reference_count,
        "exam template cloned"
    );
    Ok(clone_id)
}

async fn clone_reference(
    conn: &mut SqliteConnection,
    reference: &ReferenceRange,
    clone_id: i64,
) -> LabResult<()> {
    let new_id = sqlx::query(
        "INSERT INTO reference_ranges
            (exam_id, label, lower_bound, upper_bound, obtained_value, has_factor, has_expected)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(clone_id)
    .bind(&reference.label)
    .bind(&reference.lower_bound)
    .bind(&reference.upper_bound)
    .bind(&reference.obtained_value)
    .bind(reference.has_factor)
    .bind(reference.has_expected)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let kind = reference.kind();
    if kind.has_factor() {
        sqlx::query(
            "INSERT INTO factor_entries (reference_id, label, age_bracket, lower_bound, upper_bound)
             SELECT ?1, label, age_bracket, lower_bound, upper_bound
             FROM factor_entries WHERE reference_id = ?2 ORDER BY id",
        )
        .bind(new_id)
        .bind(reference.id)
        .execute(&mut *conn)
        .await?;
    }
    if kind.has_expected() {
        sqlx::query(
            "INSERT INTO expected_values (reference_id, value_type, expected_value)
             SELECT ?1, value_type, expected_value
             FROM expected_values WHERE reference_id = ?2 ORDER BY id",
        )
        .bind(new_id)
        .bind(reference.id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::models::{ExamStatus, NewFactor, ReferenceKind};
    use crate::repositories::exams::test_support::{draft, expected, plan, reference};
    use crate::repositories::exams::ExamService;
    use rust_decimal::Decimal;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_cbc_clone_copies_plain_reference_and_selected_plan() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let cbc = service.create_template(draft("CBC")).await.unwrap();
        let selected = service
            .add_plan(cbc.id, plan("Particular", 3500))
            .await
            .unwrap();
        service
            .add_plan(cbc.id, plan("Convênio", 2000))
            .await
            .unwrap();
        service
            .add_reference(cbc.id, reference("Leucócitos", Some("4.0"), Some("11.0")))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, cbc.id, &[selected.id])
            .await
            .expect("clone should succeed");
        drop(conn);

        let detail = service.get_exam_detail(clone_id).await.unwrap();
        assert!(!detail.exam.is_template);
        assert_eq!(detail.exam.template_id, Some(cbc.id));
        assert_eq!(detail.exam.name, "CBC");
        assert_eq!(detail.exam.status, ExamStatus::Waiting);
        assert_ne!(detail.exam.code, cbc.code);

        assert_eq!(detail.references.len(), 1);
        let copied = &detail.references[0];
        assert_eq!(copied.kind, ReferenceKind::Plain);
        assert_eq!(copied.reference.lower_bound.as_deref(), Some("4.0"));
        assert_eq!(copied.reference.upper_bound.as_deref(), Some("11.0"));

        assert_eq!(detail.plans.len(), 1);
        assert_eq!(detail.plans[0].name, "Particular");
        assert_eq!(detail.plans[0].price, Decimal::new(3500, 2));
        assert!(detail.plans[0].enabled);
        assert_ne!(detail.plans[0].id, selected.id);
    }

    #[tokio::test]
    async fn test_clone_preserves_each_reference_class() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let template = service.create_template(draft("Painel")).await.unwrap();

        service
            .add_reference(template.id, reference("Plain", Some("1"), Some("2")))
            .await
            .unwrap();

        let factor = service
            .add_reference(template.id, reference("Factor", None, None))
            .await
            .unwrap();
        for label in ["Homens", "Mulheres"] {
            service
                .add_factor(
                    factor.id,
                    NewFactor {
                        label: Some(label.into()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let expected_only = service
            .add_reference(template.id, reference("Expected", None, None))
            .await
            .unwrap();
        service
            .add_expected(expected_only.id, expected("Aspecto", "Límpido"))
            .await
            .unwrap();

        let both = service
            .add_reference(template.id, reference("Both", None, None))
            .await
            .unwrap();
        service
            .add_factor(both.id, NewFactor::default())
            .await
            .unwrap();
        for value in ["Negativo", "Traços", "Positivo"] {
            service
                .add_expected(both.id, expected("Proteína", value))
                .await
                .unwrap();
        }

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template.id, &[]).await.unwrap();
        drop(conn);

        let original = service.get_exam_detail(template.id).await.unwrap();
        let copy = service.get_exam_detail(clone_id).await.unwrap();

        assert_eq!(copy.references.len(), original.references.len());
        for (a, b) in original.references.iter().zip(&copy.references) {
            assert_eq!(a.reference.label, b.reference.label);
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.factors.len(), b.factors.len());
            assert_eq!(a.expected.len(), b.expected.len());
            assert_eq!(b.reference.exam_id, clone_id);
        }

        let kinds: Vec<ReferenceKind> = copy.references.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ReferenceKind::Plain,
                ReferenceKind::Factor,
                ReferenceKind::Expected,
                ReferenceKind::FactorAndExpected,
            ]
        );
    }

    #[tokio::test]
    async fn test_clone_plans_equal_selected_subset() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let template = service.create_template(draft("Lipidograma")).await.unwrap();
        let mut plan_ids = Vec::new();
        for (name, cents) in [("A", 1000), ("B", 2000), ("C", 3000)] {
            plan_ids.push(
                service
                    .add_plan(template.id, plan(name, cents))
                    .await
                    .unwrap()
                    .id,
            );
        }
        let other = service.create_template(draft("Outro")).await.unwrap();
        let foreign = service
            .add_plan(other.id, plan("X", 999))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template.id, &[plan_ids[2], foreign.id, plan_ids[0]])
            .await
            .unwrap();
        let empty_id = clone_template(&mut conn, template.id, &[]).await.unwrap();
        drop(conn);

        let names: BTreeSet<String> = service
            .get_exam_detail(clone_id)
            .await
            .unwrap()
            .plans
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, BTreeSet::from(["A".to_string(), "C".to_string()]));

        assert!(service.get_exam_detail(empty_id).await.unwrap().plans.is_empty());
    }

    #[tokio::test]
    async fn test_clone_does_not_carry_obtained_factor_values() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let template = service.create_template(draft("Hb")).await.unwrap();
        let range = service
            .add_reference(template.id, reference("Hb", None, None))
            .await
            .unwrap();
        let factor = service
            .add_factor(range.id, NewFactor::default())
            .await
            .unwrap();
        sqlx::query("UPDATE factor_entries SET obtained_factor = '14' WHERE id = ?1")
            .bind(factor.id)
            .execute(db.pool())
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let clone_id = clone_template(&mut conn, template.id, &[]).await.unwrap();
        drop(conn);

        let copy = service.get_exam_detail(clone_id).await.unwrap();
        assert_eq!(copy.references[0].factors[0].obtained_factor, None);
    }

    #[tokio::test]
    async fn test_clone_rejects_missing_and_non_template_sources() {
        let (db, _temp_dir) = setup_test_db().await;
        let service = ExamService::new(db.clone());
        let template = service.create_template(draft("Glicose")).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let err = clone_template(&mut conn, 404, &[]).await.unwrap_err();
        assert!(matches!(err, LabError::NotFound { entity: "exam", id: 404 }));

        let clone_id = clone_template(&mut conn, template.id, &[]).await.unwrap();
        let err = clone_template(&mut conn, clone_id, &[]).await.unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));
    }
}
