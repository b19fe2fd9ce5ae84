//! Input validation utilities.
//!
//! This module contains functions for validating user inputs to ensure they meet
//! correctness requirements before being written to the database.

use crate::{LabError, LabResult};
use rust_decimal::Decimal;

/// Validates the stored path of an outsourced result attachment.
///
/// Only the path is recorded; the file itself lives in external storage.
/// - Rejects empty or whitespace-only strings
/// - Requires a `.pdf` extension (case-insensitive)
/// - Rejects parent-directory components
///
/// # Arguments
///
/// * `path` - The attachment path as submitted.
///
/// # Errors
///
/// Returns a `LabError::InvalidInput` if the path is invalid.
pub fn validate_pdf_attachment(path: &str) -> LabResult<()> {
    const MAX_PATH_LEN: usize = 255;

    let path = path.trim();
    if path.is_empty() {
        return Err(LabError::InvalidInput(
            "attachment path cannot be empty".into(),
        ));
    }

    if path.len() > MAX_PATH_LEN {
        return Err(LabError::InvalidInput(format!(
            "attachment path exceeds maximum length of {} characters",
            MAX_PATH_LEN
        )));
    }

    if !path.to_ascii_lowercase().ends_with(".pdf") {
        return Err(LabError::InvalidInput(
            "only PDF files can be attached".into(),
        ));
    }

    if path.split(['/', '\\']).any(|part| part == "..") {
        return Err(LabError::InvalidInput(
            "attachment path must not contain '..'".into(),
        ));
    }

    Ok(())
}

/// Validates that a plan price is not negative and has at most two
/// decimal places. Trailing zeros beyond the cents are accepted.
pub fn validate_price(price: Decimal) -> LabResult<()> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(LabError::InvalidInput(format!(
            "price must not be negative: {price}"
        )));
    }
    if price.normalize().scale() > 2 {
        return Err(LabError::InvalidInput(format!(
            "price must not have more than two decimal places: {price}"
        )));
    }
    Ok(())
}

/// Validates that an order form selected at least one exam.
pub fn validate_exam_selection(exam_ids: &[i64]) -> LabResult<()> {
    if exam_ids.is_empty() {
        return Err(LabError::InvalidInput("no exam selected".into()));
    }
    Ok(())
}

/// Turns a live-search fragment into a substring `LIKE` pattern; `None`
/// when nothing is left to search for after trimming.
///
/// `\`, `%` and `_` are escaped, so the pattern must be used with
/// `ESCAPE '\'`.
pub fn search_pattern(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut pattern = String::with_capacity(trimmed.len() + 2);
    pattern.push('%');
    for c in trimmed.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}
