//! crates/expense_tracker_core/src/extraction.rs
//!
//! Pure text utilities used by the conversation engine: amount extraction with
//! Indonesian magnitude shorthand, description cleaning, category
//! normalization and validation, and the batch/correction reply grammar.

use once_cell::sync::Lazy;
use regex::Regex;

/// An amount token: optional currency marker, digits grouped by `.`/`,`, and an
/// optional magnitude suffix bound to the number.
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:rp\.?|idr)\s*)?([0-9]+(?:[.,][0-9]+)*)(?:\s*(k|rb|ribu|jt|juta|m)\b)?")
        .expect("amount pattern is valid")
});

static CORRECTION_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)[.:]?\s+(.+)$").expect("correction pattern is valid"));

pub const MAX_CATEGORY_CHARS: usize = 25;
pub const MAX_CATEGORY_WORDS: usize = 3;

const CANCEL_KEYWORDS: [&str; 3] = ["/batal", "batal", "cancel"];
const DONE_KEYWORDS: [&str; 3] = ["/selesai", "selesai", "done"];

//=========================================================================================
// Amounts and Descriptions
//=========================================================================================

/// Extracts the first amount mentioned in `text`, in whole Rupiah.
///
/// `.` is a thousands separator and `,` a decimal point (`1.500.000`, `1,5jt`).
/// A suffix directly after the number scales it: `k`/`rb`/`ribu` by one
/// thousand, `jt`/`juta`/`m` by one million. Returns `0` when nothing matches.
pub fn extract_amount(text: &str) -> i64 {
    let Some(caps) = AMOUNT_RE.captures(text) else {
        return 0;
    };
    let Some(value) = caps.get(1).and_then(|m| parse_grouped_number(m.as_str())) else {
        return 0;
    };
    let multiplier = caps
        .get(2)
        .map(|m| magnitude(m.as_str()))
        .unwrap_or(1.0);
    (value * multiplier).round() as i64
}

fn parse_grouped_number(raw: &str) -> Option<f64> {
    let without_dots: String = raw.chars().filter(|c| *c != '.').collect();
    let normalized = match without_dots.matches(',').count() {
        0 => without_dots,
        1 => without_dots.replace(',', "."),
        // "1,000,000": more than one comma can only be grouping.
        _ => without_dots.replace(',', ""),
    };
    normalized.parse::<f64>().ok()
}

fn magnitude(suffix: &str) -> f64 {
    match suffix.to_lowercase().as_str() {
        "k" | "rb" | "ribu" => 1_000.0,
        "jt" | "juta" | "m" => 1_000_000.0,
        _ => 1.0,
    }
}

/// Removes every amount (with its currency marker and suffix) from `text` and
/// collapses the remaining whitespace.
pub fn clean_description(text: &str) -> String {
    let stripped = AMOUNT_RE.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cases `text`, then upper-cases the first letter of every word.
pub fn capitalize_words(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//=========================================================================================
// Batch Splitting
//=========================================================================================

/// Byte offsets of the commas that separate activities. A comma between two
/// digits is a decimal separator (`1,5jt`) and does not count.
fn delimiter_commas(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    text.char_indices()
        .filter(|(i, c)| {
            if *c != ',' {
                return false;
            }
            let before = i.checked_sub(1).map(|p| bytes[p].is_ascii_digit()).unwrap_or(false);
            let after = bytes.get(i + 1).map(|b| b.is_ascii_digit()).unwrap_or(false);
            !(before && after)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Whether the message looks like several activities at once.
pub fn is_batch_input(text: &str) -> bool {
    text.contains('\n') || !delimiter_commas(text).is_empty()
}

/// Splits a batch message into trimmed, non-empty activities. Commas win: when
/// any delimiting comma is present, newlines are not used as separators.
pub fn split_activities(text: &str) -> Vec<String> {
    let commas = delimiter_commas(text);
    let pieces: Vec<&str> = if commas.is_empty() {
        text.split('\n').collect()
    } else {
        let mut pieces = Vec::with_capacity(commas.len() + 1);
        let mut start = 0;
        for comma in commas {
            pieces.push(&text[start..comma]);
            start = comma + 1;
        }
        pieces.push(&text[start..]);
        pieces
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

//=========================================================================================
// Corrections
//=========================================================================================

/// Why a correction was not accepted as a category label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRejection {
    Empty,
    TooLong,
    ContainsLink,
    Numeric,
    TooManyWords,
}

/// Splits a batch correction reply into entries. Commas and newlines both
/// separate entries, in any mix.
pub fn split_corrections(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks that `text` is a plausible category label and returns it trimmed.
pub fn validate_category(text: &str) -> Result<String, CategoryRejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CategoryRejection::Empty);
    }
    if trimmed.chars().count() > MAX_CATEGORY_CHARS {
        return Err(CategoryRejection::TooLong);
    }
    if trimmed.to_lowercase().contains("http") {
        return Err(CategoryRejection::ContainsLink);
    }
    let numeric = trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',');
    if numeric {
        return Err(CategoryRejection::Numeric);
    }
    if trimmed.split_whitespace().count() > MAX_CATEGORY_WORDS {
        return Err(CategoryRejection::TooManyWords);
    }
    Ok(trimmed.to_string())
}

/// Parses `"<index>[.:] <category>"`.
pub fn parse_correction_line(line: &str) -> Option<(usize, String)> {
    let caps = CORRECTION_LINE_RE.captures(line.trim())?;
    let index = caps.get(1)?.as_str().parse::<usize>().ok()?;
    let category = caps.get(2)?.as_str().trim().to_string();
    Some((index, category))
}

pub fn is_cancel_keyword(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    CANCEL_KEYWORDS.contains(&lowered.as_str())
}

pub fn is_done_keyword(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    DONE_KEYWORDS.contains(&lowered.as_str())
}
