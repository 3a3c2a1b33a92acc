//! Text clean-up for step descriptions, test data and role names.
//!
//! Test-management services hand back rich text: HTML tags, escaped entities,
//! non-breaking spaces and the occasional zero-width space pasted in from a
//! browser. Patterns are written against plain sentences, so everything is
//! flattened here before matching.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::TestDataRecord;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern"));
static TRAILING: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.\s]+$").expect("trailing pattern"));

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Strip markup and entities from a fragment of rich text
pub fn strip_markup(text: &str) -> String {
    TAG.replace_all(text, "")
        .replace("&nbsp;", "")
        .replace("&lt;", "")
        .replace("&gt;", "")
        .replace("&quot;", "")
        .replace(ZERO_WIDTH_SPACE, "")
}

/// Normalise a step sentence for matching.
///
/// Removes markup, then trailing periods and whitespace, so "Click Save." and
/// "Click Save" are the same step.
pub fn normalize_step_text(text: &str) -> String {
    let stripped = strip_markup(text);
    TRAILING.replace(stripped.trim(), "").into_owned()
}

/// Parse raw test data of the form `key: value<br>key: value`.
///
/// Lines without a colon are ignored. Only the first colon separates key from
/// value, so values such as URLs survive intact.
pub fn parse_test_data(raw: &str) -> TestDataRecord {
    let mut record = TestDataRecord::new();
    for line in LINE_BREAK.split(raw) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = strip_markup(key).trim().to_string();
        if key.is_empty() {
            continue;
        }
        record.insert(key, strip_markup(value).trim().to_string());
    }
    record
}

/// Canonical form of an actor role name
pub fn normalize_role(role: &str) -> String {
    role.replace(ZERO_WIDTH_SPACE, "").trim().to_lowercase()
}

/// Split a comma separated list of scenario keys, dropping blanks and spaces
pub fn split_key_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|k| k.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|k| !k.is_empty())
        .collect()
}
