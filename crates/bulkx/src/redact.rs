//! 🔒 Error reason redaction.
//!
//! Elasticsearch loves to be helpful. When a document fails to parse, the
//! reason text often ends with something like
//! `Preview of field's value: 'the customer's actual credit card number'`.
//! Helpful for debugging. Less helpful when it lands in a log aggregator
//! that forty people can read. 🦆
//!
//! So by default we keep only the first sentence of the reason.

/// ✂️ Trims an error reason down to its first sentence unless `capture_full` is set.
///
/// The cut happens at the first `.` that is followed by more content. The
/// returned text excludes the period itself, so
/// `"mapper_parsing_exception. Preview of field's value: 'x'"` becomes
/// `"mapper_parsing_exception"`. No boundary, no cut.
pub fn redact_error_reason(reason: &str, capture_full: bool) -> String {
    if capture_full {
        return reason.to_owned();
    }
    match reason.find('.') {
        // 🎯 only cut when the period is not the last character, otherwise there is nothing to hide
        Some(boundary) if boundary + 1 < reason.len() => reason[..boundary].to_owned(),
        _ => reason.to_owned(),
    }
}
