//! Feedback message formatting.
//!
//! Offsets and lengths of style spans are counted in Unicode scalar values,
//! not bytes.

use serde::{Deserialize, Serialize};

/// A feedback submission posted by the mobile client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackForm {
    /// Short label shown in bold
    pub header: String,
    /// Numeric score
    pub rating: f64,
    /// Free text body
    #[serde(alias = "desc")]
    pub description: String,
}

/// Emphasis applied to a span of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleKind {
    /// Bold text
    Bold,
    /// Italic text
    Italic,
}

/// A styled sub-range of a message, in code points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleSpan {
    /// Kind of emphasis
    pub kind: StyleKind,
    /// Start offset in code points
    pub offset: usize,
    /// Length in code points
    pub length: usize,
}

/// Message text together with its style annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledMessage {
    /// Plain message body
    pub text: String,
    /// Style spans over `text`
    pub spans: Vec<StyleSpan>,
}

/// Build the rating line, e.g. `Rating: 4.5 ⭐`
#[must_use]
pub fn rating_line(rating: f64) -> String {
    format!("Rating: {rating:.1} ⭐")
}

/// Render a feedback form as a styled message.
///
/// The body is `header`, the rating line and `description`, separated by
/// newlines. The header is bold. The italic span starts at the code-point
/// length of the header, without counting the newline after it; existing
/// clients depend on that offset.
#[must_use]
pub fn format_feedback(form: &FeedbackForm) -> StyledMessage {
    let rating = rating_line(form.rating);
    let header_len = form.header.chars().count();

    let spans = vec![
        StyleSpan {
            kind: StyleKind::Bold,
            offset: 0,
            length: header_len,
        },
        StyleSpan {
            kind: StyleKind::Italic,
            offset: header_len,
            length: rating.chars().count(),
        },
    ];

    StyledMessage {
        text: format!("{}\n{}\n{}", form.header, rating, form.description),
        spans,
    }
}
