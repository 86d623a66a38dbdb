//! Response condition selection
//!
//! The LLM stage can be asked to respond in one of three modes. When the
//! model returns several numbered options separated by blank lines, the
//! requested option is extracted; anything that does not match that shape
//! passes through untouched. Extraction is best-effort and never fails the
//! request.

use std::sync::LazyLock;

use regex::Regex;

/// How the generated reply should relate to the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Condition {
    /// Option 1: reproduce the input as-is
    #[default]
    Reproduce,
    /// Option 2: amplify the input
    Amplify,
    /// Option 3: counter the input
    Counter,
}

impl Condition {
    /// Parse a condition selector from a request field.
    ///
    /// Accepts the digits `1`, `2`, `3`; anything else (missing, empty,
    /// out of range, unparsable) defaults to [`Condition::Reproduce`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("2") => Self::Amplify,
            Some("3") => Self::Counter,
            _ => Self::Reproduce,
        }
    }

    /// The digit marking this condition's section in a multi-option reply
    #[must_use]
    pub fn digit(self) -> char {
        match self {
            Self::Reproduce => '1',
            Self::Amplify => '2',
            Self::Counter => '3',
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Reproduce => "reproduce",
            Self::Amplify => "amplify",
            Self::Counter => "counter",
        };
        f.write_str(name)
    }
}

static BLANK_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n\s*\n").ok());
static NUMBER_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\**\s*\d+\s*[.)\-]\s*").ok());
static TRAILING_EMPHASIS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s*\*+\s*$").ok());

/// Extract the section of `reply` selected by `condition`.
///
/// The reply is split into blank-line-delimited blocks. If a block contains
/// the condition's digit as a standalone token, the block after it is
/// selected (or the marker block itself when nothing follows) and collapsed
/// to a single cleaned-up line. Replies without at least two blocks, or
/// without a marker block, are returned unmodified.
#[must_use]
pub fn extract_choice(reply: &str, condition: Condition) -> String {
    select_block(reply, condition).unwrap_or_else(|| reply.to_string())
}

fn select_block(reply: &str, condition: Condition) -> Option<String> {
    let splitter = BLANK_LINE.as_ref()?;

    let blocks: Vec<&str> = splitter
        .split(reply)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect();
    if blocks.len() < 2 {
        return None;
    }

    let digit = condition.digit();
    let marker = blocks
        .iter()
        .position(|b| contains_standalone_digit(b, digit))?;
    let picked = blocks.get(marker + 1).unwrap_or(&blocks[marker]);

    let cleaned = collapse_block(picked, digit);
    if cleaned.is_empty() {
        Some((*picked).to_string())
    } else {
        Some(cleaned)
    }
}

/// Collapse a multi-line block to one line, dropping the numeric marker
/// line and decorative emphasis.
fn collapse_block(block: &str, digit: char) -> String {
    let mut text = block.trim().to_string();
    if let Some(re) = TRAILING_EMPHASIS.as_ref() {
        text = re.replace(&text, "").to_string();
    }

    let mut lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() > 1 {
        lines.retain(|l| !contains_standalone_digit(l, digit));
        if lines.is_empty() {
            lines = text.lines().map(str::trim).take(1).collect();
        }
    }
    let mut one_line = lines.join(" ");

    if let Some(re) = NUMBER_PREFIX.as_ref() {
        one_line = re.replace(&one_line, "").to_string();
    }
    if let Some(re) = TRAILING_EMPHASIS.as_ref() {
        one_line = re.replace(&one_line, "").to_string();
    }
    one_line.trim().to_string()
}

/// Whether `text` contains `digit` not adjacent to other digits
fn contains_standalone_digit(text: &str, digit: char) -> bool {
    let bytes = text.as_bytes();
    for (i, c) in text.char_indices() {
        if c != digit {
            continue;
        }
        let prev_is_digit = i > 0 && bytes[i - 1].is_ascii_digit();
        let next_is_digit = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if !prev_is_digit && !next_is_digit {
            return true;
        }
    }
    false
}
