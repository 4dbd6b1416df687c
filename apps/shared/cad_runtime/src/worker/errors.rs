//! Turning script failures into [`FrameError`]s
//!
//! Engines report errors as free text. Two things are recovered from it:
//! whether the failure came from a forbidden blocking call, and a
//! best-effort `file:line` location.

use crate::error::{FrameError, ScriptError};

/// Location reported when nothing in the trace looks like `file:line`
pub const UNKNOWN_LOCATION: &str = "unknown location";

/// Fragments that identify an attempt to block the calling thread
const BLOCKING_PATTERNS: &[&str] = &[
    "atomics.wait",
    "would block",
    "wouldblock",
    "ewouldblock",
    "eagain",
    "resource temporarily unavailable",
    "blocking call",
    "blocking operation",
    "prompt() is not supported",
    "readline() is a blocking call",
    "input() is not supported",
];

pub fn is_blocking_call(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    BLOCKING_PATTERNS.iter().any(|p| lower.contains(p))
}

/// `file:line` if `token` looks like `file:line` or `file:line:col`
fn parse_file_line(token: &str) -> Option<String> {
    let token = token.trim().trim_start_matches("at ").trim();
    let mut parts = token.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next()?;
    let rest = parts.next();

    let is_num = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let (file, line) = match rest {
        // file:line:col
        Some(file) if is_num(middle) && is_num(last) => (file, middle),
        // file:line where the file itself contains a colon
        Some(file) if is_num(last) => return Some(format!("{}:{}:{}", file, middle, last)),
        None if is_num(last) => (middle, last),
        _ => return None,
    };

    if file.is_empty() || (file.contains(char::is_whitespace) && !file.contains('/')) {
        return None;
    }
    Some(format!("{}:{}", file, line))
}

/// Python style `File "x.py", line 12`
fn parse_quoted_file_line(line: &str) -> Option<String> {
    let start = line.find("File \"")? + "File \"".len();
    let end = start + line[start..].find('"')?;
    let file = &line[start..end];
    let after = &line[end..];
    let line_pos = after.find("line ")? + "line ".len();
    let number: String = after[line_pos..].chars().take_while(|c| c.is_ascii_digit()).collect();
    if file.is_empty() || number.is_empty() {
        return None;
    }
    Some(format!("{}:{}", file, number))
}

/// Best-effort `file:line` from a stack trace or error message
///
/// Recognizes `at fn (file:line[:col])`, `at file:line[:col]` and
/// `File "file", line N`. The first frame that yields a location wins.
pub fn extract_location(trace: &str) -> Option<String> {
    for line in trace.lines() {
        let line = line.trim();

        if let Some(found) = parse_quoted_file_line(line) {
            return Some(found);
        }

        if let (Some(open), Some(close)) = (line.rfind('('), line.rfind(')')) {
            if open < close {
                if let Some(found) = parse_file_line(&line[open + 1..close]) {
                    return Some(found);
                }
            }
        }

        if let Some(rest) = line.strip_prefix("at ") {
            if let Some(found) = parse_file_line(rest) {
                return Some(found);
            }
        }
    }
    None
}

/// Classify an engine error into the error reported for the frame
pub fn classify(error: ScriptError) -> FrameError {
    let text = error.to_string();
    let location = error
        .stack
        .as_deref()
        .and_then(extract_location)
        .or_else(|| extract_location(&error.message))
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

    if is_blocking_call(&text) {
        return FrameError::BlockingCall {
            message: text,
            location,
        };
    }

    FrameError::Script {
        message: text,
        location,
        stack: error.stack,
    }
}

/// Message carried by a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
