//! Output Evaluator - language- and tool-agnostic comparison logic.
//!
//! Pure functions: (observed text, fixture) -> match or a readable diff.
//! Knows nothing about processes, backends or workspaces.
//!
//! **Matching rules:**
//! - `exact`: line-wise equality on `\n` splits, so any byte difference
//!   (including a missing trailing newline) is a mismatch
//! - `regex`: one anchored pattern per line, line counts must agree
//! - `regex_dotall`: one anchored pattern over the whole text, `.` spans lines
//! - `contains`: literal substring
//!
//! Line endings are NOT normalized here. Captured process output is
//! normalized by the engine (universal newlines) and file contents by the
//! workspace reader, so both sides arrive in the same form.

use buildcheck_common::types::{ExecutionOutput, Expected};
use buildcheck_common::HarnessError;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;

/// Convert `\r\n` and lone `\r` line endings to `\n`
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

fn compile(pattern: &str, dot_all: bool) -> Result<Regex, HarnessError> {
    let anchored = format!("^(?:{})$", pattern);
    RegexBuilder::new(&anchored)
        .dot_matches_new_line(dot_all)
        .build()
        .map_err(|e| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

pub fn match_exact(actual: &str, expected: &str) -> bool {
    let lines = split_lines(actual);
    let matches = split_lines(expected);
    lines.len() == matches.len() && lines.iter().zip(&matches).all(|(a, e)| a == e)
}

pub fn match_re(actual: &str, patterns: &str) -> Result<bool, HarnessError> {
    let lines = split_lines(actual);
    let res = split_lines(patterns);
    if lines.len() != res.len() {
        return Ok(false);
    }
    for (line, pattern) in lines.iter().zip(&res) {
        if !compile(pattern, false)?.is_match(line) {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn match_re_dotall(actual: &str, pattern: &str) -> Result<bool, HarnessError> {
    Ok(compile(pattern, true)?.is_match(actual))
}

pub fn matches(actual: &str, expected: &Expected) -> Result<bool, HarnessError> {
    match expected {
        Expected::Exact(text) => Ok(match_exact(actual, text)),
        Expected::Regex(patterns) => match_re(actual, patterns),
        Expected::RegexDotall(pattern) => match_re_dotall(actual, pattern),
        Expected::Contains(needle) => Ok(actual.contains(needle.as_str())),
    }
}

/// Classic `diff` output ("2c2", "< old", "---", "> new") of two texts,
/// computed line by line from their longest common subsequence.
pub fn simple_diff(expected: &str, actual: &str) -> Vec<String> {
    let a = split_lines(expected);
    let b = split_lines(actual);

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            i += 1;
            j += 1;
            continue;
        }
        // Gather one hunk of differing lines
        let (start_a, start_b) = (i, j);
        while (i < a.len() || j < b.len()) && !(i < a.len() && j < b.len() && a[i] == b[j]) {
            if j >= b.len() || (i < a.len() && lcs[i + 1][j] >= lcs[i][j + 1]) {
                i += 1;
            } else {
                j += 1;
            }
        }
        push_hunk(&mut result, &a[start_a..i], start_a, &b[start_b..j], start_b);
    }
    result
}

fn range(start: usize, end: usize) -> String {
    if start + 1 == end {
        end.to_string()
    } else {
        format!("{},{}", start + 1, end)
    }
}

fn push_hunk(out: &mut Vec<String>, old: &[&str], a1: usize, new: &[&str], b1: usize) {
    let (a2, b2) = (a1 + old.len(), b1 + new.len());
    match (old.is_empty(), new.is_empty()) {
        (false, true) => out.push(format!("{}d{}", range(a1, a2), b1)),
        (true, false) => out.push(format!("{}a{}", a1, range(b1, b2))),
        _ => out.push(format!("{}c{}", range(a1, a2), range(b1, b2))),
    }
    out.extend(old.iter().map(|l| format!("< {}", l)));
    if !old.is_empty() && !new.is_empty() {
        out.push("---".to_string());
    }
    out.extend(new.iter().map(|l| format!("> {}", l)));
}

/// Per-line report for regex expectations: every line whose pattern does
/// not match is listed with the pattern and the observed text.
pub fn diff_re(patterns: &str, actual: &str) -> Result<Vec<String>, HarnessError> {
    let mut res = split_lines(patterns);
    let mut lines = split_lines(actual);
    let width = res.len().max(lines.len());
    res.resize(width, "");
    lines.resize(width, "");

    let mut result = Vec::new();
    for (idx, (pattern, line)) in res.iter().zip(&lines).enumerate() {
        if !compile(pattern, false)?.is_match(line) {
            result.push(format!("{}c{}", idx + 1, idx + 1));
            result.push(format!("< {:?}", pattern));
            result.push("---".to_string());
            result.push(format!("> {:?}", line));
        }
    }
    Ok(result)
}

fn describe_mismatch(actual: &str, expected: &Expected) -> Result<String, HarnessError> {
    let body = match expected {
        Expected::Exact(text) => simple_diff(text, actual).join("\n"),
        Expected::Regex(patterns) => diff_re(patterns, actual)?.join("\n"),
        Expected::RegexDotall(pattern) => format!("pattern {:?} did not match", pattern),
        Expected::Contains(needle) => format!("{:?} not found", needle),
    };
    Ok(format!(
        "{}\n{}\n{}\n{}{}",
        banner("Expected"),
        expected.text(),
        banner("Actual"),
        actual,
        if body.is_empty() {
            String::new()
        } else {
            format!("\n{}\n{}", banner("Diff"), body)
        }
    ))
}

fn banner(title: &str) -> String {
    let head = format!("==== {} ", title);
    let fill = 60usize.saturating_sub(head.len());
    format!("{}{}", head, "=".repeat(fill))
}

/// Compare `actual` against the fixture, failing with a diff on mismatch
pub fn assert_output_matches(label: &str, actual: &str, expected: &Expected) -> Result<(), HarnessError> {
    if matches(actual, expected)? {
        return Ok(());
    }
    Err(HarnessError::assertion(
        format!("{} did not match", label),
        describe_mismatch(actual, expected)?,
    ))
}

/// Status check for a run whose exit code was declared up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    Ok,
    TimedOut,
    Mismatch { actual: Option<i32> },
}

pub fn check_status(expected: i32, output: &ExecutionOutput) -> StatusCheck {
    if output.timed_out {
        StatusCheck::TimedOut
    } else if output.exit_code == Some(expected) {
        StatusCheck::Ok
    } else {
        StatusCheck::Mismatch {
            actual: output.exit_code,
        }
    }
}
