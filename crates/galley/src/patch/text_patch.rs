//! Context-based text patches in the diff-match-patch transport format.
//!
//! A patch is a sequence of hunks:
//!
//! ```text
//! @@ -13,7 +13,7 @@
//!  own
//! -fox
//! +cat
//! ```
//!
//! Line payloads are percent-encoded; positions and lengths count Unicode
//! scalar values, not bytes. Application is strict: context and deleted text
//! must match the current target exactly, there is no fuzzy relocation. A
//! mismatch means the patch was produced against a different version of the
//! text and must be rejected rather than guessed at.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TextPatchError {
    #[error("malformed text patch: {0}")]
    Syntax(String),
    #[error("patch context does not match the target text")]
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HunkOp {
    Context,
    Insert,
    Delete,
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 0-based char position in the text as it stands when the hunk is
    /// applied (earlier hunks included).
    dst_pos: usize,
    ops: Vec<(HunkOp, String)>,
}

/// Parse the transport format into hunks.
fn parse(patch: &str) -> Result<Vec<Hunk>, TextPatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in patch.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@ ") {
            let dst_pos = parse_header(header)
                .ok_or_else(|| TextPatchError::Syntax(format!("bad hunk header `{line}`")))?;
            hunks.push(Hunk { dst_pos, ops: Vec::new() });
            continue;
        }
        let hunk = hunks
            .last_mut()
            .ok_or_else(|| TextPatchError::Syntax(format!("line `{line}` before any hunk header")))?;
        let (op, payload) = match line.as_bytes()[0] {
            b' ' => (HunkOp::Context, &line[1..]),
            b'+' => (HunkOp::Insert, &line[1..]),
            b'-' => (HunkOp::Delete, &line[1..]),
            _ => {
                return Err(TextPatchError::Syntax(format!(
                    "unknown line prefix in `{line}`"
                )))
            }
        };
        hunk.ops.push((op, percent_decode(payload)?));
    }
    if hunks.is_empty() {
        return Err(TextPatchError::Syntax("no hunks".to_string()));
    }
    Ok(hunks)
}

/// Parse `-A[,B] +C[,D] @@`, returning the 0-based destination position.
fn parse_header(header: &str) -> Option<usize> {
    let header = header.strip_suffix(" @@")?;
    let (src, dst) = header.split_once(' ')?;
    let _ = parse_range(src.strip_prefix('-')?)?;
    let (start, len) = parse_range(dst.strip_prefix('+')?)?;
    // Positions are 1-based except when the length is zero, where the start
    // already names the gap.
    Some(if len == 0 { start } else { start.checked_sub(1)? })
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

fn percent_decode(payload: &str) -> Result<String, TextPatchError> {
    if !payload.contains('%') {
        return Ok(payload.to_string());
    }
    let bytes = payload.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    TextPatchError::Syntax(format!("bad percent escape in `{payload}`"))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| TextPatchError::Syntax(format!("invalid UTF-8 in `{payload}`")))
}

/// Apply `patch` to `source`, returning the patched text.
pub fn apply(patch: &str, source: &str) -> Result<String, TextPatchError> {
    let hunks = parse(patch)?;
    let mut chars: Vec<char> = source.chars().collect();

    for hunk in hunks {
        let mut pos = hunk.dst_pos;
        for (op, text) in &hunk.ops {
            let payload: Vec<char> = text.chars().collect();
            match op {
                HunkOp::Context => {
                    expect_at(&chars, pos, &payload)?;
                    pos += payload.len();
                }
                HunkOp::Delete => {
                    expect_at(&chars, pos, &payload)?;
                    chars.drain(pos..pos + payload.len());
                }
                HunkOp::Insert => {
                    if pos > chars.len() {
                        return Err(TextPatchError::Conflict);
                    }
                    chars.splice(pos..pos, payload.iter().copied());
                    pos += payload.len();
                }
            }
        }
    }
    Ok(chars.into_iter().collect())
}

fn expect_at(chars: &[char], pos: usize, expected: &[char]) -> Result<(), TextPatchError> {
    match chars.get(pos..pos + expected.len()) {
        Some(actual) if actual == expected => Ok(()),
        _ => Err(TextPatchError::Conflict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_a_word_in_context() {
        let patch = "@@ -13,7 +13,7 @@\n own \n-fox\n+cat\n";
        assert_eq!(
            apply(patch, "the quick brown fox").unwrap(),
            "the quick brown cat"
        );
    }

    #[test]
    fn pure_insertion_into_empty_text() {
        let patch = "@@ -0,0 +1,5 @@\n+hello\n";
        assert_eq!(apply(patch, "").unwrap(), "hello");
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        // "aXbcdefghijYk" from "abcdefghijk": insert X at 1, Y at 11.
        let patch = "@@ -1,2 +1,3 @@\n a\n+X\n b\n@@ -10,2 +11,3 @@\n j\n+Y\n k\n";
        assert_eq!(apply(patch, "abcdefghijk").unwrap(), "aXbcdefghijYk");
    }

    #[test]
    fn percent_escapes_decode() {
        let patch = "@@ -1,3 +1,7 @@\n one\n+%0Atwo\n";
        assert_eq!(apply(patch, "one").unwrap(), "one\ntwo");
    }

    #[test]
    fn stale_context_is_a_conflict() {
        let patch = "@@ -13,7 +13,7 @@\n own \n-fox\n+cat\n";
        assert_eq!(
            apply(patch, "the quick brown dog"),
            Err(TextPatchError::Conflict)
        );
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        assert!(matches!(apply("", "x"), Err(TextPatchError::Syntax(_))));
        assert!(matches!(
            apply("nonsense\n", "x"),
            Err(TextPatchError::Syntax(_))
        ));
        assert!(matches!(
            apply("@@ -1 +1 @@\n*bad\n", "x"),
            Err(TextPatchError::Syntax(_))
        ));
    }
}
