//! Code extraction from free-text model replies
//!
//! Models restate the problem, explain their reasoning, then emit the
//! fix, usually (but not reliably) inside a fenced block, and usually
//! last. Extraction prefers the last fenced block, then falls back to
//! locating the longest contiguous run of code-plausible lines. Absence
//! of a result is a normal outcome the caller must handle; this module
//! never fails on malformed input.

/// A fenced span inside a reply. `lang` is the tag after the opening
/// fence, if any.
#[derive(Debug)]
pub(crate) struct FencedBlock<'a> {
    #[allow(dead_code)]
    pub lang: Option<&'a str>,
    pub content: &'a str,
}

/// All fenced blocks in order of appearance. An unterminated trailing
/// fence still yields a block: truncated replies are common and the
/// partial content is often usable.
pub(crate) fn fenced_blocks(raw: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let (lang, body_start) = match after_open.find('\n') {
            Some(nl) => {
                let tag = after_open[..nl].trim();
                if !tag.is_empty() && tag.len() <= 16 && tag.chars().all(|c| c.is_alphanumeric()) {
                    (Some(tag), nl + 1)
                } else {
                    (None, 0)
                }
            }
            None => (None, 0),
        };
        let body = &after_open[body_start..];

        match body.find("```") {
            Some(close) => {
                blocks.push(FencedBlock {
                    lang,
                    content: &body[..close],
                });
                rest = &body[close + 3..];
            }
            None => {
                blocks.push(FencedBlock {
                    lang,
                    content: body,
                });
                break;
            }
        }
    }

    blocks
}

/// Markers that make a run of lines count as source rather than prose.
const STATEMENT_MARKERS: &[&str] = &[
    "fn ", "def ", "class ", "struct ", "impl ", "import ", "use ", "let ", "return", "if ",
    "for ", "while ", "print(", "println!",
];

/// Extract the most plausible source-code span from a reply, or `None`
/// when nothing clears the plausibility threshold.
pub fn extract_code(raw: &str) -> Option<String> {
    // Last fenced block wins: models restate first and fix last
    let fenced: Option<String> = fenced_blocks(raw)
        .iter()
        .rev()
        .map(|b| b.content.trim())
        .find(|c| !c.is_empty())
        .map(|c| c.to_string());
    if fenced.is_some() {
        return fenced;
    }

    // No fence: find the longest contiguous run of code-plausible lines
    let lines: Vec<&str> = raw.lines().collect();
    let mut best: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() || looks_like_code_line(line) {
            if run_start.is_none() && !line.trim().is_empty() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            best = longer_run(best, (start, i));
        }
    }
    if let Some(start) = run_start {
        best = longer_run(best, (start, lines.len()));
    }

    let (start, end) = best?;
    let candidate = lines[start..end].join("\n").trim().to_string();
    if is_plausible_source(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

fn longer_run(best: Option<(usize, usize)>, run: (usize, usize)) -> Option<(usize, usize)> {
    match best {
        Some((s, e)) if e - s >= run.1 - run.0 => Some((s, e)),
        _ => Some(run),
    }
}

/// Per-line heuristic: code lines carry operators, delimiters, or
/// indentation; prose-only lines don't.
fn looks_like_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    if line.starts_with("    ") || line.starts_with('\t') {
        return true;
    }
    if trimmed.starts_with("//") || trimmed.starts_with('#') {
        return true;
    }
    if STATEMENT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
        return true;
    }
    // Assignments, calls, blocks; prose sentences rarely contain these
    trimmed.contains('=') || trimmed.ends_with(['{', '}', ';', ':', ')'])
}

/// Run-level plausibility gate: at least two lines or a statement
/// construct, and balanced delimiters.
fn is_plausible_source(candidate: &str) -> bool {
    if candidate.len() < 10 {
        return false;
    }
    let has_statement = STATEMENT_MARKERS.iter().any(|m| candidate.contains(m))
        || candidate.contains('=');
    if !has_statement {
        return false;
    }
    balanced(candidate, '(', ')') && balanced(candidate, '{', '}') && balanced(candidate, '[', ']')
}

fn balanced(s: &str, open: char, close: char) -> bool {
    let opens = s.chars().filter(|c| *c == open).count();
    let closes = s.chars().filter(|c| *c == close).count();
    opens == closes
}
