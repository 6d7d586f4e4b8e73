//! Single-line shaping of tool stderr and warning lists.
//!
//! Jamf keeps policy output as one blob per run, so multi-line `dscl` and
//! `dseditgroup` errors are folded onto one line before they are printed or
//! logged.

/// Fold all whitespace runs to single spaces and cut at `max_chars`,
/// marking a cut with `...`.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut taken = 0;
    for word in input.split_whitespace() {
        let sep = usize::from(taken > 0);
        let len = word.chars().count();
        if taken + sep + len > max_chars {
            let room = max_chars.saturating_sub(taken + sep);
            if room > 0 {
                if sep == 1 {
                    out.push(' ');
                }
                out.extend(word.chars().take(room));
            }
            out.push_str("...");
            return out;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(word);
        taken += sep + len;
    }
    out
}

/// The first `max_items` warnings joined with ` | `, each compacted, with a
/// count of the ones left out.
pub fn summarize_warnings(warnings: &[String], max_items: usize, max_chars: usize) -> String {
    let mut parts: Vec<String> = warnings
        .iter()
        .take(max_items)
        .map(|w| compact_line(w, max_chars))
        .collect();
    let hidden = warnings.len().saturating_sub(max_items);
    if hidden > 0 {
        let last = parts.pop().unwrap_or_default();
        parts.push(format!("{} (+{} more)", last, hidden));
    }
    parts.join(" | ")
}
