//! Quote-aware splitting of a command line into pipeline segments and tokens.
//!
//! Neither function can fail: an unterminated quote simply runs to the end of
//! the input.

/// Split a line on unquoted `|` characters.
///
/// Segments are trimmed and empty segments are dropped. The second value is
/// true when at least one unquoted `|` was seen.
pub fn split_pipeline(line: &str) -> (Vec<String>, bool) {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut saw_pipe = false;

    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') => {
                quote = None;
                current.push(c);
            }
            (Some('\''), _) => current.push(c),
            (_, '\\') => {
                escaped = true;
                current.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '|') => {
                saw_pipe = true;
                push_segment(&mut segments, &current);
                current.clear();
            }
            (None, _) => current.push(c),
        }
    }
    push_segment(&mut segments, &current);

    (segments, saw_pipe)
}

fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

/// Split one pipeline segment into whitespace-separated tokens.
///
/// Single quotes preserve everything literally; double quotes allow `\`
/// escapes. Quote characters are removed from the resulting tokens. Tokens
/// that end up empty (e.g. `""`) are dropped.
pub fn tokenize(segment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in segment.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(q) => {
                if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '\\' {
                    escaped = true;
                } else if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c.is_whitespace() {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pipeline_basic() {
        let (segments, piped) = split_pipeline("nvidia-smi -q | grep -i ecc | head -n 5");
        assert!(piped);
        assert_eq!(segments, vec!["nvidia-smi -q", "grep -i ecc", "head -n 5"]);
    }

    #[test]
    fn test_pipe_inside_quotes_does_not_split() {
        let (segments, piped) = split_pipeline("grep -E 'a|b' file");
        assert!(!piped);
        assert_eq!(segments, vec!["grep -E 'a|b' file"]);
    }

    #[test]
    fn test_empty_segments_dropped() {
        let (segments, piped) = split_pipeline("sinfo ||  | ");
        assert!(piped);
        assert_eq!(segments, vec!["sinfo"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"grep "Xid 79" 'single quoted'"#),
            vec!["grep", "Xid 79", "single quoted"]
        );
        assert_eq!(tokenize("  a   b\t c "), vec!["a", "b", "c"]);
        assert_eq!(tokenize(r#"echo "" x"#), vec!["echo", "x"]);
    }

    #[test]
    fn test_unterminated_quote_runs_to_end() {
        assert_eq!(tokenize("grep \"Xid 79"), vec!["grep", "Xid 79"]);
    }
}
