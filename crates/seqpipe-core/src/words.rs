//! Shell-style word splitting and quoting.
//!
//! `split` breaks a command line into words the way `/bin/sh` would:
//! unescaped whitespace separates words, single quotes are literal, double
//! quotes allow `\"` and `\\`, and adjacent segments concatenate into one
//! word (`foo'bar'` is a single word `foobar`).
//!
//! `quote` is the inverse contract: for any string `s`, passing `quote(s)`
//! through `/bin/sh -c` yields exactly one argument whose bytes equal `s`.

/// Tokenization error for a malformed command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WordsError {
    #[error("unterminated {} quote", quote_name(*.0))]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingBackslash,
}

fn quote_name(c: char) -> &'static str {
    if c == '\'' {
        "single"
    } else {
        "double"
    }
}

/// Split a command line into shell-style words.
///
/// Returns an empty vector for a blank line.
pub fn split(line: &str) -> Result<Vec<String>, WordsError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\\' => {
                // Backslash outside quotes escapes the next character,
                // including whitespace and quote characters.
                match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        in_word = true;
                    }
                    None => return Err(WordsError::TrailingBackslash),
                }
            }
            '\'' => {
                in_word = true;
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '\'' {
                        closed = true;
                        break;
                    }
                    current.push(c);
                }
                if !closed {
                    return Err(WordsError::UnterminatedQuote('\''));
                }
            }
            '"' => {
                in_word = true;
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            // Only `\"` and `\\` are escapes inside double
                            // quotes; any other backslash is literal.
                            Some(e @ ('"' | '\\')) => current.push(e),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(WordsError::UnterminatedQuote('"')),
                        },
                        _ => current.push(c),
                    }
                }
                if !closed {
                    return Err(WordsError::UnterminatedQuote('"'));
                }
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Quote a single string for `/bin/sh`.
///
/// Empty strings become `''`; strings of safe characters pass through
/// unchanged; everything else is single-quoted with embedded `'` rewritten
/// as `'\''`.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(is_safe_char) {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '=' | ':' | '@' | '-')
}

/// Render a command and its arguments as a single quoted line.
pub fn join(cmd: &str, args: &[String]) -> String {
    let mut line = quote(cmd);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("echo hello", &["echo", "hello"])]
    #[case("  echo   hello  world ", &["echo", "hello", "world"])]
    #[case("echo 'hello world'", &["echo", "hello world"])]
    #[case(r#"echo "hello world""#, &["echo", "hello world"])]
    #[case(r#"echo "a \" b""#, &["echo", "a \" b"])]
    #[case(r#"echo "a \\ b""#, &["echo", "a \\ b"])]
    #[case(r#"echo "a \n b""#, &["echo", "a \\n b"])]
    #[case(r"echo a\ b", &["echo", "a b"])]
    #[case("echo foo'bar'", &["echo", "foobar"])]
    #[case(r#"echo 'a'"b"c"#, &["echo", "abc"])]
    #[case("echo ''", &["echo", ""])]
    #[case("echo '$HOME'", &["echo", "$HOME"])]
    fn split_cases(#[case] line: &str, #[case] expected: &[&str]) {
        let words = split(line).unwrap();
        assert_eq!(words, expected);
    }

    #[test]
    fn split_blank_line_is_empty() {
        assert_eq!(split("").unwrap(), Vec::<String>::new());
        assert_eq!(split("   \t ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn split_unterminated_single_quote() {
        assert_eq!(
            split("echo 'oops"),
            Err(WordsError::UnterminatedQuote('\''))
        );
    }

    #[test]
    fn split_unterminated_double_quote() {
        assert_eq!(split("echo \"oops"), Err(WordsError::UnterminatedQuote('"')));
    }

    #[test]
    fn split_trailing_backslash() {
        assert_eq!(split("echo oops\\"), Err(WordsError::TrailingBackslash));
    }

    #[rstest]
    #[case("", "''")]
    #[case("hello", "hello")]
    #[case("a/b.c=d:e@f-g_h", "a/b.c=d:e@f-g_h")]
    #[case("hello world", "'hello world'")]
    #[case("it's", r"'it'\''s'")]
    #[case("$HOME", "'$HOME'")]
    #[case("a\"b", "'a\"b'")]
    fn quote_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(quote(input), expected);
    }

    /// quote/split are duals: splitting a quoted string yields the original.
    #[rstest]
    #[case("plain")]
    #[case("two words")]
    #[case("it's got 'quotes'")]
    #[case("dollar $VAR and \"doubles\"")]
    #[case("tab\there")]
    fn quote_then_split_round_trips(#[case] input: &str) {
        let words = split(&quote(input)).unwrap();
        assert_eq!(words, vec![input.to_string()]);
    }

    #[test]
    fn join_quotes_each_argument() {
        let line = join("echo", &["a b".to_string(), "c".to_string()]);
        assert_eq!(line, "echo 'a b' c");
    }
}
