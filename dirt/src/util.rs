//! Small string helpers shared across the host.

/// Split a POSIX-like command line into tokens. Double-quoted runs keep
/// internal whitespace, backslash escapes `\t`, `\n` and `\\`, and a
/// malformed trailing quote still flushes its token.
pub fn parse_command_line(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut acc = String::new();
    let mut escape = false;
    let mut quote = false;

    for mut c in line.chars() {
        if escape {
            escape = false;
            match c {
                't' => c = '\t',
                'n' => c = '\n',
                '\\' => {}
                _ => continue,
            }
            acc.push(c);
            continue;
        } else if c == '\\' {
            escape = true;
            continue;
        }

        if acc.is_empty() {
            if c == '"' {
                quote = !quote;
            } else if c > ' ' {
                acc.push(c);
            }
            continue;
        }

        if (c <= ' ' && !quote) || (c == '"' && quote) {
            parts.push(std::mem::take(&mut acc));
            quote = false;
            continue;
        }

        acc.push(c);
    }
    if !acc.is_empty() {
        parts.push(acc);
    }
    parts
}

/// Parse the leading unsigned integer of a token, `strtoul`-style: an
/// optional `0x` prefix selects hex, parsing stops at the first non-digit,
/// and a token with no digits yields zero.
pub fn parse_u32_prefix(token: &str) -> u32 {
    let token = token.trim();
    let (digits, radix) = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (token, 10),
    };
    let mut value = 0u32;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                any = true;
                value = value.wrapping_mul(radix).wrapping_add(d);
            }
            None => break,
        }
    }
    if any {
        value
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_separates_tokens() {
        assert_eq!(parse_command_line("a bb  ccc"), ["a", "bb", "ccc"]);
        assert_eq!(parse_command_line(""), Vec::<String>::new());
        assert_eq!(parse_command_line("   "), Vec::<String>::new());
    }

    #[test]
    fn quotes_preserve_internal_whitespace() {
        assert_eq!(parse_command_line(r#"say "two words" end"#), [
            "say",
            "two words",
            "end"
        ]);
    }

    #[test]
    fn trailing_quote_flushes_the_token() {
        assert_eq!(parse_command_line(r#"a "unterminated"#), ["a", "unterminated"]);
    }

    #[test]
    fn backslash_escapes() {
        assert_eq!(parse_command_line(r"a\tb"), ["a\tb"]);
        assert_eq!(parse_command_line(r"a\nb"), ["a\nb"]);
        assert_eq!(parse_command_line(r"a\\b"), ["a\\b"]);
        // unknown escapes are dropped
        assert_eq!(parse_command_line(r"a\qb"), ["ab"]);
    }

    #[test]
    fn numeric_prefixes() {
        assert_eq!(parse_u32_prefix("268435457"), 0x1000_0001);
        assert_eq!(parse_u32_prefix("0x10000000"), 0x1000_0000);
        assert_eq!(parse_u32_prefix("42abc"), 42);
        assert_eq!(parse_u32_prefix("abc"), 0);
        assert_eq!(parse_u32_prefix(""), 0);
    }
}
