//! Hand-written tokenizer for matcher expressions
//!
//! Tokens: identifiers, numbers, `"double"` / `'single'` quoted strings, operators,
//! punctuation and newlines (statement separators inside block matchers).
//! `#` starts a comment running to the end of the line.

use crate::core::error::RampartError;

/// A byte-offset span in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Let,
    If,
    Else,
    Return,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semi,
    Newline,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexEq,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Compute (line, col) from a byte offset. Both are 1-based.
pub fn offset_to_line_col(input: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in input.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

pub fn make_error(input: &str, offset: usize, message: impl Into<String>) -> RampartError {
    let (line, col) = offset_to_line_col(input, offset);
    RampartError::MatcherParse {
        message: message.into(),
        line,
        col,
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    match word {
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "let" => Some(TokenKind::Let),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "return" => Some(TokenKind::Return),
        _ if word.eq_ignore_ascii_case("in") => Some(TokenKind::In),
        _ => None,
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, RampartError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let end_of_input = input.len();
    let offset_at = |i: usize| chars.get(i).map_or(end_of_input, |(o, _)| *o);
    let mut i = 0;

    while i < chars.len() {
        let (start, ch) = chars[i];

        if ch == '\n' {
            tokens.push(Token {
                kind: TokenKind::Newline,
                span: Span {
                    start,
                    end: start + 1,
                },
            });
            i += 1;
            continue;
        }

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments run to end of line; the newline itself is kept.
        if ch == '#' {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&(_, c)) = chars.get(i) else {
                    return Err(make_error(input, start, "unterminated string"));
                };
                i += 1;
                if c == quote {
                    break;
                }
                if c == '\\' {
                    let Some(&(_, escaped)) = chars.get(i) else {
                        return Err(make_error(input, start, "unterminated string"));
                    };
                    i += 1;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '\'' => value.push('\''),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                    continue;
                }
                value.push(c);
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                span: Span {
                    start,
                    end: offset_at(i),
                },
            });
            continue;
        }

        if ch.is_ascii_digit() {
            let begin = i;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            let text = &input[chars[begin].0..offset_at(i)];
            let number = text
                .parse::<f64>()
                .map_err(|_| make_error(input, start, format!("invalid number '{}'", text)))?;
            tokens.push(Token {
                kind: TokenKind::Number(number),
                span: Span {
                    start,
                    end: offset_at(i),
                },
            });
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let begin = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let word = &input[chars[begin].0..offset_at(i)];
            let kind = keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()));
            tokens.push(Token {
                kind,
                span: Span {
                    start,
                    end: offset_at(i),
                },
            });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let (kind, width) = match (ch, next) {
            ('&', Some('&')) => (TokenKind::And, 2),
            ('|', Some('|')) => (TokenKind::Or, 2),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('=', Some('~')) => (TokenKind::RegexEq, 2),
            ('!', Some('=')) => (TokenKind::Ne, 2),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('!', _) => (TokenKind::Not, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('.', _) => (TokenKind::Dot, 1),
            (';', _) => (TokenKind::Semi, 1),
            _ => {
                return Err(make_error(
                    input,
                    start,
                    format!("unexpected character '{}'", ch),
                ))
            }
        };
        i += width;
        tokens.push(Token {
            kind,
            span: Span {
                start,
                end: offset_at(i),
            },
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_expression() {
        assert_eq!(
            kinds("r_sub == p_sub && r_age >= 18.5"),
            vec![
                TokenKind::Ident("r_sub".into()),
                TokenKind::Eq,
                TokenKind::Ident("p_sub".into()),
                TokenKind::And,
                TokenKind::Ident("r_age".into()),
                TokenKind::Ge,
                TokenKind::Number(18.5),
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_and_keywords() {
        assert_eq!(
            kinds(r#"'a\'b' IN ("x", "y") # trailing"#),
            vec![
                TokenKind::Str("a'b".into()),
                TokenKind::In,
                TokenKind::LParen,
                TokenKind::Str("x".into()),
                TokenKind::Comma,
                TokenKind::Str("y".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_regex_escapes_survive() {
        assert_eq!(kinds(r#""^/api/\d+$""#), vec![TokenKind::Str(r"^/api/\d+$".into())]);
    }

    #[test]
    fn test_newlines_are_tokens() {
        assert_eq!(
            kinds("let x = 1\nreturn x"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Number(1.0),
                TokenKind::Newline,
                TokenKind::Return,
                TokenKind::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_error_position() {
        match tokenize("r_sub == p_sub\n  @") {
            Err(RampartError::MatcherParse { line, col, .. }) => {
                assert_eq!((line, col), (2, 3));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(tokenize("\"open").is_err());
    }
}
