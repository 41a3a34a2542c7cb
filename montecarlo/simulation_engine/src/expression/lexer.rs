use super::EvaluationError;

/// Lexical token of the formula language.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Number(value) => format!("number {value}"),
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Plus => "`+`".into(),
            Self::Minus => "`-`".into(),
            Self::Star => "`*`".into(),
            Self::Slash => "`/`".into(),
            Self::Power => "`**`".into(),
            Self::LParen => "`(`".into(),
            Self::RParen => "`)`".into(),
            Self::Comma => "`,`".into(),
        }
    }
}

/// Token paired with its byte offset in the formula.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) position: usize,
}

/// Splits a formula into tokens. Any character outside the grammar is rejected here.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, EvaluationError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let byte = bytes[pos];
        let token = match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'/' => Token::Slash,
            b'^' => Token::Power,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'*' => {
                if bytes.get(pos + 1) == Some(&b'*') {
                    pos += 1;
                    Token::Power
                } else {
                    Token::Star
                }
            }
            b'0'..=b'9' | b'.' => {
                pos = scan_number(bytes, pos);
                let literal = &source[start..pos];
                let value = literal
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| EvaluationError::InvalidNumber {
                        position: start,
                        literal: literal.to_string(),
                    })?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    position: start,
                });
                continue;
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                    pos += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(source[start..pos].to_string()),
                    position: start,
                });
                continue;
            }
            _ => {
                let found = source[start..].chars().next().unwrap_or('\u{fffd}');
                return Err(EvaluationError::UnexpectedCharacter {
                    position: start,
                    found,
                });
            }
        };
        pos += 1;
        tokens.push(Spanned {
            token,
            position: start,
        });
    }

    Ok(tokens)
}

/// Returns the end offset of the numeric literal starting at `pos`.
fn scan_number(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn splits_operators_and_names() {
        assert_eq!(
            kinds("unit_cost_km*total_road_length ** 2"),
            vec![
                Token::Ident("unit_cost_km".into()),
                Token::Star,
                Token::Ident("total_road_length".into()),
                Token::Power,
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn reads_scientific_literals() {
        assert_eq!(
            kinds("1.5e-3 + .5 + 2."),
            vec![
                Token::Number(1.5e-3),
                Token::Plus,
                Token::Number(0.5),
                Token::Plus,
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn rejects_characters_outside_grammar() {
        for (source, bad) in [("a.b", '.'), ("x = 1", '='), ("a[0]", '['), ("'s'", '\'')] {
            let err = tokenize(source).unwrap_err();
            match err {
                EvaluationError::UnexpectedCharacter { found, .. } => assert_eq!(found, bad),
                EvaluationError::InvalidNumber { .. } => assert_eq!(bad, '.'),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn lone_dot_is_invalid_number() {
        assert!(matches!(
            tokenize(". + 1"),
            Err(EvaluationError::InvalidNumber { position: 0, .. })
        ));
    }

    #[test]
    fn overflowing_literal_is_invalid_number() {
        assert!(matches!(
            tokenize("2 * 1e400"),
            Err(EvaluationError::InvalidNumber { position: 4, ref literal }) if literal == "1e400"
        ));
    }
}
