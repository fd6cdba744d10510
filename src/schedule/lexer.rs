use crate::error::ScheduleRuleError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    LParen,
    RParen,
    Comma,
    Colon,
    Question,
}

impl TokenKind {
    pub(super) fn describe(&self) -> String {
        match self {
            TokenKind::Number(value) => value.to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Plus => "+".to_owned(),
            TokenKind::Minus => "-".to_owned(),
            TokenKind::Star => "*".to_owned(),
            TokenKind::StarStar => "**".to_owned(),
            TokenKind::Slash => "/".to_owned(),
            TokenKind::SlashSlash => "//".to_owned(),
            TokenKind::Percent => "%".to_owned(),
            TokenKind::Lt => "<".to_owned(),
            TokenKind::Le => "<=".to_owned(),
            TokenKind::Gt => ">".to_owned(),
            TokenKind::Ge => ">=".to_owned(),
            TokenKind::EqEq => "==".to_owned(),
            TokenKind::Ne => "!=".to_owned(),
            TokenKind::LParen => "(".to_owned(),
            TokenKind::RParen => ")".to_owned(),
            TokenKind::Comma => ",".to_owned(),
            TokenKind::Colon => ":".to_owned(),
            TokenKind::Question => "?".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) offset: usize,
}

pub(super) fn tokenize(source: &str) -> Result<Vec<Token>, ScheduleRuleError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    while let Some(&byte) = bytes.get(pos) {
        if byte.is_ascii_whitespace() {
            pos = pos.saturating_add(1);
            continue;
        }

        if byte.is_ascii_digit() || byte == b'.' {
            let end = scan_number(bytes, pos);
            let literal = source.get(pos..end).unwrap_or_default();
            let value = literal
                .parse::<f64>()
                .map_err(|_parse_err| ScheduleRuleError::InvalidNumber {
                    literal: literal.to_owned(),
                })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: pos,
            });
            pos = end;
            continue;
        }

        if byte.is_ascii_alphabetic() || byte == b'_' {
            let mut end = pos;
            while bytes
                .get(end)
                .is_some_and(|next| next.is_ascii_alphanumeric() || *next == b'_')
            {
                end = end.saturating_add(1);
            }
            let ident = source.get(pos..end).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Ident(ident.to_owned()),
                offset: pos,
            });
            pos = end;
            continue;
        }

        let next = bytes.get(pos.saturating_add(1)).copied();
        let (kind, width) = match (byte, next) {
            (b'*', Some(b'*')) => (TokenKind::StarStar, 2),
            (b'/', Some(b'/')) => (TokenKind::SlashSlash, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::Ne, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b'?', _) => (TokenKind::Question, 1),
            _ => {
                let ch = source
                    .get(pos..)
                    .and_then(|rest| rest.chars().next())
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                return Err(ScheduleRuleError::UnexpectedChar { ch, offset: pos });
            }
        };
        tokens.push(Token { kind, offset: pos });
        pos = pos.saturating_add(width);
    }

    Ok(tokens)
}

/// Returns the end offset of the numeric literal starting at `start`. An
/// exponent is only consumed when digits follow it, so `30else` lexes as
/// `30` followed by `else`.
fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while bytes
        .get(end)
        .is_some_and(|byte| byte.is_ascii_digit() || *byte == b'.')
    {
        end = end.saturating_add(1);
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end.saturating_add(1);
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp = exp.saturating_add(1);
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            end = exp;
            while bytes.get(end).is_some_and(u8::is_ascii_digit) {
                end = end.saturating_add(1);
            }
        }
    }
    end
}
