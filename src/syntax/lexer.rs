use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;

pub struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.item == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'@' {
                return self.scan_attribute();
            }

            // Backtick-quoted identifier, as the IR printer writes
            // unresolved names.
            if ch == b'`' {
                return self.scan_quoted_ident();
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol recorded an error; skip the byte and resync
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            // Line comments
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'/'
            {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            break;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let token = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(token, start, self.pos)
    }

    fn scan_quoted_ident(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1; // '`'
        let name_start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.source[name_start..self.pos])
            .unwrap()
            .to_string();
        if self.pos < self.source.len() && self.source[self.pos] == b'`' {
            self.pos += 1;
        } else {
            self.diagnostics.push(Diagnostic::error_at(
                Span::source(start as u32, self.pos as u32),
                "unterminated quoted identifier",
            ));
        }
        if name.is_empty() {
            self.diagnostics.push(Diagnostic::error_at(
                Span::source(start as u32, self.pos as u32),
                "empty quoted identifier",
            ));
        }
        self.make_token(Lexeme::Ident(name), start, self.pos)
    }

    /// Decimal or `0x` hexadecimal; kept as text so the typing pass can
    /// size the literal from context.
    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        if self.pos + 1 < self.source.len()
            && self.source[self.pos] == b'0'
            && (self.source[self.pos + 1] | 0x20) == b'x'
        {
            self.pos += 2;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
        } else {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .unwrap()
            .to_string();
        self.make_token(Lexeme::Number(text), start, self.pos)
    }

    fn scan_attribute(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1; // '@'
        let name_start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.source[name_start..self.pos])
            .unwrap()
            .to_string();
        if name.is_empty() {
            self.diagnostics.push(Diagnostic::error_at(
                Span::source(start as u32, self.pos as u32),
                "expected an attribute name after `@`",
            ));
        }
        self.make_token(Lexeme::Attribute(name), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        let next = self.source.get(self.pos + 1).copied();

        let (token, len) = match (ch, next) {
            (b'=', Some(b'=')) => (Lexeme::EqEq, 2),
            (b'!', Some(b'=')) => (Lexeme::BangEq, 2),
            (b'<', Some(b'=')) => (Lexeme::LtEq, 2),
            (b'>', Some(b'=')) => (Lexeme::GtEq, 2),
            (b'(', _) => (Lexeme::LParen, 1),
            (b')', _) => (Lexeme::RParen, 1),
            (b'{', _) => (Lexeme::LBrace, 1),
            (b'}', _) => (Lexeme::RBrace, 1),
            (b'[', _) => (Lexeme::LBracket, 1),
            (b']', _) => (Lexeme::RBracket, 1),
            (b',', _) => (Lexeme::Comma, 1),
            (b':', _) => (Lexeme::Colon, 1),
            (b';', _) => (Lexeme::Semicolon, 1),
            (b'=', _) => (Lexeme::Eq, 1),
            (b'<', _) => (Lexeme::Lt, 1),
            (b'>', _) => (Lexeme::Gt, 1),
            (b'+', _) => (Lexeme::Plus, 1),
            (b'-', _) => (Lexeme::Minus, 1),
            (b'*', _) => (Lexeme::Star, 1),
            (b'/', _) => (Lexeme::Slash, 1),
            (b'%', _) => (Lexeme::Percent, 1),
            (b'&', _) => (Lexeme::Amp, 1),
            (b'|', _) => (Lexeme::Pipe, 1),
            (b'^', _) => (Lexeme::Caret, 1),
            _ => {
                self.diagnostics.push(Diagnostic::error_at(
                    Span::source(start as u32, start as u32 + 1),
                    format!("unexpected character `{}`", ch as char),
                ));
                self.pos += 1;
                return None;
            }
        };
        self.pos += len;
        Some(self.make_token(token, start, self.pos))
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::at(token, Span::source(start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Lexeme> {
        let (tokens, errors) = Lexer::new(source).tokenize();
        assert!(errors.is_empty(), "lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.item).collect()
    }

    #[test]
    fn test_lex_fn_header() {
        let tokens = lex("fn @compute main i32() {");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Fn,
                Lexeme::Attribute("compute".to_string()),
                Lexeme::Ident("main".to_string()),
                Lexeme::I32Ty,
                Lexeme::LParen,
                Lexeme::RParen,
                Lexeme::LBrace,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = lex("42 0x2A");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Number("42".to_string()),
                Lexeme::Number("0x2A".to_string()),
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_two_char_operators() {
        let tokens = lex("== != <= >= < >");
        assert_eq!(
            tokens,
            vec![
                Lexeme::EqEq,
                Lexeme::BangEq,
                Lexeme::LtEq,
                Lexeme::GtEq,
                Lexeme::Lt,
                Lexeme::Gt,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_quoted_identifier() {
        let tokens = lex("jump (`k`);");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Jump,
                Lexeme::LParen,
                Lexeme::Ident("k".to_string()),
                Lexeme::RParen,
                Lexeme::Semicolon,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_skips_comments() {
        let tokens = lex("let x // the answer\n= 4;");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Let,
                Lexeme::Ident("x".to_string()),
                Lexeme::Eq,
                Lexeme::Number("4".to_string()),
                Lexeme::Semicolon,
                Lexeme::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_reports_stray_bytes() {
        let (tokens, errors) = Lexer::new("let ?").tokenize();
        assert_eq!(errors.len(), 1);
        assert_eq!(tokens.last().unwrap().item, Lexeme::Eof);
    }
}
