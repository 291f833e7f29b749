//! Hand-rolled tokenizer with line/column tracking
//!
//! Template literals are scanned here in full: the lexer yields the
//! literal's chunks plus the raw source of each `${...}` hole, which the
//! parser re-parses as an expression.

use crate::error::ParseError;

/// Piece of a scanned template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TplPiece {
    Chunk(String),
    Expr {
        source: String,
        line: u32,
        column: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Template(Vec<TplPiece>),
    Ident(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Arrow,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    QuestionQuestion,
    Not,
    PlusPlus,
    MinusMinus,
    Eof,
}

impl Tok {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Tok::Num(n) => format!("number {}", n),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Template(_) => "template literal".to_string(),
            Tok::Ident(name) => format!("'{}'", name),
            Tok::Eof => "end of input".to_string(),
            other => format!("'{}'", other.punct()),
        }
    }

    fn punct(&self) -> &'static str {
        match self {
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::LBracket => "[",
            Tok::RBracket => "]",
            Tok::Comma => ",",
            Tok::Semi => ";",
            Tok::Colon => ":",
            Tok::Dot => ".",
            Tok::Arrow => "=>",
            Tok::Question => "?",
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::Percent => "%",
            Tok::Assign => "=",
            Tok::PlusAssign => "+=",
            Tok::MinusAssign => "-=",
            Tok::StarAssign => "*=",
            Tok::SlashAssign => "/=",
            Tok::PercentAssign => "%=",
            Tok::EqEq => "==",
            Tok::EqEqEq => "===",
            Tok::NotEq => "!=",
            Tok::NotEqEq => "!==",
            Tok::Lt => "<",
            Tok::LtEq => "<=",
            Tok::Gt => ">",
            Tok::GtEq => ">=",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::QuestionQuestion => "??",
            Tok::Not => "!",
            Tok::PlusPlus => "++",
            Tok::MinusMinus => "--",
            _ => "?",
        }
    }
}

/// A token with the position where it starts (1-based).
#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize starting at the given position, for template-hole sources.
    pub fn new_at(source: &str, line: u32, column: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            column,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let column = self.column;
            if self.at_end() {
                tokens.push(Token {
                    tok: Tok::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            }
            let tok = self.next_token()?;
            tokens.push(Token { tok, line, column });
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, self.column, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err(self.error("unterminated block comment")),
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Tok, ParseError> {
        let c = self.peek().expect("next_token called at end");

        if c.is_ascii_digit() {
            return self.number();
        }
        if c == '_' || c == '$' || c.is_alphabetic() {
            return Ok(self.ident());
        }
        if c == '"' || c == '\'' {
            return self.string(c);
        }
        if c == '`' {
            return self.template();
        }

        self.bump();
        let two = |lexer: &mut Lexer, next: char| -> bool {
            if lexer.peek() == Some(next) {
                lexer.bump();
                true
            } else {
                false
            }
        };

        let tok = match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ',' => Tok::Comma,
            ';' => Tok::Semi,
            ':' => Tok::Colon,
            '.' => Tok::Dot,
            '?' => {
                if two(self, '?') {
                    Tok::QuestionQuestion
                } else {
                    Tok::Question
                }
            }
            '+' => {
                if two(self, '+') {
                    Tok::PlusPlus
                } else if two(self, '=') {
                    Tok::PlusAssign
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if two(self, '-') {
                    Tok::MinusMinus
                } else if two(self, '=') {
                    Tok::MinusAssign
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if two(self, '=') {
                    Tok::StarAssign
                } else {
                    Tok::Star
                }
            }
            '/' => {
                if two(self, '=') {
                    Tok::SlashAssign
                } else {
                    Tok::Slash
                }
            }
            '%' => {
                if two(self, '=') {
                    Tok::PercentAssign
                } else {
                    Tok::Percent
                }
            }
            '=' => {
                if two(self, '=') {
                    if two(self, '=') {
                        Tok::EqEqEq
                    } else {
                        Tok::EqEq
                    }
                } else if two(self, '>') {
                    Tok::Arrow
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                if two(self, '=') {
                    if two(self, '=') {
                        Tok::NotEqEq
                    } else {
                        Tok::NotEq
                    }
                } else {
                    Tok::Not
                }
            }
            '<' => {
                if two(self, '=') {
                    Tok::LtEq
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if two(self, '=') {
                    Tok::GtEq
                } else {
                    Tok::Gt
                }
            }
            '&' => {
                if two(self, '&') {
                    Tok::AndAnd
                } else {
                    return Err(self.error("unexpected character '&'"));
                }
            }
            '|' => {
                if two(self, '|') {
                    Tok::OrOr
                } else {
                    return Err(self.error("unexpected character '|'"));
                }
            }
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(tok)
    }

    fn number(&mut self) -> Result<Tok, ParseError> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut exp = String::new();
            exp.push(self.bump().unwrap());
            if matches!(self.peek(), Some('+') | Some('-')) {
                exp.push(self.bump().unwrap());
            }
            if !matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                return Err(self.error("malformed number exponent"));
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                exp.push(self.bump().unwrap());
            }
            text.push_str(&exp);
        }
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(format!("malformed number '{}'", text)))
    }

    fn ident(&mut self) -> Tok {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c == '_' || c == '$' || c.is_alphanumeric()) {
            text.push(self.bump().unwrap());
        }
        Tok::Ident(text)
    }

    fn escape(&mut self) -> Result<char, ParseError> {
        match self.bump() {
            None => Err(self.error("unterminated escape sequence")),
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('u') => {
                let mut hex = String::new();
                if self.peek() == Some('{') {
                    self.bump();
                    while let Some(c) = self.peek() {
                        if c == '}' {
                            break;
                        }
                        hex.push(self.bump().unwrap());
                    }
                    if self.bump() != Some('}') {
                        return Err(self.error("unterminated unicode escape"));
                    }
                } else {
                    for _ in 0..4 {
                        match self.bump() {
                            Some(c) => hex.push(c),
                            None => return Err(self.error("unterminated unicode escape")),
                        }
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("invalid unicode escape '\\u{}'", hex)))
            }
            // \\, \", \', \` and anything else escape to themselves
            Some(other) => Ok(other),
        }
    }

    fn string(&mut self, quote: char) -> Result<Tok, ParseError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => return Ok(Tok::Str(text)),
                Some('\n') => return Err(self.error("unterminated string literal")),
                Some('\\') => text.push(self.escape()?),
                Some(c) => text.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<Tok, ParseError> {
        self.bump();
        let mut pieces = Vec::new();
        let mut chunk = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template literal")),
                Some('`') => {
                    self.bump();
                    if !chunk.is_empty() || pieces.is_empty() {
                        pieces.push(TplPiece::Chunk(chunk));
                    }
                    return Ok(Tok::Template(pieces));
                }
                Some('\\') => {
                    self.bump();
                    chunk.push(self.escape()?);
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    if !chunk.is_empty() {
                        pieces.push(TplPiece::Chunk(std::mem::take(&mut chunk)));
                    }
                    self.bump();
                    self.bump();
                    let line = self.line;
                    let column = self.column;
                    let source = self.template_hole()?;
                    pieces.push(TplPiece::Expr {
                        source,
                        line,
                        column,
                    });
                }
                Some(_) => chunk.push(self.bump().unwrap()),
            }
        }
    }

    /// Scan the raw source of a `${...}` hole up to its matching brace.
    fn template_hole(&mut self) -> Result<String, ParseError> {
        let mut depth = 1usize;
        let mut source = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template expression")),
                Some('{') => {
                    depth += 1;
                    source.push(self.bump().unwrap());
                }
                Some('}') => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return Ok(source);
                    }
                    source.push('}');
                }
                Some(q @ '"') | Some(q @ '\'') | Some(q @ '`') => {
                    source.push(self.bump().unwrap());
                    loop {
                        match self.bump() {
                            None => return Err(self.error("unterminated string in template")),
                            Some('\\') => {
                                source.push('\\');
                                if let Some(c) = self.bump() {
                                    source.push(c);
                                }
                            }
                            Some(c) => {
                                source.push(c);
                                if c == q {
                                    break;
                                }
                            }
                        }
                    }
                }
                Some(_) => source.push(self.bump().unwrap()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn punctuation_and_numbers() {
        assert_eq!(
            toks("1 + 2.5;"),
            vec![Tok::Num(1.0), Tok::Plus, Tok::Num(2.5), Tok::Semi, Tok::Eof]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            toks("=== !== => ?? <= ++"),
            vec![
                Tok::EqEqEq,
                Tok::NotEqEq,
                Tok::Arrow,
                Tok::QuestionQuestion,
                Tok::LtEq,
                Tok::PlusPlus,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            toks(r#"'a\nb' "c\"d""#),
            vec![
                Tok::Str("a\nb".to_string()),
                Tok::Str("c\"d".to_string()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            toks("1 // line\n/* block */ 2"),
            vec![Tok::Num(1.0), Tok::Num(2.0), Tok::Eof]
        );
    }

    #[test]
    fn template_literal_pieces() {
        let tokens = toks("`a${x + 1}b`");
        match &tokens[0] {
            Tok::Template(pieces) => {
                assert_eq!(pieces.len(), 3);
                assert_eq!(pieces[0], TplPiece::Chunk("a".to_string()));
                match &pieces[1] {
                    TplPiece::Expr { source, .. } => assert_eq!(source, "x + 1"),
                    other => panic!("expected expr piece, got {:?}", other),
                }
                assert_eq!(pieces[2], TplPiece::Chunk("b".to_string()));
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn template_hole_with_nested_braces_and_strings() {
        let tokens = toks("`v=${ {a: '}'} }`");
        match &tokens[0] {
            Tok::Template(pieces) => match &pieces[1] {
                TplPiece::Expr { source, .. } => assert_eq!(source.trim(), "{a: '}'}"),
                other => panic!("expected expr piece, got {:?}", other),
            },
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn error_carries_position() {
        let err = Lexer::new("let x = #").tokenize().unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 10);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }
}
