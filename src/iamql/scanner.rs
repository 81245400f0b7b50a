use crate::error::ParseError;
use crate::iamql::ast::{Token, TokenType};

pub struct Scanner {
    source_chars: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: u32,
    col: u32,
    /// Column of the first character of the token being scanned.
    start_col: u32,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        Self {
            source_chars: source.chars().collect(),
            tokens: vec![],
            start: 0,
            current: 0,
            line: 1,
            col: 1,
            start_col: 1,
        }
    }

    pub fn tokens(&self) -> &Vec<Token> {
        &self.tokens
    }

    fn advance(&mut self) -> char {
        let c = self.source_chars[self.current];
        self.current += 1;
        self.col += 1;
        c
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source_chars.len()
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source_chars[self.current]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() != expected {
            return false;
        };

        self.current += 1;
        self.col += 1;
        true
    }

    fn add_token(&mut self, token_type: TokenType) {
        self.tokens.push(Token {
            kind: token_type,
            lexeme: self.current_source_str(),
            line: self.line,
            col: self.start_col,
        });
    }

    fn current_source_str(&self) -> String {
        self.source_chars[self.start..self.current].iter().collect()
    }

    fn reset(&mut self) {
        self.tokens.clear();
        self.start = 0;
        self.current = 0;
        self.col = 1;
        self.start_col = 1;
        self.line = 1;
    }

    fn new_line(&mut self) {
        self.line += 1;
        self.col = 1;
    }

    pub fn scan(&mut self) -> Result<(), ParseError> {
        self.reset();
        while self.current < self.source_chars.len() {
            self.start = self.current;
            self.start_col = self.col;
            self.scan_token()?;
        }
        self.tokens.push(Token {
            kind: TokenType::Eof,
            lexeme: String::from("eof"),
            line: self.line,
            col: self.col,
        });

        Ok(())
    }

    fn match_string(&mut self) -> Result<(), ParseError> {
        loop {
            let peek_char = self.peek();
            if peek_char == '\0' || peek_char == '\n' {
                return Err(self.error("Found unterminated string"));
            }
            let c = self.advance();
            if c == '\\' && !self.is_at_end() {
                self.advance();
                continue;
            }
            if c == '"' {
                break;
            }
        }
        let raw: String = self.source_chars[self.start + 1..self.current - 1]
            .iter()
            .collect();
        self.add_token(TokenType::String(unescape(&raw)));
        Ok(())
    }

    fn match_number(&mut self) -> Result<(), ParseError> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let peek_char = self.peek();
        if peek_char.is_ascii_alphabetic() || peek_char == '_' {
            return Err(self.error("Found invalid number"));
        }
        self.add_token(TokenType::Number(self.current_source_str()));
        Ok(())
    }

    fn match_keyword_or_identifier(&mut self) {
        loop {
            let peek_char = self.peek();
            if !(peek_char.is_ascii_alphanumeric() || peek_char == '_') {
                break;
            }
            self.advance();
        }
        let identifier = self.current_source_str();

        match identifier.to_lowercase().as_str() {
            "and" => self.add_token(TokenType::And),
            "in" => self.add_token(TokenType::In),
            "like" => self.add_token(TokenType::Like),
            "not" => self.add_token(TokenType::Not),
            "or" => self.add_token(TokenType::Or),
            _ => self.add_token(TokenType::Identifier(identifier)),
        }
    }

    fn scan_token(&mut self) -> Result<(), ParseError> {
        let curr_char = self.advance();
        match curr_char {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            '[' => self.add_token(TokenType::LeftSquare),
            ']' => self.add_token(TokenType::RightSquare),
            ',' => self.add_token(TokenType::Comma),
            '.' => self.add_token(TokenType::Dot),
            ':' => self.add_token(TokenType::Colon),
            ';' => self.add_token(TokenType::Semicolon),
            '=' => {
                if self.match_char('=') {
                    self.add_token(TokenType::EqualEqual);
                } else {
                    return Err(self.error("Expected `==`"));
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenType::BangEqual);
                } else {
                    return Err(self.error("Expected `!=`"));
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.add_token(TokenType::LessEqual);
                } else {
                    self.add_token(TokenType::Less);
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.add_token(TokenType::GreaterEqual);
                } else {
                    self.add_token(TokenType::Greater);
                }
            }
            '#' => loop {
                let peek_char = self.peek();
                if peek_char == '\n' || peek_char == '\0' {
                    break;
                }
                self.advance();
            },
            '\n' => {
                self.new_line();
            }
            '\r' | ' ' | '\t' => {}

            '"' => self.match_string()?,

            c if c.is_ascii_digit() => self.match_number()?,

            // Keywords and identifiers
            c if c.is_ascii_alphabetic() || c == '_' => {
                self.match_keyword_or_identifier();
            }

            _ => {
                return Err(self.error(&format!(
                    "Found unexpected character while scanning: {}",
                    curr_char
                )));
            }
        }
        Ok(())
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: format!("Scanner error: {}", message),
            lexeme: self.current_source_str(),
            line: self.line,
            col: self.start_col,
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
