//! 表达式词法分析器
//!
//! 将表达式字符串切分为记号流。只识别封闭的语法集合：
//! 标识符、字符串/数字/布尔/null 字面量、比较与逻辑操作符、括号和点号。

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// 记号类型
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Decimal(f64),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Minus,
    LParen,
    RParen,
    Comma,
    Dot,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "标识符 '{}'", name),
            Self::Str(s) => write!(f, "字符串 \"{}\"", s),
            Self::Int(i) => write!(f, "整数 {}", i),
            Self::Decimal(d) => write!(f, "小数 {}", d),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Not => write!(f, "!"),
            Self::Eq => write!(f, "=="),
            Self::Neq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Minus => write!(f, "-"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::Eof => write!(f, "表达式结尾"),
        }
    }
}

/// 记号，position 为其在输入中的字节偏移
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// 词法错误
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub position: usize,
    pub message: String,
}

/// 表达式词法分析器
pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// 切分全部记号，结尾总是附加一个 Eof
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let Some((pos, ch)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: self.input.len(),
            });
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '-' => TokenKind::Minus,
            '"' => self.read_string(pos)?,
            '=' => {
                // `=` 与 `==` 等价
                self.eat('=');
                TokenKind::Eq
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Neq
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Lte
                } else if self.eat('>') {
                    TokenKind::Neq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Gte
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if !self.eat('&') {
                    return Err(LexError {
                        position: pos,
                        message: "不支持单个 '&'，请使用 '&&'".to_string(),
                    });
                }
                TokenKind::And
            }
            '|' => {
                if !self.eat('|') {
                    return Err(LexError {
                        position: pos,
                        message: "不支持单个 '|'，请使用 '||'".to_string(),
                    });
                }
                TokenKind::Or
            }
            c if c.is_ascii_digit() => self.read_number(pos)?,
            c if c.is_alphabetic() || c == '_' => self.read_word(pos),
            other => {
                return Err(LexError {
                    position: pos,
                    message: format!("无法识别的字符 '{}'", other),
                });
            }
        };

        Ok(Token {
            kind,
            position: pos,
        })
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn read_string(&mut self, start: usize) -> Result<TokenKind, LexError> {
        let mut value = String::new();
        while let Some((pos, ch)) = self.chars.next() {
            match ch {
                '"' => return Ok(TokenKind::Str(value)),
                '\\' => {
                    let escaped = match self.chars.next() {
                        Some((_, '"')) => '"',
                        Some((_, '\\')) => '\\',
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, other)) => {
                            return Err(LexError {
                                position: pos,
                                message: format!("无效的转义序列 '\\{}'", other),
                            });
                        }
                        None => break,
                    };
                    value.push(escaped);
                }
                c => value.push(c),
            }
        }

        Err(LexError {
            position: start,
            message: "字符串字面量未闭合".to_string(),
        })
    }

    fn read_number(&mut self, start: usize) -> Result<TokenKind, LexError> {
        let mut end = start + 1;
        while let Some((pos, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit()) {
            end = pos + c.len_utf8();
        }

        // 小数点后必须紧跟数字，否则 `.` 留给后续记号
        let mut is_decimal = false;
        if let Some(&(dot_pos, '.')) = self.chars.peek() {
            let after_dot = self.input[dot_pos + 1..].chars().next();
            if after_dot.is_some_and(|c| c.is_ascii_digit()) {
                self.chars.next();
                is_decimal = true;
                while let Some((pos, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit()) {
                    end = pos + c.len_utf8();
                }
            }
        }

        let text = &self.input[start..end];
        if is_decimal {
            text.parse::<f64>()
                .map(TokenKind::Decimal)
                .map_err(|e| LexError {
                    position: start,
                    message: format!("无效的小数 '{}': {}", text, e),
                })
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|e| LexError {
                    position: start,
                    message: format!("无效的整数 '{}': {}", text, e),
                })
        }
    }

    fn read_word(&mut self, start: usize) -> TokenKind {
        let mut end = start + self.input[start..].chars().next().map_or(1, char::len_utf8);
        while let Some((pos, c)) = self
            .chars
            .next_if(|(_, c)| c.is_alphanumeric() || *c == '_')
        {
            end = pos + c.len_utf8();
        }

        let word = &self.input[start..end];
        keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()))
    }
}

/// 关键字不区分大小写
fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

/// 是否为保留字（任意大小写），保留字不能用作字段名
pub fn is_reserved_word(word: &str) -> bool {
    keyword(word).is_some()
}
