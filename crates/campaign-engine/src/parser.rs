//! 表达式语法分析器
//!
//! 递归下降解析，优先级从低到高：`||` < `&&` < `!` < 比较 < 操作数。
//! 解析结果是未绑定记录类型的语法树，字段解析和类型检查由编译器完成。

use crate::lexer::{LexError, Lexer, Token, TokenKind};
use crate::operators::{CompareOp, LogicalOperator, StringMethod};

/// 语法树最大嵌套深度
///
/// `!`、括号和逻辑运算链都会加深语法树，编译和求值都是递归的，深度必须有上限。
pub const MAX_DEPTH: usize = 64;

/// 字面量
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Decimal(f64),
    Bool(bool),
    Null,
}

/// 表达式语法树
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Field {
        path: String,
        position: usize,
    },
    Not(Box<Expr>),
    Logical {
        op: LogicalOperator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        position: usize,
    },
    Method {
        method: StringMethod,
        target: Box<Expr>,
        argument: Box<Expr>,
        position: usize,
    },
}

/// 语法错误
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub position: usize,
    pub message: String,
}

impl From<LexError> for SyntaxError {
    fn from(e: LexError) -> Self {
        Self {
            position: e.position,
            message: e.message,
        }
    }
}

/// 将表达式字符串解析为语法树
pub fn parse(input: &str) -> Result<Expr, SyntaxError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };

    let expr = parser.parse_or()?;

    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(SyntaxError {
            position: trailing.position,
            message: format!("意外的 {}", trailing.kind),
        });
    }

    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize 保证末尾有 Eof，游标不会越过它
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let found = self.peek();
            Err(SyntaxError {
                position: found.position,
                message: format!("期望 {}, 实际为 {}", what, found.kind),
            })
        }
    }

    /// 进入一层嵌套，超过上限时报错
    fn descend(&mut self, position: usize) -> Result<(), SyntaxError> {
        if self.depth >= MAX_DEPTH {
            return Err(SyntaxError {
                position,
                message: "表达式嵌套过深".to_string(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let entry_depth = self.depth;
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            // 左结合链每多一项，语法树就深一层
            let position = self.advance().position;
            self.descend(position)?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical {
                op: LogicalOperator::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = entry_depth;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let entry_depth = self.depth;
        let mut lhs = self.parse_unary()?;
        while self.check(&TokenKind::And) {
            let position = self.advance().position;
            self.descend(position)?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Logical {
                op: LogicalOperator::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = entry_depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Not) {
            let position = self.advance().position;
            self.descend(position)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_operand()?;

        let op = match self.peek().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Neq => CompareOp::Neq,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Lte => CompareOp::Lte,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Gte => CompareOp::Gte,
            _ => return Ok(lhs),
        };
        let position = self.advance().position;
        let rhs = self.parse_operand()?;

        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            position,
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::LParen => {
                self.descend(token.position)?;
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            TokenKind::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            TokenKind::Decimal(d) => Ok(Expr::Literal(Literal::Decimal(d))),
            TokenKind::True => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Literal::Null)),
            TokenKind::Minus => {
                let number = self.advance();
                match number.kind {
                    TokenKind::Int(i) => Ok(Expr::Literal(Literal::Int(-i))),
                    TokenKind::Decimal(d) => Ok(Expr::Literal(Literal::Decimal(-d))),
                    other => Err(SyntaxError {
                        position: number.position,
                        message: format!("'-' 之后期望数字, 实际为 {}", other),
                    }),
                }
            }
            TokenKind::Ident(name) => self.parse_path(name, token.position),
            TokenKind::Eof => Err(SyntaxError {
                position: token.position,
                message: "表达式不完整，缺少操作数".to_string(),
            }),
            other => Err(SyntaxError {
                position: token.position,
                message: format!("意外的 {}", other),
            }),
        }
    }

    /// 解析点号路径，路径末尾可跟一次字符串方法调用
    fn parse_path(&mut self, head: String, position: usize) -> Result<Expr, SyntaxError> {
        let mut path = head;

        while self.check(&TokenKind::Dot) {
            self.advance();
            let segment = self.advance();
            let name = match segment.kind {
                TokenKind::Ident(name) => name,
                other => {
                    return Err(SyntaxError {
                        position: segment.position,
                        message: format!("'.' 之后期望字段名, 实际为 {}", other),
                    });
                }
            };

            if !self.check(&TokenKind::LParen) {
                path.push('.');
                path.push_str(&name);
                continue;
            }

            let method = StringMethod::from_name(&name).ok_or_else(|| SyntaxError {
                position: segment.position,
                message: format!("不支持的方法 '{}'", name),
            })?;
            self.advance();
            let argument = self.parse_operand()?;
            self.expect(TokenKind::RParen, "')'")?;

            return Ok(Expr::Method {
                method,
                target: Box::new(Expr::Field { path, position }),
                argument: Box::new(argument),
                position: segment.position,
            });
        }

        Ok(Expr::Field { path, position })
    }
}
