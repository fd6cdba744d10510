use crate::error::ScheduleRuleError;

use super::lexer::{Token, TokenKind};

/// Maximum rule text length accepted at registration.
pub(super) const MAX_RULE_LEN: usize = 1024;
/// Maximum AST node count.
pub(super) const MAX_NODES: usize = 256;
/// Maximum recursion depth while parsing.
pub(super) const MAX_DEPTH: usize = 32;
/// Free variable name when the rule has no `lambda` prefix.
pub(super) const DEFAULT_VAR: &str = "t";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Func {
    Int,
    Floor,
    Ceil,
    Round,
    Abs,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Func::Int),
            "floor" => Some(Func::Floor),
            "ceil" => Some(Func::Ceil),
            "round" => Some(Func::Round),
            "abs" => Some(Func::Abs),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            _ => None,
        }
    }

    pub(super) const fn name(self) -> &'static str {
        match self {
            Func::Int => "int",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
        }
    }

    const fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Func::Int | Func::Floor | Func::Ceil | Func::Round | Func::Abs => (1, Some(1), "1"),
            Func::Min | Func::Max => (1, None, "at least 1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Num(f64),
    Bool(bool),
    Var,
    Done,
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

#[derive(Debug)]
pub(super) struct ParsedRule {
    pub(super) var: String,
    pub(super) expr: Expr,
}

pub(super) fn parse(tokens: Vec<Token>) -> Result<ParsedRule, ScheduleRuleError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        nodes: 0,
        var: DEFAULT_VAR.to_owned(),
    };
    parser.lambda_prefix()?;
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(ScheduleRuleError::UnexpectedToken {
            found: token.kind.describe(),
            offset: token.offset,
            expected: "end of rule",
        });
    }
    Ok(ParsedRule {
        var: parser.var,
        expr,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    nodes: usize,
    var: String,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos = self.pos.saturating_add(1);
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(name), .. }) if name == keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| &token.kind == kind) {
            self.pos = self.pos.saturating_add(1);
            return true;
        }
        false
    }

    fn expect(&mut self, kind: &TokenKind, expected: &'static str) -> Result<(), ScheduleRuleError> {
        match self.advance() {
            Some(token) if &token.kind == kind => Ok(()),
            Some(token) => Err(ScheduleRuleError::UnexpectedToken {
                found: token.kind.describe(),
                offset: token.offset,
                expected,
            }),
            None => Err(ScheduleRuleError::UnexpectedEnd { expected }),
        }
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> Result<(), ScheduleRuleError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) if name == keyword => Ok(()),
            Some(token) => Err(ScheduleRuleError::UnexpectedToken {
                found: token.kind.describe(),
                offset: token.offset,
                expected: keyword,
            }),
            None => Err(ScheduleRuleError::UnexpectedEnd { expected: keyword }),
        }
    }

    fn node(&mut self, expr: Expr) -> Result<Expr, ScheduleRuleError> {
        self.nodes = self.nodes.saturating_add(1);
        if self.nodes > MAX_NODES {
            return Err(ScheduleRuleError::TooLarge { max: MAX_NODES });
        }
        Ok(expr)
    }

    fn enter(&mut self) -> Result<(), ScheduleRuleError> {
        self.depth = self.depth.saturating_add(1);
        if self.depth > MAX_DEPTH {
            return Err(ScheduleRuleError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn lambda_prefix(&mut self) -> Result<(), ScheduleRuleError> {
        if !self.peek_keyword("lambda") {
            return Ok(());
        }
        self.advance();
        match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                offset,
            }) => {
                if is_keyword(&name) || Func::lookup(&name).is_some() {
                    return Err(ScheduleRuleError::UnexpectedToken {
                        found: name,
                        offset,
                        expected: "variable name",
                    });
                }
                self.var = name;
            }
            Some(token) => {
                return Err(ScheduleRuleError::UnexpectedToken {
                    found: token.kind.describe(),
                    offset: token.offset,
                    expected: "variable name",
                });
            }
            None => {
                return Err(ScheduleRuleError::UnexpectedEnd {
                    expected: "variable name",
                });
            }
        }
        self.expect(&TokenKind::Colon, "':'")
    }

    fn expr(&mut self) -> Result<Expr, ScheduleRuleError> {
        self.enter()?;
        let result = self.conditional();
        self.leave();
        result
    }

    fn conditional(&mut self) -> Result<Expr, ScheduleRuleError> {
        let value = self.or()?;
        if self.peek_keyword("if") {
            self.advance();
            let cond = self.or()?;
            self.expect_keyword("else")?;
            let otherwise = self.expr()?;
            return self.node(Expr::Cond {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        if self.eat(&TokenKind::Question) {
            let then = self.expr()?;
            self.expect(&TokenKind::Colon, "':'")?;
            let otherwise = self.expr()?;
            return self.node(Expr::Cond {
                cond: Box::new(value),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or(&mut self) -> Result<Expr, ScheduleRuleError> {
        let mut lhs = self.and()?;
        while self.peek_keyword("or") {
            self.advance();
            let rhs = self.and()?;
            lhs = self.node(Expr::Or(Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ScheduleRuleError> {
        let mut lhs = self.not()?;
        while self.peek_keyword("and") {
            self.advance();
            let rhs = self.not()?;
            lhs = self.node(Expr::And(Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ScheduleRuleError> {
        if self.peek_keyword("not") {
            self.advance();
            self.enter()?;
            let inner = self.not();
            self.leave();
            let inner = inner?;
            return self.node(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScheduleRuleError> {
        let lhs = self.sum()?;
        let Some(op) = self.peek().and_then(|token| cmp_op(&token.kind)) else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.sum()?;
        if let Some(token) = self.peek()
            && cmp_op(&token.kind).is_some()
        {
            return Err(ScheduleRuleError::UnexpectedToken {
                found: token.kind.describe(),
                offset: token.offset,
                expected: "a single comparison (use 'and' to combine)",
            });
        }
        self.node(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn sum(&mut self) -> Result<Expr, ScheduleRuleError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().map(|token| &token.kind) {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = self.node(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })?;
        }
    }

    fn term(&mut self) -> Result<Expr, ScheduleRuleError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().map(|token| &token.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::SlashSlash) => BinOp::FloorDiv,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = self.node(Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })?;
        }
    }

    fn unary(&mut self) -> Result<Expr, ScheduleRuleError> {
        if self.eat(&TokenKind::Minus) {
            self.enter()?;
            let inner = self.unary();
            self.leave();
            let inner = inner?;
            return self.node(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&TokenKind::Plus) {
            self.enter()?;
            let inner = self.unary();
            self.leave();
            return inner;
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ScheduleRuleError> {
        let base = self.atom()?;
        if self.eat(&TokenKind::StarStar) {
            self.enter()?;
            let exponent = self.unary();
            self.leave();
            let exponent = exponent?;
            return self.node(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ScheduleRuleError> {
        let Some(token) = self.advance() else {
            return Err(ScheduleRuleError::UnexpectedEnd {
                expected: "a number, variable, call or '('",
            });
        };
        match token.kind {
            TokenKind::Number(value) => self.node(Expr::Num(value)),
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => self.named(name, token.offset),
            other => Err(ScheduleRuleError::UnexpectedToken {
                found: other.describe(),
                offset: token.offset,
                expected: "a number, variable, call or '('",
            }),
        }
    }

    fn named(&mut self, name: String, offset: usize) -> Result<Expr, ScheduleRuleError> {
        match name.as_str() {
            "None" => return self.node(Expr::Done),
            "True" => return self.node(Expr::Bool(true)),
            "False" => return self.node(Expr::Bool(false)),
            _ => {}
        }
        if name == self.var {
            return self.node(Expr::Var);
        }
        if is_keyword(&name) {
            return Err(ScheduleRuleError::UnexpectedToken {
                found: name,
                offset,
                expected: "a number, variable, call or '('",
            });
        }
        let is_call = self
            .peek()
            .is_some_and(|token| token.kind == TokenKind::LParen);
        if !is_call {
            return Err(ScheduleRuleError::UnknownName {
                name,
                var: self.var.clone(),
            });
        }
        let Some(func) = Func::lookup(&name) else {
            return Err(ScheduleRuleError::UnknownFunction { name });
        };
        self.advance();

        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.expr()?);
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                self.expect(&TokenKind::RParen, "')' or ','")?;
                break;
            }
        }

        let (min, max, expected) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(ScheduleRuleError::Arity {
                name: func.name(),
                expected,
                got: args.len(),
            });
        }
        self.node(Expr::Call { func, args })
    }
}

fn cmp_op(kind: &TokenKind) -> Option<CmpOp> {
    match kind {
        TokenKind::Lt => Some(CmpOp::Lt),
        TokenKind::Le => Some(CmpOp::Le),
        TokenKind::Gt => Some(CmpOp::Gt),
        TokenKind::Ge => Some(CmpOp::Ge),
        TokenKind::EqEq => Some(CmpOp::Eq),
        TokenKind::Ne => Some(CmpOp::Ne),
        _ => None,
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "lambda" | "if" | "else" | "and" | "or" | "not" | "None" | "True" | "False"
    )
}
