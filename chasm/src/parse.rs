use thiserror::Error;

use crate::ast::{
    AliasTarget, Assignment, BinaryOp, Calc, CmpOp, Condition, Control, Directive, ImmOp, Macro,
    MonitorFormat, Operand, RValue, Reg, RegOp, Statement, StringMode, UnaryOp, MAX_CALC_DEPTH,
};
use crate::lex::{self, Keyword, Operator, Register, Token, TokenKind};
use crate::Interner;


#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}, found `{found}`")]
pub struct ParseError {
    pub line: u32,
    pub found: String,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("unexpected token")]
    Unexpected,
    #[error("`if … then` without a statement is only allowed right before `again`")]
    DanglingIf,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    si: &'a Interner,
    /// current calc nesting
    depth: usize,
}

type Result<T> = std::result::Result<T, ParseError>;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], si: &'a Interner) -> Self {
        Self {
            tokens,
            pos: 0,
            si,
            depth: 0,
        }
    }

    pub fn parse_all(mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_none() {
                return Ok(statements);
            }
            statements.push(self.statement(false)?);
        }
    }

    // lookahead

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }
    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }
    fn peek_nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }
    fn bump(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }
    fn next(&mut self, what: &'static str) -> Result<Token> {
        self.bump()
            .ok_or_else(|| self.error(ParseErrorKind::Expected(what)))
    }
    fn eat(&mut self, kind: TokenKind, what: &'static str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.error(ParseErrorKind::Expected(what))),
        }
    }
    fn skip_newlines(&mut self) {
        while self.peek_kind() == Some(TokenKind::Newline) {
            self.pos += 1;
        }
    }
    fn at_line_end(&self) -> bool {
        matches!(self.peek_kind(), None | Some(TokenKind::Newline))
    }
    /// Directives must end their line, or stop before the `}` closing a
    /// one-line body.
    fn end_of_line(&mut self) -> Result<()> {
        match self.peek_kind() {
            None | Some(TokenKind::CloseBrace) => Ok(()),
            Some(TokenKind::Newline) => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(ParseErrorKind::Expected("end of line"))),
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        match self.peek() {
            Some(token) => self.error_at(token, kind),
            None => ParseError {
                line: self.tokens.last().map_or(1, |t| t.line),
                found: "end of input".to_owned(),
                kind,
            },
        }
    }
    fn error_at(&self, token: Token, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: token.line,
            found: token.describe(self.si),
            kind,
        }
    }

    // operands

    fn name(&mut self) -> Result<Token> {
        self.eat(TokenKind::Name, "a name")
    }

    fn reg(&mut self) -> Result<Reg> {
        match self.peek() {
            Some(token @ Token { kind: TokenKind::Register(Register::V(n)), .. }) => {
                self.pos += 1;
                Ok(Reg::Literal(token, n))
            }
            Some(token @ Token { kind: TokenKind::Name, .. }) => {
                self.pos += 1;
                Ok(Reg::Pending(token))
            }
            _ => Err(self.error(ParseErrorKind::Expected("a register"))),
        }
    }

    /// A number or a name, never a register.
    fn value(&mut self) -> Result<RValue> {
        match self.peek() {
            Some(token @ Token { kind: TokenKind::Number(n), .. }) => {
                self.pos += 1;
                Ok(RValue::Number(token, n))
            }
            Some(token @ Token { kind: TokenKind::Name | TokenKind::Constant(_), .. }) => {
                self.pos += 1;
                Ok(RValue::Name(token))
            }
            _ => Err(self.error(ParseErrorKind::Expected("a number or name"))),
        }
    }

    fn rvalue(&mut self) -> Result<RValue> {
        match self.peek_kind() {
            Some(TokenKind::Register(Register::V(_))) => Ok(RValue::Register(self.reg()?)),
            _ => self.value(),
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        if self.peek_kind() == Some(TokenKind::OpenBrace) {
            Ok(Operand::Calc(self.calc_block()?))
        } else {
            Ok(Operand::Value(self.value()?))
        }
    }

    // statements

    fn statement(&mut self, allow_dangling: bool) -> Result<Statement> {
        let token = self
            .peek()
            .ok_or_else(|| self.error(ParseErrorKind::Expected("a statement")))?;
        match token.kind {
            TokenKind::Directive(_) => self.directive(),
            TokenKind::Keyword(kw) => self.keyword(kw, allow_dangling),
            TokenKind::Register(_) | TokenKind::Name if self.starts_assignment() => {
                Ok(Statement::Assignment(self.assignment()?))
            }
            TokenKind::Name => {
                self.pos += 1;
                let mut args = Vec::new();
                while !self.at_line_end() && self.peek_kind() != Some(TokenKind::CloseBrace) {
                    args.extend(self.bump());
                }
                if args.is_empty() {
                    Ok(Statement::Call(token))
                } else {
                    Ok(Statement::MacroCall { name: token, args })
                }
            }
            TokenKind::Number(n) => {
                self.pos += 1;
                Ok(Statement::Data(token, n))
            }
            TokenKind::Register(_) => {
                self.pos += 1;
                Err(self.error(ParseErrorKind::Expected("an assignment operator")))
            }
            _ => Err(self.error(ParseErrorKind::Unexpected)),
        }
    }

    fn starts_assignment(&self) -> bool {
        match self.peek_nth_kind(1) {
            Some(TokenKind::Operator(op)) => {
                op.is_assignment() || matches!(op, Operator::Eq | Operator::Ne)
            }
            _ => false,
        }
    }

    fn keyword(&mut self, kw: Keyword, allow_dangling: bool) -> Result<Statement> {
        let token = self.next("a statement")?;
        Ok(match kw {
            Keyword::Return => Statement::Return(token),
            Keyword::Clear => Statement::Clear(token),
            Keyword::Bcd => Statement::Bcd(token, self.reg()?),
            Keyword::Save => Statement::Save(token, self.reg()?),
            Keyword::Load => Statement::Load(token, self.reg()?),
            Keyword::Sprite => Statement::Sprite {
                token,
                x: self.reg()?,
                y: self.reg()?,
                height: self.value()?,
            },
            Keyword::Jump => Statement::Jump(token, self.value()?),
            Keyword::Jump0 => Statement::Jump0(token, self.value()?),
            Keyword::If => self.if_statement(token, allow_dangling)?,
            Keyword::Loop => {
                let (body, _) = self.block(&[Keyword::Again], "`again`", true)?;
                Statement::Control(Control::Loop { token, body })
            }
            Keyword::While => {
                let cond = self.condition()?;
                self.skip_newlines();
                let body = Box::new(self.statement(false)?);
                Statement::Control(Control::While { token, cond, body })
            }
            _ => return Err(self.error_at(token, ParseErrorKind::Unexpected)),
        })
    }

    fn assignment(&mut self) -> Result<Assignment> {
        let token = self.next("a register")?;
        let op_token = self.next("an assignment operator")?;
        let op = match op_token.kind {
            TokenKind::Operator(op) if op.is_assignment() => op,
            _ => {
                return Err(
                    self.error_at(op_token, ParseErrorKind::Expected("an assignment operator"))
                )
            }
        };
        let expect_assign = |p: &Self| -> Result<()> {
            match op {
                Operator::Assign => Ok(()),
                _ => Err(p.error_at(op_token, ParseErrorKind::Expected("`:=`"))),
            }
        };
        Ok(match token.kind {
            TokenKind::Register(Register::Delay) => {
                expect_assign(self)?;
                Assignment::DelaySet {
                    token,
                    src: self.reg()?,
                }
            }
            TokenKind::Register(Register::Buzzer) => {
                expect_assign(self)?;
                Assignment::BuzzerSet {
                    token,
                    src: self.reg()?,
                }
            }
            TokenKind::Register(Register::I) => match op {
                Operator::Assign if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Hex)) => {
                    self.pos += 1;
                    Assignment::CharSprite {
                        token,
                        src: self.reg()?,
                    }
                }
                Operator::Assign => Assignment::IndexSet {
                    token,
                    value: self.value()?,
                },
                Operator::AddAssign => Assignment::IndexAdd {
                    token,
                    src: self.reg()?,
                },
                _ => {
                    return Err(self.error_at(op_token, ParseErrorKind::Expected("`:=` or `+=`")))
                }
            },
            TokenKind::Register(Register::V(n)) => {
                self.register_assignment(token, Reg::Literal(token, n), op, op_token)?
            }
            _ => self.register_assignment(token, Reg::Pending(token), op, op_token)?,
        })
    }

    fn register_assignment(
        &mut self,
        token: Token,
        dst: Reg,
        op: Operator,
        op_token: Token,
    ) -> Result<Assignment> {
        let bad_op =
            |p: &Self| p.error_at(op_token, ParseErrorKind::Expected("an assignment operator"));
        let src = self
            .peek()
            .ok_or_else(|| self.error(ParseErrorKind::Expected("a register or value")))?;
        Ok(match (op, src.kind) {
            (Operator::Assign, TokenKind::Keyword(Keyword::Key)) => {
                self.pos += 1;
                Assignment::KeyInput { token, dst }
            }
            (Operator::Assign, TokenKind::Register(Register::Delay)) => {
                self.pos += 1;
                Assignment::DelayGet { token, dst }
            }
            (Operator::Assign, TokenKind::Keyword(Keyword::Random)) => {
                self.pos += 1;
                Assignment::Random {
                    token,
                    dst,
                    mask: self.value()?,
                }
            }
            (_, TokenKind::Register(Register::V(n))) => {
                self.pos += 1;
                Assignment::Register {
                    token,
                    dst,
                    op: RegOp::from_operator(op).ok_or_else(|| bad_op(self))?,
                    src: Reg::Literal(src, n),
                }
            }
            (_, TokenKind::Number(_) | TokenKind::Constant(_)) => Assignment::Immediate {
                token,
                dst,
                op: ImmOp::from_operator(op).ok_or_else(|| {
                    self.error_at(op_token, ParseErrorKind::Expected("a register operand"))
                })?,
                value: self.value()?,
            },
            (_, TokenKind::Name) => {
                self.pos += 1;
                match (ImmOp::from_operator(op), RegOp::from_operator(op)) {
                    (Some(op), _) => Assignment::Ambiguous {
                        token,
                        dst,
                        op,
                        src,
                    },
                    (None, Some(op)) => Assignment::Register {
                        token,
                        dst,
                        op,
                        src: Reg::Pending(src),
                    },
                    (None, None) => return Err(bad_op(self)),
                }
            }
            _ => return Err(self.error(ParseErrorKind::Expected("a register or value"))),
        })
    }

    // control flow

    fn condition(&mut self) -> Result<Condition> {
        let reg = self.reg()?;
        let token = self.next("a comparison")?;
        match token.kind {
            TokenKind::Keyword(Keyword::Key) => Ok(Condition::Key { reg, pressed: true }),
            TokenKind::Keyword(Keyword::NotKey) => Ok(Condition::Key {
                reg,
                pressed: false,
            }),
            TokenKind::Operator(op) => match CmpOp::from_operator(op) {
                Some(op) => Ok(Condition::Compare {
                    reg,
                    op,
                    rhs: self.rvalue()?,
                }),
                None => Err(self.error_at(token, ParseErrorKind::Expected("a comparison"))),
            },
            _ => Err(self.error_at(token, ParseErrorKind::Expected("a comparison"))),
        }
    }

    fn if_statement(&mut self, token: Token, allow_dangling: bool) -> Result<Statement> {
        let cond = self.condition()?;
        let keyword = self.next("`then` or `begin`")?;
        let control = match keyword.kind {
            TokenKind::Keyword(Keyword::Then) => {
                self.skip_newlines();
                match self.peek_kind() {
                    Some(TokenKind::Keyword(Keyword::Again)) if allow_dangling => Control::If {
                        token,
                        cond,
                        then: None,
                    },
                    None
                    | Some(
                        TokenKind::Keyword(Keyword::Again | Keyword::End | Keyword::Else)
                        | TokenKind::CloseBrace,
                    ) => return Err(self.error_at(token, ParseErrorKind::DanglingIf)),
                    _ => Control::If {
                        token,
                        cond,
                        then: Some(Box::new(self.statement(false)?)),
                    },
                }
            }
            TokenKind::Keyword(Keyword::Begin) => {
                let ends = [Keyword::Else, Keyword::End];
                let (then, end) = self.block(&ends, "`else` or `end`", false)?;
                let otherwise = match end {
                    Keyword::Else => Some(self.block(&[Keyword::End], "`end`", false)?.0),
                    _ => None,
                };
                Control::IfElse {
                    token,
                    cond,
                    then,
                    otherwise,
                }
            }
            _ => {
                return Err(self.error_at(keyword, ParseErrorKind::Expected("`then` or `begin`")))
            }
        };
        Ok(Statement::Control(control))
    }

    /// Statements up to (and including) one of the `ends` keywords.
    fn block(
        &mut self,
        ends: &[Keyword],
        what: &'static str,
        allow_dangling: bool,
    ) -> Result<(Vec<Statement>, Keyword)> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::Keyword(kw)) if ends.contains(&kw) => {
                    self.pos += 1;
                    return Ok((body, kw));
                }
                None | Some(TokenKind::CloseBrace) => {
                    return Err(self.error(ParseErrorKind::Expected(what)))
                }
                _ => body.push(self.statement(allow_dangling)?),
            }
        }
    }

    fn braced_body(&mut self) -> Result<Vec<Statement>> {
        self.eat(TokenKind::OpenBrace, "`{`")?;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::CloseBrace) => {
                    self.pos += 1;
                    return Ok(body);
                }
                None => return Err(self.error(ParseErrorKind::Expected("`}`"))),
                _ => body.push(self.statement(false)?),
            }
        }
    }

    // directives

    fn directive(&mut self) -> Result<Statement> {
        use lex::Directive as D;
        let token = self.next("a directive")?;
        let TokenKind::Directive(kind) = token.kind else {
            return Err(self.error_at(token, ParseErrorKind::Expected("a directive")));
        };
        let directive = match kind {
            D::Label => Directive::Label(self.name()?),
            D::Alias => {
                let name = self.name()?;
                let target = if self.peek_kind() == Some(TokenKind::OpenBrace) {
                    AliasTarget::Calc(self.calc_block()?)
                } else {
                    AliasTarget::Register(self.reg()?)
                };
                Directive::Alias {
                    token,
                    name,
                    target,
                }
            }
            D::Call => Directive::Call(token, self.value()?),
            D::Const => Directive::Const {
                token,
                name: self.name()?,
                value: self.value()?,
            },
            D::Unpack => {
                let first = self.value()?;
                let (tag, value) = if self.at_line_end()
                    || self.peek_kind() == Some(TokenKind::CloseBrace)
                {
                    (None, first)
                } else {
                    (Some(first), self.value()?)
                };
                Directive::Unpack { token, tag, value }
            }
            D::Next => {
                let name = self.name()?;
                self.skip_newlines();
                let statement = Box::new(self.statement(false)?);
                // the labelled statement terminates itself
                return Ok(Statement::Directive(Directive::Next {
                    token,
                    name,
                    statement,
                }));
            }
            D::Org => Directive::Org(token, self.operand()?),
            D::Macro => {
                let name = self.name()?;
                let mut params = Vec::new();
                while self.peek_kind() == Some(TokenKind::Name) {
                    params.extend(self.bump());
                }
                Directive::Macro(Macro {
                    token,
                    name,
                    params,
                    body: self.braced_body()?,
                })
            }
            D::Calc => Directive::Calc {
                token,
                name: self.name()?,
                expr: self.calc_block()?,
            },
            D::Byte => Directive::Byte(token, self.operand()?),
            D::Pointer => Directive::Pointer(token, self.operand()?),
            D::StringMode => Directive::StringMode(StringMode {
                token,
                name: self.name()?,
                alphabet: self.eat(TokenKind::String, "an alphabet string")?,
                body: self.braced_body()?,
            }),
            D::Assert => {
                let message = match self.peek_kind() {
                    Some(TokenKind::String) => self.bump(),
                    _ => None,
                };
                Directive::Assert {
                    token,
                    message,
                    expr: self.calc_block()?,
                }
            }
            D::Breakpoint => Directive::Breakpoint(token, self.name()?),
            D::Monitor => {
                let target = self.rvalue()?;
                let format = match self.peek() {
                    Some(t @ Token { kind: TokenKind::Number(n), .. }) => {
                        MonitorFormat::Length(t, n)
                    }
                    Some(t @ Token { kind: TokenKind::String, .. }) => MonitorFormat::Format(t),
                    _ => {
                        return Err(
                            self.error(ParseErrorKind::Expected("a length or format string"))
                        )
                    }
                };
                self.pos += 1;
                Directive::Monitor {
                    token,
                    target,
                    format,
                }
            }
        };
        self.end_of_line()?;
        Ok(Statement::Directive(directive))
    }

    // calc expressions

    fn calc_block(&mut self) -> Result<Calc> {
        self.eat(TokenKind::OpenBrace, "`{`")?;
        let expr = self.calc_expr()?;
        self.eat(TokenKind::CloseBrace, "`}`")?;
        Ok(expr)
    }

    fn calc_expr(&mut self) -> Result<Calc> {
        if self.depth == MAX_CALC_DEPTH {
            return Err(self.error(ParseErrorKind::TooDeep(MAX_CALC_DEPTH)));
        }
        self.depth += 1;
        let expr = self.calc_operation();
        self.depth -= 1;
        expr
    }

    /// Unary operators take the whole remaining expression and binary chains
    /// nest to the right: `a - b - c` is `a - (b - c)`.
    fn calc_operation(&mut self) -> Result<Calc> {
        let token = self
            .peek()
            .ok_or_else(|| self.error(ParseErrorKind::Expected("an expression")))?;
        if let TokenKind::Operator(op) = token.kind {
            if let Some(unary) = UnaryOp::from_operator(op) {
                self.pos += 1;
                let operand = self.calc_expr()?;
                return Ok(Calc::Unary(token, unary, Box::new(operand)));
            }
        }
        let lhs = self.calc_term()?;
        let binary = match self.peek() {
            Some(t @ Token { kind: TokenKind::Operator(op), .. }) => {
                BinaryOp::from_operator(op).map(|b| (t, b))
            }
            _ => None,
        };
        match binary {
            Some((token, op)) => {
                self.pos += 1;
                let rhs = self.calc_expr()?;
                Ok(Calc::Binary(token, op, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn calc_term(&mut self) -> Result<Calc> {
        let token = self.next("an expression")?;
        match token.kind {
            TokenKind::Number(n) => Ok(Calc::Number(token, n as f64)),
            TokenKind::Name | TokenKind::Constant(_) => Ok(Calc::Name(token)),
            TokenKind::String => Ok(Calc::String(token)),
            TokenKind::OpenParen => {
                let expr = self.calc_expr()?;
                self.eat(TokenKind::CloseParen, "`)`")?;
                Ok(expr)
            }
            _ => Err(self.error_at(token, ParseErrorKind::Expected("a number, name or `(`"))),
        }
    }
}

pub fn parse(tokens: &[Token], si: &Interner) -> Result<Vec<Statement>> {
    Parser::new(tokens, si).parse_all()
}
