//! Name resolution and macro expansion.
//!
//! Labels are collected up front so that code may jump forward; everything
//! else is resolved in a single depth-first walk that threads the enclosing
//! expansion frames through as a [`Scope`] value.

use std::rc::Rc;

use ahash::AHashMap;
use chasm_isa::Mnemonic;
use thiserror::Error;

use crate::ast::{
    AliasTarget, Assignment, BinaryOp, Calc, CmpOp, Condition, Control, Directive, ImmOp, Macro,
    MonitorFormat, Operand, RValue, Reg, RegOp, Statement, StringMode, UnaryOp, MAX_CALC_DEPTH,
};
use crate::ir::{self, Cond, CondRhs, Expr, Imm, Instr, MonitorTarget, Stmt, StmtKind};
use crate::lex::{Constant, Register, Token, TokenKind};
use crate::{Interner, Options, Symbol};

mod scope;
#[cfg(test)]
mod test;

pub use self::scope::{CharValues, Frame, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: `{text}`: {kind}")]
pub struct AnalysisError {
    pub line: u32,
    pub text: String,
    pub kind: AnalysisErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnalysisErrorKind {
    #[error("undeclared name")]
    Undeclared,
    #[error("name already declared as {0}")]
    NameInUse(&'static str),
    #[error("label declared twice")]
    DuplicateLabel,
    #[error("expected a register, found {0}")]
    ExpectedRegister(&'static str),
    #[error("expected a value, found {0}")]
    ExpectedValue(&'static str),
    #[error("expected a name, found {0}")]
    ExpectedName(&'static str),
    #[error("expected a string, found {0}")]
    ExpectedString(&'static str),
    #[error("not a macro or stringmode, it is {0}")]
    NotAMacro(&'static str),
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("no alphabet covers {0:?}")]
    UncoveredChar(char),
    #[error("alphabet shares {0:?} with an earlier declaration")]
    AlphabetOverlap(char),
    #[error("only valid inside a macro or stringmode body")]
    OutsideMacro,
    #[error("only valid inside a stringmode body")]
    OutsideStringMode,
    #[error("only valid inside a calc expression")]
    OutsideCalc,
    #[error("registers cannot appear in calc expressions")]
    RegisterInCalc,
    #[error("labels in calc expressions need `@`")]
    BareLabel,
    #[error("`@` applies only to labels")]
    AddressOfNonLabel,
    #[error("`strlen` applies only to strings")]
    StrlenNonString,
    #[error("a string is only valid under `strlen`")]
    StrayString,
    #[error("not a compile-time constant")]
    NotConstant,
    #[error("calc result is not a finite number")]
    NotFinite,
    #[error("{value} does not fit in {bits} bits")]
    OutOfRange { value: i64, bits: u32 },
    #[error("register constant {0} is not in 0..=15")]
    RegisterOutOfRange(i64),
    #[error("v{0:x} is the compare temporary and cannot be compared with `<`, `>`, `<=` or `>=`")]
    CompareTemp(u8),
    #[error("expansion nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("calc expression nested deeper than {0} levels")]
    CalcTooDeep(usize),
    #[error("conditional break outside a loop")]
    MisplacedBreak,
    #[error("program has no `main` label")]
    MissingMain,
}

type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Clone)]
enum Binding<'a> {
    Label { next: bool },
    Register(u8),
    RegisterConst(u8),
    Const(i64),
    /// the folded expression and how deeply it nests
    Calc(Rc<Expr>, usize),
    Macro(&'a Macro),
    /// one entry per declaration, alphabets pairwise disjoint
    StringMode(Vec<&'a StringMode>),
}

impl Binding<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Binding::Label { .. } => "a label",
            Binding::Register(_) => "a register alias",
            Binding::RegisterConst(_) => "a register constant",
            Binding::Const(_) => "a constant",
            Binding::Calc(..) => "a calc name",
            Binding::Macro(_) => "a macro",
            Binding::StringMode(_) => "a stringmode",
        }
    }
}

fn category(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Newline => "end of line",
        TokenKind::Keyword(_) => "a keyword",
        TokenKind::Number(_) => "a number",
        TokenKind::Name => "a name",
        TokenKind::Directive(_) => "a directive",
        TokenKind::Operator(_) => "an operator",
        TokenKind::Register(Register::V(_)) => "a register",
        TokenKind::Register(_) => "a special register",
        TokenKind::Constant(_) => "a reserved constant",
        TokenKind::String => "a string",
        TokenKind::OpenBrace
        | TokenKind::CloseBrace
        | TokenKind::OpenParen
        | TokenKind::CloseParen => "punctuation",
    }
}

pub struct Analyzer<'a> {
    si: &'a Interner,
    options: &'a Options,
    symbols: AHashMap<Symbol, Binding<'a>>,
    /// invocation counts, keyed by macro or stringmode name
    calls: AHashMap<Symbol, i64>,
    depth: usize,
}

impl<'a> Analyzer<'a> {
    pub fn new(si: &'a Interner, options: &'a Options) -> Self {
        Self {
            si,
            options,
            symbols: AHashMap::new(),
            calls: AHashMap::new(),
            depth: 0,
        }
    }

    /// Declares a constant that exists before the first line.
    pub fn define(&mut self, name: Symbol, value: i64) -> Result<()> {
        let token = Token {
            line: 0,
            kind: TokenKind::Name,
            text: name,
        };
        self.declare(token, Binding::Const(value))
    }

    pub fn analyze(mut self, statements: &'a [Statement]) -> Result<Vec<Stmt>> {
        for stmt in statements {
            self.collect_labels(stmt)?;
        }
        let mut out = Vec::new();
        for stmt in statements {
            self.statement(stmt, None, &mut out)?;
        }
        let main = self.si.get("main");
        if !main.is_some_and(|m| matches!(self.symbols.get(&m), Some(Binding::Label { .. }))) {
            return Err(AnalysisError {
                line: out.last().map_or(1, |s: &Stmt| s.line),
                text: "main".to_owned(),
                kind: AnalysisErrorKind::MissingMain,
            });
        }
        Ok(out)
    }

    fn error(&self, token: Token, kind: AnalysisErrorKind) -> AnalysisError {
        AnalysisError {
            line: token.line,
            text: token.describe(self.si),
            kind,
        }
    }

    // declarations

    fn declare(&mut self, name: Token, binding: Binding<'a>) -> Result<()> {
        if let Some(existing) = self.symbols.get(&name.text) {
            let rebind = match (existing, &binding) {
                (Binding::Label { next: true }, Binding::Label { next: true }) => true,
                (Binding::Label { .. }, Binding::Label { .. }) => {
                    return Err(self.error(name, AnalysisErrorKind::DuplicateLabel))
                }
                (Binding::Register(_), Binding::Register(_))
                | (Binding::RegisterConst(_), Binding::RegisterConst(_))
                | (Binding::Calc(..), Binding::Calc(..)) => true,
                _ => false,
            };
            if !rebind {
                return Err(self.error(name, AnalysisErrorKind::NameInUse(existing.kind())));
            }
        }
        self.symbols.insert(name.text, binding);
        Ok(())
    }

    fn declare_stringmode(&mut self, name: Token, mode: &'a StringMode) -> Result<()> {
        let si = self.si;
        let alphabet = mode.alphabet.text(si);
        let overlap = match self.symbols.get(&name.text) {
            Some(Binding::StringMode(modes)) => modes
                .iter()
                .flat_map(|m| m.alphabet.text(si).chars())
                .find(|&c| alphabet.contains(c)),
            _ => return self.declare(name, Binding::StringMode(vec![mode])),
        };
        if let Some(c) = overlap {
            return Err(self.error(mode.alphabet, AnalysisErrorKind::AlphabetOverlap(c)));
        }
        if let Some(Binding::StringMode(modes)) = self.symbols.get_mut(&name.text) {
            modes.push(mode);
        }
        Ok(())
    }

    /// Registers the labels reachable without expanding anything.
    fn collect_labels(&mut self, stmt: &'a Statement) -> Result<()> {
        match stmt {
            Statement::Directive(Directive::Label(name)) => {
                self.declare(*name, Binding::Label { next: false })
            }
            Statement::Directive(Directive::Next {
                name, statement, ..
            }) => {
                self.declare(*name, Binding::Label { next: true })?;
                self.collect_labels(statement)
            }
            Statement::Control(control) => match control {
                Control::If { then, .. } => match then {
                    Some(then) => self.collect_labels(then),
                    None => Ok(()),
                },
                Control::IfElse {
                    then, otherwise, ..
                } => then
                    .iter()
                    .chain(otherwise.iter().flatten())
                    .try_for_each(|s| self.collect_labels(s)),
                Control::Loop { body, .. } => body.iter().try_for_each(|s| self.collect_labels(s)),
                Control::While { body, .. } => self.collect_labels(body),
            },
            _ => Ok(()),
        }
    }

    // names

    /// Follows macro arguments outward until the token no longer names one.
    /// Reserved constants bound by the enclosing frame become numbers.
    fn substitute<'s>(&self, token: Token, scope: Option<&'s Scope<'s>>) -> Result<Token> {
        let mut token = token;
        let mut scope = scope;
        loop {
            match token.kind {
                TokenKind::Name => {
                    let Some((bound, outer)) = scope.and_then(|s| s.lookup(token.text)) else {
                        return Ok(token);
                    };
                    token = bound;
                    scope = outer;
                }
                TokenKind::Constant(constant) => {
                    let frame = scope.map(|s| s.frame);
                    let value = match constant {
                        Constant::Key(_) => return Ok(token),
                        Constant::Calls => frame
                            .map(|f| f.calls)
                            .ok_or_else(|| self.error(token, AnalysisErrorKind::OutsideMacro))?,
                        Constant::Char | Constant::Index | Constant::Value => {
                            let chars = frame.and_then(|f| f.chars).ok_or_else(|| {
                                self.error(token, AnalysisErrorKind::OutsideStringMode)
                            })?;
                            match constant {
                                Constant::Char => chars.char,
                                Constant::Index => chars.index,
                                _ => chars.value,
                            }
                        }
                    };
                    return Ok(Token {
                        kind: TokenKind::Number(value),
                        ..token
                    });
                }
                _ => return Ok(token),
            }
        }
    }

    /// A name being declared, after substitution.
    fn declared_name<'s>(&self, token: Token, scope: Option<&'s Scope<'s>>) -> Result<Token> {
        let name = self.substitute(token, scope)?;
        match name.kind {
            TokenKind::Name => Ok(name),
            kind => Err(self.error(name, AnalysisErrorKind::ExpectedName(category(kind)))),
        }
    }

    /// The register a substituted token denotes, if any.
    fn register_index(&self, token: Token) -> Option<u8> {
        match token.kind {
            TokenKind::Register(Register::V(n)) => Some(n),
            TokenKind::Name => match self.symbols.get(&token.text) {
                Some(Binding::Register(n) | Binding::RegisterConst(n)) => Some(*n),
                _ => None,
            },
            _ => None,
        }
    }

    fn is_register<'s>(&self, token: Token, scope: Option<&'s Scope<'s>>) -> Result<Option<u8>> {
        Ok(self.register_index(self.substitute(token, scope)?))
    }

    fn register<'s>(&self, reg: Reg, scope: Option<&'s Scope<'s>>) -> Result<u8> {
        let token = match reg {
            Reg::Literal(_, n) => return Ok(n),
            Reg::Pending(token) => self.substitute(token, scope)?,
        };
        if let Some(n) = self.register_index(token) {
            return Ok(n);
        }
        let found = match (token.kind, self.symbols.get(&token.text)) {
            (TokenKind::Name, Some(binding)) => binding.kind(),
            (TokenKind::Name, None) => {
                return Err(self.error(token, AnalysisErrorKind::Undeclared));
            }
            (kind, _) => category(kind),
        };
        Err(self.error(token, AnalysisErrorKind::ExpectedRegister(found)))
    }

    /// The register an alias hook names, or `default` when it is not declared.
    fn hook(&self, name: &str, default: u8) -> u8 {
        self.si
            .get(name)
            .and_then(|sym| match self.symbols.get(&sym) {
                Some(Binding::Register(n) | Binding::RegisterConst(n)) => Some(*n),
                _ => None,
            })
            .unwrap_or(default)
    }

    // values

    fn value<'s>(&self, rv: RValue, scope: Option<&'s Scope<'s>>) -> Result<Imm> {
        let token = match rv {
            RValue::Number(_, n) => return Ok(Imm::Number(n)),
            RValue::Register(reg) => {
                return Err(self.error(reg.token(), AnalysisErrorKind::ExpectedValue("a register")))
            }
            RValue::Name(token) => self.substitute(token, scope)?,
        };
        match token.kind {
            TokenKind::Number(n) => Ok(Imm::Number(n)),
            TokenKind::Constant(Constant::Key(_)) => {
                Err(self.error(token, AnalysisErrorKind::OutsideCalc))
            }
            TokenKind::Name => match self.symbols.get(&token.text) {
                Some(Binding::Label { .. }) => Ok(Imm::Label(token.text)),
                Some(Binding::Const(n)) => Ok(Imm::Number(*n)),
                Some(Binding::Calc(expr, _)) => self.calc_imm(token, expr.clone()),
                Some(other) => {
                    Err(self.error(token, AnalysisErrorKind::ExpectedValue(other.kind())))
                }
                None => Err(self.error(token, AnalysisErrorKind::Undeclared)),
            },
            kind => Err(self.error(token, AnalysisErrorKind::ExpectedValue(category(kind)))),
        }
    }

    /// A value destined for a field `bits` wide. Numbers are checked now;
    /// anything depending on a label is checked by the generator.
    fn imm<'s>(&self, rv: RValue, bits: u32, scope: Option<&'s Scope<'s>>) -> Result<Imm> {
        let imm = self.value(rv, scope)?;
        self.check_range(rv.token(), &imm, bits)?;
        Ok(imm)
    }

    fn check_range(&self, token: Token, imm: &Imm, bits: u32) -> Result<()> {
        match *imm {
            Imm::Number(value) if !ir::fits(value, bits) => {
                Err(self.error(token, AnalysisErrorKind::OutOfRange { value, bits }))
            }
            _ => Ok(()),
        }
    }

    fn operand<'s>(
        &self,
        operand: &Operand,
        bits: u32,
        scope: Option<&'s Scope<'s>>,
    ) -> Result<Imm> {
        match operand {
            Operand::Value(rv) => self.imm(*rv, bits, scope),
            Operand::Calc(calc) => {
                let imm = self.calc_imm(calc.token(), self.calc(calc, scope)?)?;
                self.check_range(calc.token(), &imm, bits)?;
                Ok(imm)
            }
        }
    }

    fn calc_imm(&self, token: Token, expr: Rc<Expr>) -> Result<Imm> {
        if let Expr::Number(x) = *expr {
            return ir::to_int(x)
                .map(Imm::Number)
                .ok_or_else(|| self.error(token, AnalysisErrorKind::NotFinite));
        }
        Ok(Imm::Expr(expr))
    }

    // calc

    fn calc<'s>(&self, calc: &Calc, scope: Option<&'s Scope<'s>>) -> Result<Rc<Expr>> {
        Ok(self.calc_with_depth(calc, scope)?.0)
    }

    /// Like [`Self::calc`], also returning how deeply the result nests. Calc
    /// names carry their depth along, so chains of `:calc` stay bounded too.
    fn calc_with_depth<'s>(
        &self,
        calc: &Calc,
        scope: Option<&'s Scope<'s>>,
    ) -> Result<(Rc<Expr>, usize)> {
        let (expr, depth) = self.fold(calc, scope)?;
        if depth > MAX_CALC_DEPTH {
            return Err(self.error(calc.token(), AnalysisErrorKind::CalcTooDeep(MAX_CALC_DEPTH)));
        }
        Ok((expr, depth))
    }

    /// Resolves names and folds every subtree that does not depend on a label.
    fn fold<'s>(&self, calc: &Calc, scope: Option<&'s Scope<'s>>) -> Result<(Rc<Expr>, usize)> {
        let number = |x: f64| (Rc::new(Expr::Number(x)), 0);
        Ok(match calc {
            Calc::Number(_, n) => number(*n),
            Calc::String(token) => return Err(self.error(*token, AnalysisErrorKind::StrayString)),
            Calc::Name(token) => self.calc_name(*token, scope)?,
            Calc::Unary(token, UnaryOp::AddressOf, operand) => {
                let Calc::Name(name) = **operand else {
                    return Err(self.error(*token, AnalysisErrorKind::AddressOfNonLabel));
                };
                let name = self.substitute(name, scope)?;
                match (name.kind, self.symbols.get(&name.text)) {
                    (TokenKind::Name, Some(Binding::Label { .. })) => {
                        (Rc::new(Expr::Address(name.text)), 0)
                    }
                    (TokenKind::Name, None) => {
                        return Err(self.error(name, AnalysisErrorKind::Undeclared))
                    }
                    _ => return Err(self.error(name, AnalysisErrorKind::AddressOfNonLabel)),
                }
            }
            Calc::Unary(token, UnaryOp::Strlen, operand) => {
                let string = match **operand {
                    Calc::String(s) => s,
                    Calc::Name(name) => self.substitute(name, scope)?,
                    _ => return Err(self.error(*token, AnalysisErrorKind::StrlenNonString)),
                };
                if string.kind != TokenKind::String {
                    return Err(self.error(string, AnalysisErrorKind::StrlenNonString));
                }
                number(string.text(self.si).chars().count() as f64)
            }
            Calc::Unary(_, op, operand) => {
                let (operand, depth) = self.fold(operand, scope)?;
                if let Expr::Number(x) = *operand {
                    return Ok(number(ir::unary(*op, x)));
                }
                (Rc::new(Expr::Unary(*op, operand)), depth + 1)
            }
            Calc::Binary(_, op, lhs, rhs) => {
                let (lhs, lhs_depth) = self.fold(lhs, scope)?;
                let (rhs, rhs_depth) = self.fold(rhs, scope)?;
                if let (Expr::Number(a), Expr::Number(b)) = (&*lhs, &*rhs) {
                    return Ok(number(ir::binary(*op, *a, *b)));
                }
                (Rc::new(Expr::Binary(*op, lhs, rhs)), lhs_depth.max(rhs_depth) + 1)
            }
        })
    }

    fn calc_name<'s>(
        &self,
        token: Token,
        scope: Option<&'s Scope<'s>>,
    ) -> Result<(Rc<Expr>, usize)> {
        let token = self.substitute(token, scope)?;
        let number = match token.kind {
            TokenKind::Number(n) => n,
            TokenKind::Constant(Constant::Key(key)) => key as i64,
            TokenKind::Register(_) => {
                return Err(self.error(token, AnalysisErrorKind::RegisterInCalc))
            }
            TokenKind::String => return Err(self.error(token, AnalysisErrorKind::StrayString)),
            TokenKind::Name => match self.symbols.get(&token.text) {
                Some(Binding::Const(n)) => *n,
                Some(Binding::Calc(expr, depth)) => return Ok((expr.clone(), *depth)),
                Some(Binding::Label { .. }) => {
                    return Err(self.error(token, AnalysisErrorKind::BareLabel))
                }
                Some(Binding::Register(_) | Binding::RegisterConst(_)) => {
                    return Err(self.error(token, AnalysisErrorKind::RegisterInCalc))
                }
                Some(other) => {
                    return Err(self.error(token, AnalysisErrorKind::ExpectedValue(other.kind())))
                }
                None => return Err(self.error(token, AnalysisErrorKind::Undeclared)),
            },
            kind => {
                return Err(self.error(token, AnalysisErrorKind::ExpectedValue(category(kind))))
            }
        };
        Ok((Rc::new(Expr::Number(number as f64)), 0))
    }

    // statements

    fn statement<'s>(
        &mut self,
        stmt: &'a Statement,
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let (token, instr) = match stmt {
            Statement::Return(t) => (*t, Instr::Bare(Mnemonic::Ret)),
            Statement::Clear(t) => (*t, Instr::Bare(Mnemonic::Clr)),
            Statement::Bcd(t, reg) => (*t, Instr::Reg(Mnemonic::Bcd, self.register(*reg, scope)?)),
            Statement::Save(t, reg) => {
                (*t, Instr::Reg(Mnemonic::Save, self.register(*reg, scope)?))
            }
            Statement::Load(t, reg) => (*t, Instr::Reg(Mnemonic::Ld, self.register(*reg, scope)?)),
            Statement::Sprite {
                token,
                x,
                y,
                height,
            } => (
                *token,
                Instr::Draw(
                    self.register(*x, scope)?,
                    self.register(*y, scope)?,
                    self.imm(*height, 4, scope)?,
                ),
            ),
            Statement::Jump(t, target) => {
                (*t, Instr::Addr(Mnemonic::JmpI, self.imm(*target, 12, scope)?))
            }
            Statement::Jump0(t, target) => {
                (*t, Instr::Addr(Mnemonic::JmpA, self.imm(*target, 12, scope)?))
            }
            Statement::Data(t, n) => {
                let imm = Imm::Number(*n);
                self.check_range(*t, &imm, 8)?;
                push(out, *t, StmtKind::Byte(imm));
                return Ok(());
            }
            Statement::MacroCall { name, args } => return self.invoke(*name, args, scope, out),
            Statement::Call(name) => return self.call(*name, scope, out),
            Statement::Assignment(assignment) => self.assignment(assignment, scope)?,
            Statement::Directive(directive) => return self.directive(directive, scope, out),
            Statement::Control(control) => return self.control(control, scope, out),
        };
        push(out, token, StmtKind::Instr(instr));
        Ok(())
    }

    fn block<'s>(
        &mut self,
        body: &'a [Statement],
        scope: Option<&'s Scope<'s>>,
    ) -> Result<Vec<Stmt>> {
        let mut out = Vec::new();
        for stmt in body {
            self.statement(stmt, scope, &mut out)?;
        }
        Ok(out)
    }

    /// A lone name: a subroutine call, a macro without arguments, or a data
    /// byte when a macro argument substitutes it to a number.
    fn call<'s>(
        &mut self,
        name: Token,
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let target = self.substitute(name, scope)?;
        let kind = match target.kind {
            TokenKind::Number(n) => {
                let imm = Imm::Number(n);
                self.check_range(target, &imm, 8)?;
                StmtKind::Byte(imm)
            }
            TokenKind::Name => match self.symbols.get(&target.text) {
                Some(Binding::Macro(_) | Binding::StringMode(_)) => {
                    return self.invoke(name, &[], scope, out)
                }
                Some(Binding::Label { .. }) => {
                    StmtKind::Instr(Instr::Addr(Mnemonic::Call, Imm::Label(target.text)))
                }
                Some(_) => StmtKind::Instr(Instr::Addr(
                    Mnemonic::Call,
                    self.imm(RValue::Name(name), 12, scope)?,
                )),
                None => return Err(self.error(target, AnalysisErrorKind::Undeclared)),
            },
            kind => {
                return Err(self.error(target, AnalysisErrorKind::ExpectedValue(category(kind))))
            }
        };
        push(out, name, kind);
        Ok(())
    }

    fn invoke<'s>(
        &mut self,
        name: Token,
        args: &[Token],
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let name = self.substitute(name, scope)?;
        if name.kind != TokenKind::Name {
            return Err(self.error(name, AnalysisErrorKind::NotAMacro(category(name.kind))));
        }
        match self.symbols.get(&name.text) {
            Some(Binding::Macro(m)) => {
                let m = *m;
                self.expand_macro(name, m, args, scope, out)
            }
            Some(Binding::StringMode(modes)) => {
                let modes = modes.clone();
                self.expand_stringmode(name, &modes, args, scope, out)
            }
            Some(other) => Err(self.error(name, AnalysisErrorKind::NotAMacro(other.kind()))),
            None => Err(self.error(name, AnalysisErrorKind::Undeclared)),
        }
    }

    fn next_call(&mut self, name: Symbol) -> i64 {
        let calls = self.calls.entry(name).or_insert(0);
        *calls += 1;
        *calls
    }

    fn expand_macro<'s>(
        &mut self,
        name: Token,
        m: &'a Macro,
        args: &[Token],
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        if args.len() != m.params.len() {
            return Err(self.error(
                name,
                AnalysisErrorKind::ArityMismatch {
                    expected: m.params.len(),
                    got: args.len(),
                },
            ));
        }
        let frame = Frame {
            bindings: m.params.iter().map(|p| p.text).zip(args.iter().copied()).collect(),
            calls: self.next_call(name.text),
            chars: None,
        };
        tracing::trace!(
            name = name.text(self.si),
            calls = frame.calls,
            depth = self.depth,
            "expanding macro"
        );
        self.expand(name, &frame, scope, &m.body, out)
    }

    fn expand_stringmode<'s>(
        &mut self,
        name: Token,
        modes: &[&'a StringMode],
        args: &[Token],
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let &[arg] = args else {
            return Err(self.error(
                name,
                AnalysisErrorKind::ArityMismatch {
                    expected: 1,
                    got: args.len(),
                },
            ));
        };
        let text = self.substitute(arg, scope)?;
        if text.kind != TokenKind::String {
            return Err(self.error(text, AnalysisErrorKind::ExpectedString(category(text.kind))));
        }
        let si = self.si;
        let calls = self.next_call(name.text);
        tracing::trace!(
            name = name.text(si),
            text = text.text(si),
            calls,
            depth = self.depth,
            "expanding stringmode"
        );
        for (index, c) in text.text(si).chars().enumerate() {
            let (mode, value) = modes
                .iter()
                .find_map(|m| m.alphabet.text(si).chars().position(|a| a == c).map(|v| (*m, v)))
                .ok_or_else(|| self.error(text, AnalysisErrorKind::UncoveredChar(c)))?;
            let frame = Frame {
                bindings: Vec::new(),
                calls,
                chars: Some(CharValues {
                    char: c as i64,
                    index: index as i64,
                    value: value as i64,
                }),
            };
            self.expand(name, &frame, scope, &mode.body, out)?;
        }
        Ok(())
    }

    fn expand<'s>(
        &mut self,
        name: Token,
        frame: &Frame,
        parent: Option<&'s Scope<'s>>,
        body: &'a [Statement],
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        if self.depth >= self.options.max_expansion_depth {
            let limit = self.options.max_expansion_depth;
            return Err(self.error(name, AnalysisErrorKind::TooDeep(limit)));
        }
        self.depth += 1;
        let scope = Scope { frame, parent };
        let result = body
            .iter()
            .try_for_each(|stmt| self.statement(stmt, Some(&scope), out));
        self.depth -= 1;
        result
    }

    fn assignment<'s>(
        &self,
        assignment: &Assignment,
        scope: Option<&'s Scope<'s>>,
    ) -> Result<(Token, Instr)> {
        Ok(match *assignment {
            Assignment::DelaySet { token, src } => {
                (token, Instr::Reg(Mnemonic::Dly, self.register(src, scope)?))
            }
            Assignment::BuzzerSet { token, src } => {
                (token, Instr::Reg(Mnemonic::Snd, self.register(src, scope)?))
            }
            Assignment::DelayGet { token, dst } => {
                (token, Instr::Reg(Mnemonic::DCpy, self.register(dst, scope)?))
            }
            Assignment::KeyInput { token, dst } => {
                (token, Instr::Reg(Mnemonic::Inp, self.register(dst, scope)?))
            }
            Assignment::Random { token, dst, mask } => (
                token,
                Instr::RegImm(
                    Mnemonic::Rand,
                    self.register(dst, scope)?,
                    self.imm(mask, 8, scope)?,
                ),
            ),
            Assignment::IndexSet { token, value } => {
                (token, Instr::Addr(Mnemonic::Sto, self.imm(value, 12, scope)?))
            }
            Assignment::IndexAdd { token, src } => {
                (token, Instr::Reg(Mnemonic::AddM, self.register(src, scope)?))
            }
            Assignment::CharSprite { token, src } => {
                (token, Instr::Reg(Mnemonic::Spr, self.register(src, scope)?))
            }
            Assignment::Register { token, dst, op, src } => (
                token,
                Instr::RegReg(
                    reg_mnemonic(op),
                    self.register(dst, scope)?,
                    self.register(src, scope)?,
                ),
            ),
            Assignment::Immediate {
                token,
                dst,
                op,
                value,
            } => (
                token,
                immediate(self.register(dst, scope)?, op, self.imm(value, 8, scope)?),
            ),
            Assignment::Ambiguous {
                token,
                dst,
                op,
                src,
            } => {
                let dst = self.register(dst, scope)?;
                let instr = match self.is_register(src, scope)? {
                    Some(src) => Instr::RegReg(reg_mnemonic(op.as_reg_op()), dst, src),
                    None => immediate(dst, op, self.imm(RValue::Name(src), 8, scope)?),
                };
                (token, instr)
            }
        })
    }

    fn directive<'s>(
        &mut self,
        directive: &'a Directive,
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let (token, kind) = match directive {
            Directive::Label(name) => {
                let name = self.declared_name(*name, scope)?;
                // top-level labels were registered up front
                if scope.is_some() {
                    self.declare(name, Binding::Label { next: false })?;
                }
                (name, StmtKind::Label(name.text))
            }
            Directive::Next {
                name, statement, ..
            } => {
                let name = self.declared_name(*name, scope)?;
                if scope.is_some() {
                    self.declare(name, Binding::Label { next: true })?;
                }
                push(out, name, StmtKind::NextLabel(name.text));
                return self.statement(statement, scope, out);
            }
            Directive::Alias {
                name, target, ..
            } => {
                let name = self.declared_name(*name, scope)?;
                let binding = match target {
                    AliasTarget::Register(reg) => Binding::Register(self.register(*reg, scope)?),
                    AliasTarget::Calc(calc) => {
                        let token = calc.token();
                        let n = match self.calc_imm(token, self.calc(calc, scope)?)? {
                            Imm::Number(n) => n,
                            _ => return Err(self.error(token, AnalysisErrorKind::NotConstant)),
                        };
                        match u8::try_from(n) {
                            Ok(n) if n < 16 => Binding::RegisterConst(n),
                            _ => {
                                return Err(
                                    self.error(token, AnalysisErrorKind::RegisterOutOfRange(n))
                                )
                            }
                        }
                    }
                };
                return self.declare(name, binding);
            }
            Directive::Call(token, target) => (
                *token,
                StmtKind::Instr(Instr::Addr(Mnemonic::Call, self.imm(*target, 12, scope)?)),
            ),
            Directive::Const { name, value, .. } => {
                let name = self.declared_name(*name, scope)?;
                let Imm::Number(n) = self.value(*value, scope)? else {
                    return Err(self.error(value.token(), AnalysisErrorKind::NotConstant));
                };
                return self.declare(name, Binding::Const(n));
            }
            Directive::Unpack { token, tag, value } => {
                let tag = match tag {
                    Some(tag) => Some(self.imm(*tag, 4, scope)?),
                    None => None,
                };
                let kind = StmtKind::Unpack {
                    hi: self.hook("unpack-hi", 0),
                    lo: self.hook("unpack-lo", 1),
                    tag,
                    value: self.imm(*value, 16, scope)?,
                };
                (*token, kind)
            }
            Directive::Org(token, target) => {
                (*token, StmtKind::Org(self.operand(target, 16, scope)?))
            }
            Directive::Macro(m) => {
                let name = self.declared_name(m.name, scope)?;
                return self.declare(name, Binding::Macro(m));
            }
            Directive::Calc { name, expr, .. } => {
                let name = self.declared_name(*name, scope)?;
                let (expr, depth) = self.calc_with_depth(expr, scope)?;
                return self.declare(name, Binding::Calc(expr, depth));
            }
            Directive::Byte(token, value) => {
                (*token, StmtKind::Byte(self.operand(value, 8, scope)?))
            }
            Directive::Pointer(token, value) => {
                (*token, StmtKind::Pointer(self.operand(value, 16, scope)?))
            }
            Directive::StringMode(mode) => {
                let name = self.declared_name(mode.name, scope)?;
                return self.declare_stringmode(name, mode);
            }
            Directive::Assert {
                token,
                message,
                expr,
            } => {
                let expr = self.calc_imm(expr.token(), self.calc(expr, scope)?)?;
                let kind = StmtKind::Assert {
                    message: message.map(|m| m.text),
                    expr,
                };
                (*token, kind)
            }
            Directive::Breakpoint(token, name) => {
                (*token, StmtKind::Breakpoint(self.declared_name(*name, scope)?.text))
            }
            Directive::Monitor {
                token,
                target,
                format,
            } => {
                let target = match *target {
                    RValue::Register(reg) => MonitorTarget::Register(self.register(reg, scope)?),
                    RValue::Name(name) => match self.is_register(name, scope)? {
                        Some(reg) => MonitorTarget::Register(reg),
                        None => MonitorTarget::Address(self.imm(*target, 12, scope)?),
                    },
                    RValue::Number(..) => MonitorTarget::Address(self.imm(*target, 12, scope)?),
                };
                let format = match *format {
                    MonitorFormat::Length(_, n) => ir::MonitorFormat::Length(n),
                    MonitorFormat::Format(f) => ir::MonitorFormat::Format(f.text),
                };
                (*token, StmtKind::Monitor { target, format })
            }
        };
        push(out, token, kind);
        Ok(())
    }

    fn condition<'s>(&self, cond: &Condition, scope: Option<&'s Scope<'s>>) -> Result<Cond> {
        let (reg, op, rhs) = match *cond {
            Condition::Key { reg, pressed } => {
                return Ok(Cond::Key {
                    reg: self.register(reg, scope)?,
                    pressed,
                })
            }
            Condition::Compare { reg, op, rhs } => (reg, op, rhs),
        };
        let token = reg.token();
        let reg = self.register(reg, scope)?;
        let rhs = match rhs {
            RValue::Register(r) => CondRhs::Reg(self.register(r, scope)?),
            RValue::Name(name) => match self.is_register(name, scope)? {
                Some(r) => CondRhs::Reg(r),
                None => CondRhs::Imm(self.imm(rhs, 8, scope)?),
            },
            RValue::Number(..) => CondRhs::Imm(self.imm(rhs, 8, scope)?),
        };
        let temp = self.hook("compare-temp", 0xF);
        let relational = !matches!(op, CmpOp::Eq | CmpOp::Ne);
        if relational && (reg == temp || rhs == CondRhs::Reg(temp)) {
            return Err(self.error(token, AnalysisErrorKind::CompareTemp(temp)));
        }
        Ok(Cond::Compare { reg, op, rhs, temp })
    }

    fn control<'s>(
        &mut self,
        control: &'a Control,
        scope: Option<&'s Scope<'s>>,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let (token, kind) = match control {
            Control::If {
                token,
                cond,
                then: Some(then),
            } => {
                let cond = self.condition(cond, scope)?;
                let mut body = Vec::new();
                self.statement(then, scope, &mut body)?;
                (*token, StmtKind::If { cond, then: body })
            }
            Control::If { token, then: None, .. } => {
                return Err(self.error(*token, AnalysisErrorKind::MisplacedBreak))
            }
            Control::IfElse {
                token,
                cond,
                then,
                otherwise,
            } => {
                let cond = self.condition(cond, scope)?;
                let then = self.block(then, scope)?;
                let otherwise = match otherwise {
                    Some(otherwise) => Some(self.block(otherwise, scope)?),
                    None => None,
                };
                (
                    *token,
                    StmtKind::IfElse {
                        cond,
                        then,
                        otherwise,
                    },
                )
            }
            Control::Loop { token, body } => {
                let (body, break_cond) = match body.split_last() {
                    Some((
                        Statement::Control(Control::If {
                            cond, then: None, ..
                        }),
                        rest,
                    )) => (rest, Some(cond)),
                    _ => (&body[..], None),
                };
                let body = self.block(body, scope)?;
                let break_cond = match break_cond {
                    Some(cond) => Some(self.condition(cond, scope)?),
                    None => None,
                };
                (*token, StmtKind::Loop { body, break_cond })
            }
            Control::While { token, cond, body } => {
                let cond = self.condition(cond, scope)?;
                let mut resolved = Vec::new();
                self.statement(body, scope, &mut resolved)?;
                (
                    *token,
                    StmtKind::While {
                        cond,
                        body: resolved,
                    },
                )
            }
        };
        push(out, token, kind);
        Ok(())
    }
}

fn push(out: &mut Vec<Stmt>, token: Token, kind: StmtKind) {
    out.push(Stmt {
        line: token.line,
        text: token.text,
        kind,
    });
}

fn reg_mnemonic(op: RegOp) -> Mnemonic {
    match op {
        RegOp::Set => Mnemonic::Set,
        RegOp::Or => Mnemonic::Or,
        RegOp::And => Mnemonic::And,
        RegOp::Xor => Mnemonic::Xor,
        RegOp::Add => Mnemonic::Add,
        RegOp::Sub => Mnemonic::Sub,
        RegOp::Shr => Mnemonic::Rsh,
        RegOp::RevSub => Mnemonic::Rsub,
        RegOp::Shl => Mnemonic::Lsh,
    }
}

/// `-=` becomes an add of the two's complement.
fn immediate(dst: u8, op: ImmOp, value: Imm) -> Instr {
    match op {
        ImmOp::Set => Instr::RegImm(Mnemonic::SetI, dst, value),
        ImmOp::Add => Instr::RegImm(Mnemonic::AddI, dst, value),
        ImmOp::Sub => Instr::RegImm(Mnemonic::AddI, dst, negate(value)),
    }
}

fn negate(value: Imm) -> Imm {
    let expr = match value {
        Imm::Number(n) => return Imm::Number((256 - (n & 0xFF)) & 0xFF),
        Imm::Label(label) => Rc::new(Expr::Address(label)),
        Imm::Expr(expr) => expr,
    };
    let diff = Expr::Binary(BinaryOp::Sub, Rc::new(Expr::Number(256.0)), expr);
    Imm::Expr(Rc::new(Expr::Binary(
        BinaryOp::And,
        Rc::new(diff),
        Rc::new(Expr::Number(255.0)),
    )))
}

pub fn analyze(
    statements: &[Statement],
    si: &mut Interner,
    options: &Options,
) -> Result<Vec<Stmt>> {
    let defines: Vec<_> = options
        .defines
        .iter()
        .map(|(name, value)| (si.get_or_intern(name), *value))
        .collect();
    let mut analyzer = Analyzer::new(si, options);
    for (name, value) in defines {
        analyzer.define(name, value)?;
    }
    let resolved = analyzer.analyze(statements)?;
    tracing::debug!(defines = options.defines.len(), "resolved names");
    Ok(resolved)
}
