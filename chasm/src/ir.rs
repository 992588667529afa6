//! Resolved statements: every register is an index, every name is gone except
//! label references, and macros have been expanded in place.

use std::fmt;
use std::rc::Rc;

use chasm_isa::Mnemonic;

use crate::ast::{BinaryOp, CmpOp, UnaryOp};
use crate::Symbol;

#[derive(Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    /// the statement's first token, for error messages
    pub text: Symbol,
    pub kind: StmtKind,
}

impl fmt::Debug for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stmt")
            .field("line", &self.line)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Instr(Instr),
    Label(Symbol),
    /// labels the immediate byte of the instruction that follows
    NextLabel(Symbol),
    Org(Imm),
    Unpack {
        hi: u8,
        lo: u8,
        tag: Option<Imm>,
        value: Imm,
    },
    Byte(Imm),
    Pointer(Imm),
    Assert {
        message: Option<Symbol>,
        expr: Imm,
    },
    Breakpoint(Symbol),
    Monitor {
        target: MonitorTarget,
        format: MonitorFormat,
    },
    If {
        cond: Cond,
        then: Vec<Stmt>,
    },
    IfElse {
        cond: Cond,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    Loop {
        body: Vec<Stmt>,
        /// leave the loop once this holds, checked after the body
        break_cond: Option<Cond>,
    },
    While {
        cond: Cond,
        body: Vec<Stmt>,
    },
}

/// One machine instruction, grouped by operand shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `CLR`, `RET`
    Bare(Mnemonic),
    /// a 12-bit address operand
    Addr(Mnemonic, Imm),
    /// a register and an 8-bit immediate
    RegImm(Mnemonic, u8, Imm),
    RegReg(Mnemonic, u8, u8),
    Reg(Mnemonic, u8),
    Draw(u8, u8, Imm),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Imm {
    Number(i64),
    Label(Symbol),
    /// depends on label addresses, so it waits for the generator
    Expr(Rc<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Key { reg: u8, pressed: bool },
    Compare {
        reg: u8,
        op: CmpOp,
        rhs: CondRhs,
        /// scratch register for `<`, `>`, `<=` and `>=`
        temp: u8,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondRhs {
    Reg(u8),
    Imm(Imm),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorTarget {
    Register(u8),
    Address(Imm),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorFormat {
    Length(i64),
    Format(Symbol),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Address(Symbol),
    Unary(UnaryOp, Rc<Expr>),
    Binary(BinaryOp, Rc<Expr>, Rc<Expr>),
}

impl Expr {
    pub fn eval(&self, address: &impl Fn(Symbol) -> f64) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Address(label) => address(*label),
            Expr::Unary(op, e) => unary(*op, e.eval(address)),
            Expr::Binary(op, a, b) => binary(*op, a.eval(address), b.eval(address)),
        }
    }
}

pub fn unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => !(x as i64) as f64,
        UnaryOp::LogicalNot => flag(x == 0.0),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sign => {
            if x == 0.0 {
                0.0
            } else {
                x.signum()
            }
        }
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Floor => x.floor(),
        // resolved away before evaluation
        UnaryOp::AddressOf | UnaryOp::Strlen => x,
    }
}

pub fn binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    let (ia, ib) = (a as i64, b as i64);
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::And => (ia & ib) as f64,
        BinaryOp::Or => (ia | ib) as f64,
        BinaryOp::Xor => (ia ^ ib) as f64,
        BinaryOp::Shl => ia.checked_shl(ib as u32).unwrap_or(0) as f64,
        BinaryOp::Shr => ia.checked_shr(ib as u32).unwrap_or(0) as f64,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Lt => flag(a < b),
        BinaryOp::Gt => flag(a > b),
        BinaryOp::Le => flag(a <= b),
        BinaryOp::Ge => flag(a >= b),
        BinaryOp::Eq => flag(a == b),
        BinaryOp::Ne => flag(a != b),
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Rounds a calc result down to an integer; `None` for NaN and infinities.
pub fn to_int(x: f64) -> Option<i64> {
    let x = x.floor();
    (x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64).then_some(x as i64)
}

/// Whether `value` fits a field `bits` wide. Fields of 12 bits or more hold
/// addresses and are unsigned; narrower ones also take negative numbers.
pub fn fits(value: i64, bits: u32) -> bool {
    let max = (1i64 << bits) - 1;
    if bits >= 12 {
        (0..=max).contains(&value)
    } else {
        (-(1i64 << (bits - 1))..=max).contains(&value)
    }
}
