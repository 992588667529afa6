//! Statements exactly as written. Names here are still unresolved: a
//! [`Reg::Pending`] may turn out to be an alias, a macro argument or an error,
//! and only the analyzer knows which.

use crate::lex::{Operator, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `return` or `;`
    Return(Token),
    Clear(Token),
    Bcd(Token, Reg),
    Save(Token, Reg),
    Load(Token, Reg),
    Sprite {
        token: Token,
        x: Reg,
        y: Reg,
        height: RValue,
    },
    Jump(Token, RValue),
    Jump0(Token, RValue),
    /// a bare number, emitted as one byte
    Data(Token, i64),
    /// `name arg arg …`
    MacroCall { name: Token, args: Vec<Token> },
    /// a lone name: either a subroutine call or a macro without arguments
    Call(Token),
    Assignment(Assignment),
    Directive(Directive),
    Control(Control),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reg {
    Literal(Token, u8),
    /// an alias, a macro argument or a register constant
    Pending(Token),
}

impl Reg {
    pub fn token(&self) -> Token {
        match *self {
            Reg::Literal(t, _) | Reg::Pending(t) => t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RValue {
    Number(Token, i64),
    Register(Reg),
    /// a label, constant, calc name, macro argument or reserved constant
    Name(Token),
}

impl RValue {
    pub fn token(&self) -> Token {
        match *self {
            RValue::Number(t, _) | RValue::Name(t) => t,
            RValue::Register(r) => r.token(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOp {
    /// `:=`
    Set,
    /// `|=`
    Or,
    /// `&=`
    And,
    /// `^=`
    Xor,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `>>=`
    Shr,
    /// `=-`
    RevSub,
    /// `<<=`
    Shl,
}

impl RegOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        Some(match op {
            Operator::Assign => RegOp::Set,
            Operator::OrAssign => RegOp::Or,
            Operator::AndAssign => RegOp::And,
            Operator::XorAssign => RegOp::Xor,
            Operator::AddAssign => RegOp::Add,
            Operator::SubAssign => RegOp::Sub,
            Operator::ShrAssign => RegOp::Shr,
            Operator::RevSubAssign => RegOp::RevSub,
            Operator::ShlAssign => RegOp::Shl,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Set,
    Add,
    Sub,
}

impl ImmOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        Some(match op {
            Operator::Assign => ImmOp::Set,
            Operator::AddAssign => ImmOp::Add,
            Operator::SubAssign => ImmOp::Sub,
            _ => return None,
        })
    }
    pub fn as_reg_op(self) -> RegOp {
        match self {
            ImmOp::Set => RegOp::Set,
            ImmOp::Add => RegOp::Add,
            ImmOp::Sub => RegOp::Sub,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `delay := vx`
    DelaySet { token: Token, src: Reg },
    /// `buzzer := vx`
    BuzzerSet { token: Token, src: Reg },
    /// `vx := delay`
    DelayGet { token: Token, dst: Reg },
    /// `vx := key`
    KeyInput { token: Token, dst: Reg },
    /// `vx := random mask`
    Random { token: Token, dst: Reg, mask: RValue },
    /// `i := value`
    IndexSet { token: Token, value: RValue },
    /// `i += vx`
    IndexAdd { token: Token, src: Reg },
    /// `i := hex vx`
    CharSprite { token: Token, src: Reg },
    Register {
        token: Token,
        dst: Reg,
        op: RegOp,
        src: Reg,
    },
    Immediate {
        token: Token,
        dst: Reg,
        op: ImmOp,
        value: RValue,
    },
    /// `vx op name` where `name` may denote a register or a value
    Ambiguous {
        token: Token,
        dst: Reg,
        op: ImmOp,
        src: Token,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `: name`
    Label(Token),
    Alias {
        token: Token,
        name: Token,
        target: AliasTarget,
    },
    /// `:call target`
    Call(Token, RValue),
    Const {
        token: Token,
        name: Token,
        value: RValue,
    },
    /// `:unpack [tag] value`
    Unpack {
        token: Token,
        tag: Option<RValue>,
        value: RValue,
    },
    /// `:next name statement`
    Next {
        token: Token,
        name: Token,
        statement: Box<Statement>,
    },
    Org(Token, Operand),
    Macro(Macro),
    Calc {
        token: Token,
        name: Token,
        expr: Calc,
    },
    Byte(Token, Operand),
    Pointer(Token, Operand),
    StringMode(StringMode),
    Assert {
        token: Token,
        message: Option<Token>,
        expr: Calc,
    },
    Breakpoint(Token, Token),
    Monitor {
        token: Token,
        target: RValue,
        format: MonitorFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AliasTarget {
    Register(Reg),
    Calc(Calc),
}

/// A directive argument: a plain value or a `{ calc }` block.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(RValue),
    Calc(Calc),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorFormat {
    /// number of bytes to show
    Length(Token, i64),
    /// a format string
    Format(Token),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub token: Token,
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringMode {
    pub token: Token,
    pub name: Token,
    pub alphabet: Token,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// `if cond then statement`; `then` is `None` for a loop-ending break
    If {
        token: Token,
        cond: Condition,
        then: Option<Box<Statement>>,
    },
    /// `if cond begin … [else …] end`
    IfElse {
        token: Token,
        cond: Condition,
        then: Vec<Statement>,
        otherwise: Option<Vec<Statement>>,
    },
    /// `loop … again`
    Loop { token: Token, body: Vec<Statement> },
    /// `while cond statement`
    While {
        token: Token,
        cond: Condition,
        body: Box<Statement>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// `vx key`, or `vx -key` when `pressed` is false
    Key { reg: Reg, pressed: bool },
    Compare { reg: Reg, op: CmpOp, rhs: RValue },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        Some(match op {
            Operator::Eq => CmpOp::Eq,
            Operator::Ne => CmpOp::Ne,
            Operator::Lt => CmpOp::Lt,
            Operator::Gt => CmpOp::Gt,
            Operator::Le => CmpOp::Le,
            Operator::Ge => CmpOp::Ge,
            _ => return None,
        })
    }
}

/// How deeply a calc expression may nest, counting every operator and
/// parenthesis.
pub const MAX_CALC_DEPTH: usize = 256;

/// A compile-time expression inside `{ … }`.
#[derive(Debug, Clone, PartialEq)]
pub enum Calc {
    Number(Token, f64),
    /// a name or a reserved constant
    Name(Token),
    /// only meaningful as the operand of `strlen`
    String(Token),
    Unary(Token, UnaryOp, Box<Calc>),
    Binary(Token, BinaryOp, Box<Calc>, Box<Calc>),
}

impl Calc {
    pub fn token(&self) -> Token {
        match self {
            Calc::Number(t, _) | Calc::Name(t) | Calc::String(t) => *t,
            Calc::Unary(t, ..) | Calc::Binary(t, ..) => *t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    LogicalNot,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Abs,
    Sqrt,
    Sign,
    Ceil,
    Floor,
    AddressOf,
    Strlen,
}

impl UnaryOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        use Operator as O;
        Some(match op {
            O::Minus => UnaryOp::Neg,
            O::Tilde => UnaryOp::Not,
            O::Bang => UnaryOp::LogicalNot,
            O::Sin => UnaryOp::Sin,
            O::Cos => UnaryOp::Cos,
            O::Tan => UnaryOp::Tan,
            O::Exp => UnaryOp::Exp,
            O::Log => UnaryOp::Log,
            O::Abs => UnaryOp::Abs,
            O::Sqrt => UnaryOp::Sqrt,
            O::Sign => UnaryOp::Sign,
            O::Ceil => UnaryOp::Ceil,
            O::Floor => UnaryOp::Floor,
            O::At => UnaryOp::AddressOf,
            O::Strlen => UnaryOp::Strlen,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Pow,
    Min,
    Max,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        use Operator as O;
        Some(match op {
            O::Plus => BinaryOp::Add,
            O::Minus => BinaryOp::Sub,
            O::Star => BinaryOp::Mul,
            O::Slash => BinaryOp::Div,
            O::Percent => BinaryOp::Rem,
            O::Amp => BinaryOp::And,
            O::Pipe => BinaryOp::Or,
            O::Caret => BinaryOp::Xor,
            O::Shl => BinaryOp::Shl,
            O::Shr => BinaryOp::Shr,
            O::Pow => BinaryOp::Pow,
            O::Min => BinaryOp::Min,
            O::Max => BinaryOp::Max,
            O::Lt => BinaryOp::Lt,
            O::Gt => BinaryOp::Gt,
            O::Le => BinaryOp::Le,
            O::Ge => BinaryOp::Ge,
            O::Eq => BinaryOp::Eq,
            O::Ne => BinaryOp::Ne,
            _ => return None,
        })
    }
}
