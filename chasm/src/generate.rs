//! Lays out resolved statements and encodes them.
//!
//! Generation runs twice over the same statements. The first pass only lays
//! things out: label addresses are recorded and any value that needs a label
//! further down is a placeholder. The second pass encodes for real with every
//! label known. Both passes produce the same layout because no statement's
//! size depends on a value.

use ahash::AHashMap;
use chasm_isa::{encode, EncodeError, Mnemonic, Word};
use thiserror::Error;

use crate::ast::CmpOp;
use crate::ir::{
    self, Cond, CondRhs, Expr, Imm, Instr, MonitorFormat, MonitorTarget, Stmt, StmtKind,
};
use crate::{Address, Interner, Options, Symbol};

#[cfg(test)]
mod test;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: `{text}`: {kind}")]
pub struct GenerationError {
    pub line: u32,
    /// first token of the failing statement
    pub text: String,
    pub kind: GenerationErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationErrorKind {
    #[error("assertion failed{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    AssertFailed(Option<String>),
    #[error("target {0:#x} is not word aligned")]
    OrgMisaligned(i64),
    #[error("cannot move back from {from:#x} to {to:#x}")]
    OrgBackward { from: i64, to: i64 },
    #[error("target depends on a label that is not laid out yet")]
    OrgForward,
    #[error("{value} does not fit in {bits} bits")]
    Overflow { value: i64, bits: u32 },
    #[error("calc result is not a finite number")]
    NotFinite,
    #[error("the statement after `then` must be one instruction, it takes {0} bytes")]
    ThenNotSingle(usize),
    #[error("program does not fit below {0:#x}")]
    ProgramTooLarge(usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

type Result<T> = std::result::Result<T, GenerationError>;

/// The statement text is filled in by [`Generator::statement`].
fn err(line: u32, kind: GenerationErrorKind) -> GenerationError {
    GenerationError {
        line,
        text: String::new(),
        kind,
    }
}

/// A compiled program and the debugging metadata gathered along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rom {
    pub origin: Address,
    pub bytes: Vec<u8>,
    /// the first address of every label, in layout order
    pub labels: Vec<(String, Address)>,
    pub breakpoints: Vec<(String, Address)>,
    pub monitors: Vec<Monitor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub base: MonitorBase,
    pub show: MonitorShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorBase {
    Register(u8),
    Address(Address),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorShow {
    Length(i64),
    Format(String),
}

impl Rom {
    pub fn label(&self, name: &str) -> Option<Address> {
        self.labels
            .iter()
            .find(|(label, _)| label == name)
            .map(|&(_, address)| address)
    }

    /// A plain-text listing of labels, breakpoints and monitors.
    pub fn symbols(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|(name, address)| format!("{address:#05x} {name}\n"));
        let breakpoints = self
            .breakpoints
            .iter()
            .map(|(name, address)| format!("{address:#05x} breakpoint {name}\n"));
        let monitors = self.monitors.iter().map(|m| {
            let base = match m.base {
                MonitorBase::Register(reg) => format!("v{reg:X}"),
                MonitorBase::Address(address) => format!("{address:#05x}"),
            };
            match &m.show {
                MonitorShow::Length(n) => format!("monitor {base} {n}\n"),
                MonitorShow::Format(format) => format!("monitor {base} \"{format}\"\n"),
            }
        });
        labels.chain(breakpoints).chain(monitors).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Layout,
    Emit,
}

pub struct Generator<'a> {
    si: &'a Interner,
    options: &'a Options,
    pass: Pass,
    bytes: Vec<u8>,
    /// every address a label was declared at; more than one only for `:next`
    labels: AHashMap<Symbol, Vec<Address>>,
    order: Vec<Symbol>,
    breakpoints: Vec<(String, Address)>,
    monitors: Vec<Monitor>,
}

impl<'a> Generator<'a> {
    pub fn new(si: &'a Interner, options: &'a Options) -> Self {
        Self {
            si,
            options,
            pass: Pass::Layout,
            bytes: Vec::new(),
            labels: AHashMap::new(),
            order: Vec::new(),
            breakpoints: Vec::new(),
            monitors: Vec::new(),
        }
    }

    pub fn generate(mut self, stmts: &[Stmt]) -> Result<Rom> {
        self.block(stmts)?;
        tracing::trace!(bytes = self.bytes.len(), labels = self.order.len(), "laid out");
        self.pass = Pass::Emit;
        self.bytes.clear();
        self.block(stmts)?;
        tracing::trace!(bytes = self.bytes.len(), "emitted");
        Ok(self.finish())
    }

    fn finish(self) -> Rom {
        let labels = self
            .order
            .iter()
            .filter_map(|label| {
                let name = self.si.resolve(*label)?;
                let address = *self.labels.get(label)?.first()?;
                Some((name.to_owned(), address))
            })
            .collect();
        Rom {
            origin: self.options.origin,
            bytes: self.bytes,
            labels,
            breakpoints: self.breakpoints,
            monitors: self.monitors,
        }
    }

    fn pc(&self) -> usize {
        self.options.origin as usize + self.bytes.len()
    }

    fn name(&self, symbol: Symbol) -> String {
        self.si.resolve(symbol).unwrap_or_default().to_owned()
    }

    // labels and values

    fn mark(&mut self, label: Symbol, address: usize) {
        if self.pass == Pass::Layout {
            let addresses = self.labels.entry(label).or_default();
            if addresses.is_empty() {
                self.order.push(label);
            }
            addresses.push(address as Address);
        }
    }

    /// The nearest declaration at or before here, else the first one after.
    fn address(&self, label: Symbol) -> Option<Address> {
        let addresses = self.labels.get(&label)?;
        let pc = self.pc();
        addresses
            .iter()
            .rev()
            .find(|&&a| a as usize <= pc)
            .or(addresses.first())
            .copied()
    }

    fn laid_out(&self, imm: &Imm) -> bool {
        fn known(labels: &AHashMap<Symbol, Vec<Address>>, expr: &Expr) -> bool {
            match expr {
                Expr::Number(_) => true,
                Expr::Address(label) => labels.contains_key(label),
                Expr::Unary(_, e) => known(labels, e),
                Expr::Binary(_, a, b) => known(labels, a) && known(labels, b),
            }
        }
        match imm {
            Imm::Number(_) => true,
            Imm::Label(label) => self.labels.contains_key(label),
            Imm::Expr(expr) => known(&self.labels, expr),
        }
    }

    /// Labels not laid out yet read as zero during layout.
    fn eval(&self, imm: &Imm, line: u32) -> Result<i64> {
        match imm {
            Imm::Number(n) => Ok(*n),
            Imm::Label(label) => Ok(self.address(*label).map_or(0, i64::from)),
            Imm::Expr(expr) => {
                let x = expr.eval(&|label| self.address(label).map_or(0.0, f64::from));
                match (ir::to_int(x), self.pass) {
                    (Some(n), _) => Ok(n),
                    (None, Pass::Layout) => Ok(0),
                    (None, Pass::Emit) => Err(err(line, GenerationErrorKind::NotFinite)),
                }
            }
        }
    }

    /// Masks `value` into a field `bits` wide, checking its range once the
    /// values are final.
    fn field(&self, value: i64, bits: u32, line: u32) -> Result<Word> {
        if self.pass == Pass::Emit && !ir::fits(value, bits) {
            return Err(err(line, GenerationErrorKind::Overflow { value, bits }));
        }
        Ok((value & ((1 << bits) - 1)) as Word)
    }

    /// Like [`Generator::field`], but negative values never fit.
    fn unsigned(&self, value: i64, bits: u32, line: u32) -> Result<i64> {
        if self.pass == Pass::Emit && !(0..1 << bits).contains(&value) {
            return Err(err(line, GenerationErrorKind::Overflow { value, bits }));
        }
        Ok(value & ((1 << bits) - 1))
    }

    fn imm(&self, imm: &Imm, bits: u32, line: u32) -> Result<Word> {
        self.field(self.eval(imm, line)?, bits, line)
    }

    // emission

    fn byte(&mut self, byte: u8, line: u32) -> Result<()> {
        if self.pc() >= self.options.memory_end {
            return Err(err(
                line,
                GenerationErrorKind::ProgramTooLarge(self.options.memory_end),
            ));
        }
        self.bytes.push(byte);
        Ok(())
    }

    fn word(&mut self, word: Word, line: u32) -> Result<()> {
        for byte in word.to_be_bytes() {
            self.byte(byte, line)?;
        }
        Ok(())
    }

    fn op(&mut self, mnemonic: Mnemonic, operands: &[Word], line: u32) -> Result<()> {
        let word = encode(mnemonic, operands).map_err(|e| err(line, e.into()))?;
        self.word(word, line)
    }

    fn jump(&mut self, target: usize, line: u32) -> Result<()> {
        self.op(Mnemonic::JmpI, &[target as Word], line)
    }

    /// Emits a jump whose target is filled in by [`Generator::patch`].
    fn hole(&mut self, line: u32) -> Result<usize> {
        let at = self.bytes.len();
        self.word(0, line)?;
        Ok(at)
    }

    /// Points the jump at `at` to the current address.
    fn patch(&mut self, at: usize, line: u32) -> Result<()> {
        let word = encode(Mnemonic::JmpI, &[self.pc() as Word]).map_err(|e| err(line, e.into()))?;
        self.bytes[at..at + 2].copy_from_slice(&word.to_be_bytes());
        Ok(())
    }

    fn instr(&mut self, instr: &Instr, line: u32) -> Result<()> {
        let (mnemonic, operands) = match instr {
            Instr::Bare(m) => (*m, vec![]),
            Instr::Addr(m, target) => (*m, vec![self.imm(target, 12, line)?]),
            Instr::RegImm(m, x, imm) => (*m, vec![*x as Word, self.imm(imm, 8, line)?]),
            Instr::RegReg(m, x, y) => (*m, vec![*x as Word, *y as Word]),
            Instr::Reg(m, x) => (*m, vec![*x as Word]),
            Instr::Draw(x, y, height) => (
                Mnemonic::Draw,
                vec![*x as Word, *y as Word, self.imm(height, 4, line)?],
            ),
        };
        self.op(mnemonic, &operands, line)
    }

    /// Emits code that skips the next instruction when `cond` evaluates to
    /// `skip_when`.
    fn skip(&mut self, cond: &Cond, skip_when: bool, line: u32) -> Result<()> {
        let (reg, op, rhs, temp) = match cond {
            Cond::Key { reg, pressed } => {
                let m = if *pressed == skip_when {
                    Mnemonic::SkEq
                } else {
                    Mnemonic::SkNe
                };
                return self.op(m, &[*reg as Word], line);
            }
            Cond::Compare { reg, op, rhs, temp } => (*reg as Word, *op, rhs, *temp as Word),
        };
        if let CmpOp::Eq | CmpOp::Ne = op {
            let skip_if_equal = (op == CmpOp::Eq) == skip_when;
            return match rhs {
                CondRhs::Reg(r) => {
                    let m = if skip_if_equal { Mnemonic::Seq } else { Mnemonic::Sne };
                    self.op(m, &[reg, *r as Word], line)
                }
                CondRhs::Imm(imm) => {
                    let m = if skip_if_equal { Mnemonic::SeqI } else { Mnemonic::SneI };
                    let value = self.imm(imm, 8, line)?;
                    self.op(m, &[reg, value], line)
                }
            };
        }
        // vF ends up 1 when reg >= rhs (for `<`, `>=`) or reg <= rhs (for `>`, `<=`)
        let ge = matches!(op, CmpOp::Lt | CmpOp::Ge);
        match (rhs, ge) {
            (CondRhs::Reg(r), true) => {
                self.op(Mnemonic::Set, &[temp, reg], line)?;
                self.op(Mnemonic::Sub, &[temp, *r as Word], line)?;
            }
            (CondRhs::Reg(r), false) => {
                self.op(Mnemonic::Set, &[temp, *r as Word], line)?;
                self.op(Mnemonic::Sub, &[temp, reg], line)?;
            }
            (CondRhs::Imm(imm), ge) => {
                let value = self.imm(imm, 8, line)?;
                self.op(Mnemonic::SetI, &[temp, value], line)?;
                let m = if ge { Mnemonic::Rsub } else { Mnemonic::Sub };
                self.op(m, &[temp, reg], line)?;
            }
        }
        let expect = matches!(op, CmpOp::Ge | CmpOp::Le) as Word;
        let m = if skip_when { Mnemonic::SeqI } else { Mnemonic::SneI };
        self.op(m, &[0xF, expect], line)
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<()> {
        stmts.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        self.lower(stmt).map_err(|mut e| {
            if e.text.is_empty() {
                e.text = self.name(stmt.text);
            }
            e
        })
    }

    fn lower(&mut self, stmt: &Stmt) -> Result<()> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Instr(instr) => self.instr(instr, line),
            StmtKind::Label(label) => {
                self.mark(*label, self.pc());
                Ok(())
            }
            StmtKind::NextLabel(label) => {
                self.mark(*label, self.pc() + 1);
                Ok(())
            }
            StmtKind::Org(target) => self.org(target, line),
            StmtKind::Unpack { hi, lo, tag, value } => {
                self.unpack(*hi, *lo, tag.as_ref(), value, line)
            }
            StmtKind::Byte(value) => {
                let byte = self.imm(value, 8, line)?;
                self.byte(byte as u8, line)
            }
            StmtKind::Pointer(value) => {
                let word = self.imm(value, 16, line)?;
                self.word(word, line)
            }
            StmtKind::Assert { message, expr } => {
                if self.pass == Pass::Emit && self.eval(expr, line)? == 0 {
                    let message = message.map(|m| self.name(m));
                    return Err(err(line, GenerationErrorKind::AssertFailed(message)));
                }
                Ok(())
            }
            StmtKind::Breakpoint(name) => {
                if self.pass == Pass::Emit {
                    self.breakpoints.push((self.name(*name), self.pc() as Address));
                }
                Ok(())
            }
            StmtKind::Monitor { target, format } => {
                if self.pass == Pass::Emit {
                    let base = match target {
                        MonitorTarget::Register(reg) => MonitorBase::Register(*reg),
                        MonitorTarget::Address(imm) => {
                            MonitorBase::Address(self.imm(imm, 12, line)?)
                        }
                    };
                    let show = match *format {
                        MonitorFormat::Length(n) => MonitorShow::Length(n),
                        MonitorFormat::Format(f) => MonitorShow::Format(self.name(f)),
                    };
                    self.monitors.push(Monitor { base, show });
                }
                Ok(())
            }
            StmtKind::If { cond, then } => {
                self.skip(cond, false, line)?;
                let start = self.bytes.len();
                self.block(then)?;
                match self.bytes.len() - start {
                    2 => Ok(()),
                    size => Err(err(line, GenerationErrorKind::ThenNotSingle(size))),
                }
            }
            StmtKind::IfElse {
                cond,
                then,
                otherwise,
            } => {
                self.skip(cond, true, line)?;
                let to_else = self.hole(line)?;
                self.block(then)?;
                let Some(otherwise) = otherwise else {
                    return self.patch(to_else, line);
                };
                let to_end = self.hole(line)?;
                self.patch(to_else, line)?;
                self.block(otherwise)?;
                self.patch(to_end, line)
            }
            StmtKind::Loop { body, break_cond } => {
                let start = self.pc();
                self.block(body)?;
                let Some(cond) = break_cond else {
                    return self.jump(start, line);
                };
                self.skip(cond, false, line)?;
                let exit = self.hole(line)?;
                self.jump(start, line)?;
                self.patch(exit, line)
            }
            StmtKind::While { cond, body } => {
                let start = self.pc();
                self.skip(cond, true, line)?;
                let exit = self.hole(line)?;
                self.block(body)?;
                self.jump(start, line)?;
                self.patch(exit, line)
            }
        }
    }

    fn org(&mut self, target: &Imm, line: u32) -> Result<()> {
        if !self.laid_out(target) {
            return Err(err(line, GenerationErrorKind::OrgForward));
        }
        let to = self.eval(target, line)?;
        if to % 2 != 0 {
            return Err(err(line, GenerationErrorKind::OrgMisaligned(to)));
        }
        let from = self.pc() as i64;
        if to < from {
            return Err(err(line, GenerationErrorKind::OrgBackward { from, to }));
        }
        while (self.pc() as i64) < to {
            self.byte(0, line)?;
        }
        Ok(())
    }

    /// Splits `value` over two immediate loads. With a tag, the tag takes the
    /// high nibble and the value must fit in 12 bits.
    fn unpack(&mut self, hi: u8, lo: u8, tag: Option<&Imm>, value: &Imm, line: u32) -> Result<()> {
        let value = self.eval(value, line)?;
        let high = match tag {
            Some(tag) => {
                let tag = self.unsigned(self.eval(tag, line)?, 4, line)?;
                let value = self.unsigned(value, 12, line)?;
                (tag << 4) | (value >> 8)
            }
            None => self.unsigned(value, 16, line)? >> 8,
        };
        self.op(Mnemonic::SetI, &[hi as Word, high as Word], line)?;
        self.op(Mnemonic::SetI, &[lo as Word, (value & 0xFF) as Word], line)
    }
}

pub fn generate(stmts: &[Stmt], si: &Interner, options: &Options) -> Result<Rom> {
    Generator::new(si, options).generate(stmts)
}
