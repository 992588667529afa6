use std::sync::OnceLock;

pub mod decode;
pub mod encode;


pub use self::decode::{decode, DecodeError, Instruction};
pub use self::encode::{encode, EncodeError};

pub type Word = u16;

/// Every instruction of the target machine, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mnemonic {
    /// clear the display
    Clr,
    /// return from subroutine
    Ret,
    /// jump to an absolute address
    JmpI,
    /// call a subroutine
    Call,
    /// skip if `vX == NN`
    SeqI,
    /// skip if `vX != NN`
    SneI,
    /// skip if `vX == vY`
    Seq,
    SetI,
    AddI,
    Set,
    Or,
    And,
    Xor,
    Add,
    Sub,
    Rsh,
    /// `vX := vY - vX`
    Rsub,
    Lsh,
    /// skip if `vX != vY`
    Sne,
    /// `i := NNN`
    Sto,
    /// jump to `NNN + v0`
    JmpA,
    Rand,
    Draw,
    /// skip if the key in `vX` is held
    SkEq,
    /// skip if the key in `vX` is not held
    SkNe,
    /// `vX := delay`
    DCpy,
    /// block until a key is pressed
    Inp,
    /// `delay := vX`
    Dly,
    /// `buzzer := vX`
    Snd,
    /// `i += vX`
    AddM,
    /// `i := hex vX`
    Spr,
    Bcd,
    Save,
    Ld,
}

/// The wire contract with the execution engine; must stay bit-exact.
pub const TABLE: [(Mnemonic, &str, &str); 34] = {
    use Mnemonic::*;
    [
        (Clr, "CLR", "00E0"),
        (Ret, "RET", "00EE"),
        (JmpI, "JMPI", "1NNN"),
        (Call, "CALL", "2NNN"),
        (SeqI, "SEQI", "3XNN"),
        (SneI, "SNEI", "4XNN"),
        (Seq, "SEQ", "5XY0"),
        (SetI, "SETI", "6XNN"),
        (AddI, "ADDI", "7XNN"),
        (Set, "SET", "8XY0"),
        (Or, "OR", "8XY1"),
        (And, "AND", "8XY2"),
        (Xor, "XOR", "8XY3"),
        (Add, "ADD", "8XY4"),
        (Sub, "SUB", "8XY5"),
        (Rsh, "RSH", "8XY6"),
        (Rsub, "RSUB", "8XY7"),
        (Lsh, "LSH", "8XYE"),
        (Sne, "SNE", "9XY0"),
        (Sto, "STO", "ANNN"),
        (JmpA, "JMPA", "BNNN"),
        (Rand, "RAND", "CXNN"),
        (Draw, "DRAW", "DXYN"),
        (SkEq, "SKEQ", "EX9E"),
        (SkNe, "SKNE", "EXA1"),
        (DCpy, "DCPY", "FX07"),
        (Inp, "INP", "FX0A"),
        (Dly, "DLY", "FX15"),
        (Snd, "SND", "FX18"),
        (AddM, "ADDM", "FX1E"),
        (Spr, "SPR", "FX29"),
        (Bcd, "BCD", "FX33"),
        (Save, "SAVE", "FX55"),
        (Ld, "LD", "FX65"),
    ]
};

impl Mnemonic {
    pub fn name(self) -> &'static str {
        TABLE[self as usize].1
    }
    pub fn template(self) -> &'static Template {
        &templates()[self as usize]
    }
}

impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Mnemonic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TABLE
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(m, _, _)| *m)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `X`
    Register,
    /// `Y`
    SecondRegister,
    /// `N`, `NN` or `NNN`
    Immediate,
}

/// A placeholder run inside a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub shift: u32,
    pub bits: u32,
}

impl Field {
    pub fn mask(self) -> Word {
        (((1u32 << self.bits) - 1) as Word) << self.shift
    }
    pub fn extract(self, word: Word) -> Word {
        (word & self.mask()) >> self.shift
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub mnemonic: Mnemonic,
    pub pattern: &'static str,
    /// nibbles that are literal digits
    pub fixed_mask: Word,
    pub fixed_bits: Word,
    /// operand fields in the order they appear in the pattern
    pub fields: Vec<Field>,
}

impl Template {
    fn new(mnemonic: Mnemonic, pattern: &'static str) -> Self {
        let mut fixed_mask = 0;
        let mut fixed_bits = 0;
        let mut fields: Vec<Field> = Vec::new();
        for (i, ch) in pattern.chars().enumerate() {
            let shift = 12 - 4 * i as u32;
            let kind = match ch {
                'X' => FieldKind::Register,
                'Y' => FieldKind::SecondRegister,
                'N' => FieldKind::Immediate,
                _ => {
                    let digit = ch.to_digit(16).unwrap_or(0) as Word;
                    fixed_mask |= 0xF << shift;
                    fixed_bits |= digit << shift;
                    continue;
                }
            };
            // NOTE: runs of `N` merge into one wider immediate
            match fields.last_mut() {
                Some(last) if kind == FieldKind::Immediate && last.kind == kind => {
                    last.bits += 4;
                    last.shift = shift;
                }
                _ => fields.push(Field {
                    kind,
                    shift,
                    bits: 4,
                }),
            }
        }
        Self {
            mnemonic,
            pattern,
            fixed_mask,
            fixed_bits,
            fields,
        }
    }

    pub fn matches(&self, word: Word) -> bool {
        word & self.fixed_mask == self.fixed_bits
    }

    pub fn fixed_nibbles(&self) -> u32 {
        self.fixed_mask.count_ones() / 4
    }
}

/// The codec table, built on first use and shared for the life of the process.
pub fn templates() -> &'static [Template] {
    static TEMPLATES: OnceLock<Vec<Template>> = OnceLock::new();
    TEMPLATES.get_or_init(|| {
        TABLE
            .iter()
            .map(|&(mnemonic, _, pattern)| Template::new(mnemonic, pattern))
            .collect()
    })
}
