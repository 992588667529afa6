use thiserror::Error;

use crate::{templates, Field, FieldKind, Mnemonic, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{0:#06x} matches no instruction")]
    Unknown(Word),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub template: &'static str,
    pub operands: Vec<Word>,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        let fields = &self.mnemonic.template().fields;
        for (i, (field, value)) in fields.iter().zip(&self.operands).enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write_operand(f, field, *value)?;
        }
        Ok(())
    }
}

fn write_operand(f: &mut std::fmt::Formatter<'_>, field: &Field, value: Word) -> std::fmt::Result {
    match field.kind {
        FieldKind::Register | FieldKind::SecondRegister => write!(f, "v{value:X}"),
        FieldKind::Immediate => {
            let width = (field.bits / 4) as usize;
            write!(f, "0x{value:0width$X}")
        }
    }
}

/// Finds the most specific template whose fixed nibbles agree with `word`.
pub fn decode(word: Word) -> Result<Instruction, DecodeError> {
    let template = templates()
        .iter()
        .filter(|t| t.matches(word))
        .max_by_key(|t| t.fixed_nibbles())
        .ok_or(DecodeError::Unknown(word))?;
    Ok(Instruction {
        mnemonic: template.mnemonic,
        template: template.pattern,
        operands: template.fields.iter().map(|f| f.extract(word)).collect(),
    })
}
