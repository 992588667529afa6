use thiserror::Error;

use crate::{Mnemonic, Word};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{mnemonic} takes {exp} operands, got {got}")]
    InvalidArgCount {
        mnemonic: Mnemonic,
        exp: usize,
        got: usize,
    },
    #[error("operand {value:#x} of {mnemonic} does not fit in {bits} bits")]
    Overflow {
        mnemonic: Mnemonic,
        value: Word,
        bits: u32,
    },
}

/// Packs `operands` into the nibble positions of `mnemonic`'s template.
pub fn encode(mnemonic: Mnemonic, operands: &[Word]) -> Result<Word, EncodeError> {
    let template = mnemonic.template();
    if template.fields.len() != operands.len() {
        return Err(EncodeError::InvalidArgCount {
            mnemonic,
            exp: template.fields.len(),
            got: operands.len(),
        });
    }
    let mut word = template.fixed_bits;
    for (field, &value) in template.fields.iter().zip(operands) {
        if value >> field.bits != 0 {
            return Err(EncodeError::Overflow {
                mnemonic,
                value,
                bits: field.bits,
            });
        }
        word |= value << field.shift;
    }
    Ok(word)
}
