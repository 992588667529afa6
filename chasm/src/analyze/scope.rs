use crate::lex::Token;
use crate::Symbol;

/// What a stringmode body sees for the character being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharValues {
    /// code point
    pub char: i64,
    /// position in the invoking string
    pub index: i64,
    /// position in the covering alphabet
    pub value: i64,
}

/// Bindings introduced by one macro or stringmode expansion.
#[derive(Debug)]
pub struct Frame {
    pub bindings: Vec<(Symbol, Token)>,
    pub calls: i64,
    pub chars: Option<CharValues>,
}

impl Frame {
    pub fn get(&self, name: Symbol) -> Option<Token> {
        self.bindings
            .iter()
            .find(|(param, _)| *param == name)
            .map(|&(_, token)| token)
    }
}

/// Expansion frames enclosing a statement, innermost first. Lives on the
/// stack of the expansion that pushed it.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'s> {
    pub frame: &'s Frame,
    pub parent: Option<&'s Scope<'s>>,
}

impl<'s> Scope<'s> {
    /// The innermost binding of `name`, along with the scope its value
    /// belongs to (the caller's, not this one).
    pub fn lookup(&'s self, name: Symbol) -> Option<(Token, Option<&'s Scope<'s>>)> {
        let mut scope = self;
        loop {
            if let Some(token) = scope.frame.get(name) {
                return Some((token, scope.parent));
            }
            scope = scope.parent?;
        }
    }
}
