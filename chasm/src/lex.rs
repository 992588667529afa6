use std::str::Lines;

use thiserror::Error;

use crate::{Interner, Symbol};

#[cfg(test)]
mod test;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub line: u32,
    pub kind: TokenKind,
    /// source text; for strings, the contents between the quotes
    pub text: Symbol,
}

impl Token {
    pub fn text<'a>(&self, si: &'a Interner) -> &'a str {
        si.resolve(self.text).unwrap_or_default()
    }
    /// The token as it should appear in a diagnostic.
    pub fn describe(&self, si: &Interner) -> String {
        match self.kind {
            TokenKind::Newline => "end of line".to_owned(),
            TokenKind::String => format!("\"{}\"", self.text(si)),
            _ => self.text(si).to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Newline,
    Keyword(Keyword),
    Number(i64),
    Name,
    Directive(Directive),
    Operator(Operator),
    Register(Register),
    Constant(Constant),
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `return` or `;`
    Return,
    Clear,
    Bcd,
    Save,
    Load,
    Sprite,
    Jump,
    Jump0,
    If,
    Then,
    Begin,
    Else,
    End,
    Loop,
    Again,
    While,
    Key,
    /// `-key`
    NotKey,
    Random,
    Hex,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        use Keyword::*;
        Some(match word {
            "return" | ";" => Return,
            "clear" => Clear,
            "bcd" => Bcd,
            "save" => Save,
            "load" => Load,
            "sprite" => Sprite,
            "jump" => Jump,
            "jump0" => Jump0,
            "if" => If,
            "then" => Then,
            "begin" => Begin,
            "else" => Else,
            "end" => End,
            "loop" => Loop,
            "again" => Again,
            "while" => While,
            "key" => Key,
            "-key" => NotKey,
            "random" => Random,
            "hex" => Hex,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `:`
    Label,
    Alias,
    Call,
    Const,
    Unpack,
    Next,
    Org,
    Macro,
    Calc,
    Byte,
    Pointer,
    StringMode,
    Assert,
    Breakpoint,
    Monitor,
}

impl Directive {
    fn from_word(word: &str) -> Option<Self> {
        use Directive::*;
        Some(match word {
            ":" => Label,
            ":alias" => Alias,
            ":call" => Call,
            ":const" => Const,
            ":unpack" => Unpack,
            ":next" => Next,
            ":org" => Org,
            ":macro" => Macro,
            ":calc" => Calc,
            ":byte" => Byte,
            ":pointer" => Pointer,
            ":stringmode" => StringMode,
            ":assert" => Assert,
            ":breakpoint" => Breakpoint,
            ":monitor" => Monitor,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // assignment
    Assign,
    AddAssign,
    SubAssign,
    /// `=-`
    RevSubAssign,
    OrAssign,
    AndAssign,
    XorAssign,
    ShrAssign,
    ShlAssign,
    // comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    // calc
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Tilde,
    Bang,
    At,
    Pow,
    Min,
    Max,
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
    Strlen,
}

impl Operator {
    fn from_symbol(word: &str) -> Option<Self> {
        use Operator::*;
        Some(match word {
            ":=" => Assign,
            "+=" => AddAssign,
            "-=" => SubAssign,
            "=-" => RevSubAssign,
            "|=" => OrAssign,
            "&=" => AndAssign,
            "^=" => XorAssign,
            ">>=" => ShrAssign,
            "<<=" => ShlAssign,
            "==" => Eq,
            "!=" => Ne,
            "<" => Lt,
            ">" => Gt,
            "<=" => Le,
            ">=" => Ge,
            "+" => Plus,
            "-" => Minus,
            "*" => Star,
            "/" => Slash,
            "%" => Percent,
            "&" => Amp,
            "|" => Pipe,
            "^" => Caret,
            "<<" => Shl,
            ">>" => Shr,
            "~" => Tilde,
            "!" => Bang,
            "@" => At,
            _ => return None,
        })
    }
    fn from_word(word: &str) -> Option<Self> {
        use Operator::*;
        Some(match word {
            "pow" => Pow,
            "min" => Min,
            "max" => Max,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "exp" => Exp,
            "log" => Log,
            "abs" => Abs,
            "sqrt" => Sqrt,
            "sign" => Sign,
            "ceil" => Ceil,
            "floor" => Floor,
            "strlen" => Strlen,
            _ => return None,
        })
    }
    /// Whether the operator is one of the `…=` forms that start an assignment.
    pub fn is_assignment(self) -> bool {
        use Operator::*;
        matches!(
            self,
            Assign
                | AddAssign
                | SubAssign
                | RevSubAssign
                | OrAssign
                | AndAssign
                | XorAssign
                | ShrAssign
                | ShlAssign
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    V(u8),
    I,
    Delay,
    Buzzer,
}

impl Register {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "i" => Register::I,
            "delay" => Register::Delay,
            "buzzer" => Register::Buzzer,
            _ => {
                let mut chars = word.chars();
                let (Some('v'), Some(digit @ ('0'..='9' | 'a'..='f')), None) =
                    (chars.next(), chars.next(), chars.next())
                else {
                    return None;
                };
                Register::V(digit.to_digit(16)? as u8)
            }
        })
    }
}

/// Reserved names with a meaning fixed by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    /// 1-based invocation count of the enclosing macro
    Calls,
    /// code point of the current string-mode character
    Char,
    /// position of the current string-mode character
    Index,
    /// position of the current character within its alphabet
    Value,
    /// keypad value of a keyboard key, e.g. `KEY_W`
    Key(u8),
}

impl Constant {
    fn from_word(word: &str) -> Option<Self> {
        use Constant::*;
        Some(match word {
            "CALLS" => Calls,
            "CHAR" => Char,
            "INDEX" => Index,
            "VALUE" => Value,
            _ => Key(match word.strip_prefix("KEY_")? {
                "1" => 0x1,
                "2" => 0x2,
                "3" => 0x3,
                "4" => 0xC,
                "Q" => 0x4,
                "W" => 0x5,
                "E" => 0x6,
                "R" => 0xD,
                "A" => 0x7,
                "S" => 0x8,
                "D" => 0x9,
                "F" => 0xE,
                "Z" => 0xA,
                "X" => 0x0,
                "C" => 0xB,
                "V" => 0xF,
                _ => return None,
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind} `{text}`")]
pub struct LexError {
    pub line: u32,
    pub text: String,
    pub kind: LexErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    #[error("unknown directive")]
    UnknownDirective,
    #[error("unrecognized token")]
    Unrecognized,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("number out of range")]
    NumberOutOfRange,
}

pub struct Lexer<'a> {
    lines: Lines<'a>,
    line: u32,
    si: &'a mut Interner,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, si: &'a mut Interner) -> Self {
        Self {
            lines: src.lines(),
            line: 0,
            si,
            tokens: Vec::new(),
        }
    }

    pub fn lex_all(mut self) -> Result<Vec<Token>, LexError> {
        while self.line()? {}
        Ok(self.tokens)
    }

    /// Lexes one physical line, returning `false` once the source is exhausted.
    pub fn line(&mut self) -> Result<bool, LexError> {
        let Some(src) = self.lines.next() else {
            return Ok(false);
        };
        self.line += 1;
        let src = src.replace('\t', " ");
        let mut rest = src.as_str();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() || rest.starts_with('#') {
                break;
            }
            if let Some(body) = rest.strip_prefix('"') {
                let Some(end) = body.find('"') else {
                    return Err(self.error(rest, LexErrorKind::UnterminatedString));
                };
                self.push(TokenKind::String, &body[..end]);
                rest = &body[end + 1..];
                continue;
            }
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '#')
                .unwrap_or(rest.len());
            let (word, tail) = rest.split_at(end);
            let kind = classify(word).map_err(|kind| self.error(word, kind))?;
            self.push(kind, word);
            rest = tail;
        }
        if let Some(last) = self.tokens.last() {
            if last.kind != TokenKind::Newline {
                self.push(TokenKind::Newline, "\n");
            }
        }
        Ok(true)
    }

    fn push(&mut self, kind: TokenKind, text: &str) {
        let text = self.si.get_or_intern(text);
        self.tokens.push(Token {
            line: self.line,
            kind,
            text,
        });
    }

    fn error(&self, text: &str, kind: LexErrorKind) -> LexError {
        LexError {
            line: self.line,
            text: text.to_owned(),
            kind,
        }
    }
}

fn classify(word: &str) -> Result<TokenKind, LexErrorKind> {
    use TokenKind as K;
    Ok(match word {
        "{" => K::OpenBrace,
        "}" => K::CloseBrace,
        "(" => K::OpenParen,
        ")" => K::CloseParen,
        _ => {
            if let Some(op) = Operator::from_symbol(word) {
                K::Operator(op)
            } else if let Some(kw) = Keyword::from_word(word) {
                K::Keyword(kw)
            } else if word.starts_with(':') {
                K::Directive(Directive::from_word(word).ok_or(LexErrorKind::UnknownDirective)?)
            } else if let Some(c) = Constant::from_word(word) {
                K::Constant(c)
            } else if let Some(op) = Operator::from_word(word) {
                K::Operator(op)
            } else if let Some(n) = number(word)? {
                K::Number(n)
            } else if let Some(reg) = Register::from_word(word) {
                K::Register(reg)
            } else if is_name(word) {
                K::Name
            } else {
                return Err(LexErrorKind::Unrecognized);
            }
        }
    })
}

fn number(word: &str) -> Result<Option<i64>, LexErrorKind> {
    let (digits, radix) = if let Some(hex) = word.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(bin) = word.strip_prefix("0b") {
        (bin, 2)
    } else {
        let unsigned = word.strip_prefix(&['-', '+'][..]).unwrap_or(word);
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        return word
            .parse()
            .map(Some)
            .map_err(|_| LexErrorKind::NumberOutOfRange);
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Ok(None);
    }
    i64::from_str_radix(digits, radix)
        .map(Some)
        .map_err(|_| LexErrorKind::NumberOutOfRange)
}

fn is_name(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some('a'..='z' | 'A'..='Z' | '_'))
        && chars.all(|c| matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-'))
}

pub fn lex(src: &str, si: &mut Interner) -> Result<Vec<Token>, LexError> {
    Lexer::new(src, si).lex_all()
}
