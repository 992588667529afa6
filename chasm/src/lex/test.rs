use expect_test::{expect, Expect};

use super::{lex, LexErrorKind, TokenKind};
use crate::Interner;

fn check(src: &str, expect: Expect) {
    let mut si = Interner::default();
    let output = match lex(src, &mut si) {
        Ok(tokens) => tokens
            .iter()
            .map(|t| format!("{} {:?} {}\n", t.line, t.kind, t.describe(&si)))
            .collect::<String>(),
        Err(e) => format!("error: {e}\n"),
    };
    expect.assert_eq(&output);
}

fn error_kind(src: &str) -> LexErrorKind {
    lex(src, &mut Interner::default()).unwrap_err().kind
}

#[test]
fn empty() {
    check("", expect![""]);
}

#[test]
fn blank_lines_collapse() {
    check("\n\n   \t  \n# only a comment\n\n", expect![""]);
}

#[test]
fn assignment_line() {
    check(
        "v0 := 5\n\n\nv1 += v0 # trailing comment",
        expect![[r#"
            1 Register(V(0)) v0
            1 Operator(Assign) :=
            1 Number(5) 5
            1 Newline end of line
            4 Register(V(1)) v1
            4 Operator(AddAssign) +=
            4 Register(V(0)) v0
            4 Newline end of line
        "#]],
    );
}

#[test]
fn numbers() {
    check(
        "0x1F 0b101 -12 +7 0",
        expect![[r#"
            1 Number(31) 0x1F
            1 Number(5) 0b101
            1 Number(-12) -12
            1 Number(7) +7
            1 Number(0) 0
            1 Newline end of line
        "#]],
    );
}

#[test]
fn directives_and_labels() {
    check(
        ": main\n:const FOO 10\n:next target",
        expect![[r#"
            1 Directive(Label) :
            1 Name main
            1 Newline end of line
            2 Directive(Const) :const
            2 Name FOO
            2 Number(10) 10
            2 Newline end of line
            3 Directive(Next) :next
            3 Name target
            3 Newline end of line
        "#]],
    );
}

#[test]
fn registers_keywords_and_names() {
    check(
        "va := key\ni := hex vf\nif v3 -key then ;\nunpack-hi my_name",
        expect![[r#"
            1 Register(V(10)) va
            1 Operator(Assign) :=
            1 Keyword(Key) key
            1 Newline end of line
            2 Register(I) i
            2 Operator(Assign) :=
            2 Keyword(Hex) hex
            2 Register(V(15)) vf
            2 Newline end of line
            3 Keyword(If) if
            3 Register(V(3)) v3
            3 Keyword(NotKey) -key
            3 Keyword(Then) then
            3 Keyword(Return) ;
            3 Newline end of line
            4 Name unpack-hi
            4 Name my_name
            4 Newline end of line
        "#]],
    );
}

#[test]
fn registers_are_lowercase() {
    check(
        "VA vA vg v10",
        expect![[r#"
            1 Name VA
            1 Name vA
            1 Name vg
            1 Name v10
            1 Newline end of line
        "#]],
    );
}

#[test]
fn calc_tokens() {
    check(
        ":calc x { ( @ main + 2 ) pow sin KEY_W CALLS }",
        expect![[r#"
            1 Directive(Calc) :calc
            1 Name x
            1 OpenBrace {
            1 OpenParen (
            1 Operator(At) @
            1 Name main
            1 Operator(Plus) +
            1 Number(2) 2
            1 CloseParen )
            1 Operator(Pow) pow
            1 Operator(Sin) sin
            1 Constant(Key(5)) KEY_W
            1 Constant(Calls) CALLS
            1 CloseBrace }
            1 Newline end of line
        "#]],
    );
}

#[test]
fn strings_keep_spacing() {
    check(
        ":stringmode text \"a  b#c\" {\nshow \"hi\"\t# done",
        expect![[r#"
            1 Directive(StringMode) :stringmode
            1 Name text
            1 String "a  b#c"
            1 OpenBrace {
            1 Newline end of line
            2 Name show
            2 String "hi"
            2 Newline end of line
        "#]],
    );
}

#[test]
fn unknown_directive() {
    check(":frobnicate 3", expect!["error: line 1: unknown directive `:frobnicate`\n"]);
    assert_eq!(error_kind("\n\n:nope"), LexErrorKind::UnknownDirective);
}

#[test]
fn unrecognized_word() {
    check("v0 := $12", expect!["error: line 1: unrecognized token `$12`\n"]);
    assert_eq!(error_kind("0xZZ"), LexErrorKind::Unrecognized);
    assert_eq!(error_kind("-name"), LexErrorKind::Unrecognized);
}

#[test]
fn unterminated_string() {
    check("x \"abc", expect![[r#"
        error: line 1: unterminated string `"abc`
    "#]]);
}

#[test]
fn number_out_of_range() {
    assert_eq!(
        error_kind("99999999999999999999"),
        LexErrorKind::NumberOutOfRange
    );
    assert_eq!(error_kind("0xFFFFFFFFFFFFFFFFFF"), LexErrorKind::NumberOutOfRange);
}

#[test]
fn every_line_ends_in_one_newline() {
    let mut si = Interner::default();
    let tokens = lex("clear\nreturn\n\n\nclear", &mut si).unwrap();
    let newlines = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Newline)
        .count();
    assert_eq!(newlines, 3);
    assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Newline));
}
