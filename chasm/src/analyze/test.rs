use expect_test::{expect, Expect};

use super::{analyze, AnalysisError, AnalysisErrorKind};
use crate::ir::{Imm, Instr, Stmt, StmtKind};
use crate::lex::lex;
use crate::parse::parse;
use crate::{Interner, Options};

fn analyze_with(src: &str, options: &Options) -> Result<(Vec<Stmt>, Interner), AnalysisError> {
    let mut si = Interner::default();
    let tokens = lex(src, &mut si).unwrap();
    let statements = parse(&tokens, &si).unwrap();
    let stmts = analyze(&statements, &mut si, options)?;
    Ok((stmts, si))
}

fn render(stmts: &[Stmt], si: &Interner) -> String {
    stmts
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Label(l) => format!("{} label {}\n", s.line, si.resolve(*l).unwrap()),
            StmtKind::NextLabel(l) => format!("{} next {}\n", s.line, si.resolve(*l).unwrap()),
            kind => format!("{} {kind:?}\n", s.line),
        })
        .collect()
}

fn check(src: &str, expect: Expect) {
    let out = match analyze_with(src, &Options::default()) {
        Ok((stmts, si)) => render(&stmts, &si),
        Err(e) => format!("error: {e}\n"),
    };
    expect.assert_eq(&out);
}

fn error_kind(src: &str) -> AnalysisErrorKind {
    analyze_with(src, &Options::default()).unwrap_err().kind
}

#[test]
fn aliases_and_constants() {
    check(
        ":alias x v3\n:const LIMIT 10\n: main\nx := LIMIT\nx += v1\nv2 := x\n",
        expect![[r#"
            3 label main
            4 Instr(RegImm(SetI, 3, Number(10)))
            5 Instr(RegReg(Add, 3, 1))
            6 Instr(RegReg(Set, 2, 3))
        "#]],
    );
}

#[test]
fn subtracting_an_immediate_adds_its_complement() {
    check(
        ": main\nv0 -= 1\nv1 -= 0x80",
        expect![[r#"
            1 label main
            2 Instr(RegImm(AddI, 0, Number(255)))
            3 Instr(RegImm(AddI, 1, Number(128)))
        "#]],
    );
}

#[test]
fn namespace_is_shared() {
    check(
        ":alias x v1\n:const x 2\n: main",
        expect!["error: line 2: `x`: name already declared as a register alias\n"],
    );
    check(
        ":const main 1\n: main",
        expect!["error: line 1: `main`: name already declared as a label\n"],
    );
    check(
        ": draw\n:macro draw { clear }\n: main",
        expect!["error: line 2: `draw`: name already declared as a label\n"],
    );
    assert_eq!(
        error_kind(":macro m { clear }\n:macro m { clear }\n: main"),
        AnalysisErrorKind::NameInUse("a macro")
    );
}

#[test]
fn rebinding_within_a_kind() {
    check(
        ":alias x v1\n:alias x v2\n:calc n { 1 }\n:calc n { n + 1 }\n: main\nx := n",
        expect![[r#"
            5 label main
            6 Instr(RegImm(SetI, 2, Number(2)))
        "#]],
    );
}

#[test]
fn next_may_be_redeclared() {
    check(
        ": main\n:next target v0 := 1\n:next target v1 := 2\n",
        expect![[r#"
            1 label main
            2 next target
            2 Instr(RegImm(SetI, 0, Number(1)))
            3 next target
            3 Instr(RegImm(SetI, 1, Number(2)))
        "#]],
    );
}

#[test]
fn plain_labels_may_not() {
    check(
        ": main\n: a\n: a\n",
        expect!["error: line 3: `a`: label declared twice\n"],
    );
    check(
        ": main\n: a\n:next a clear",
        expect!["error: line 3: `a`: label declared twice\n"],
    );
    check(
        ":macro spot {\n  : here\n}\n: main\nspot\nspot",
        expect!["error: line 2: `here`: label declared twice\n"],
    );
}

#[test]
fn missing_main() {
    check(": start\nclear\n", expect!["error: line 2: `main`: program has no `main` label\n"]);
    check("", expect!["error: line 1: `main`: program has no `main` label\n"]);
}

#[test]
fn macro_arity() {
    check(
        ":macro twice a b { a += b }\n: main\ntwice v1\n",
        expect!["error: line 3: `twice`: expected 2 arguments, got 1\n"],
    );
    assert_eq!(
        error_kind(":macro none { clear }\n: main\nnone v1 v2"),
        AnalysisErrorKind::ArityMismatch {
            expected: 0,
            got: 2
        }
    );
}

#[test]
fn macro_arguments() {
    check(
        ":macro add-to dst amount { dst += amount }\n: main\nadd-to v1 5\nadd-to v2 v3\n",
        expect![[r#"
            2 label main
            1 Instr(RegImm(AddI, 1, Number(5)))
            1 Instr(RegReg(Add, 2, 3))
        "#]],
    );
}

#[test]
fn substitution_is_transitive() {
    check(
        ":macro inner r { r := 7 }\n:macro outer x { inner x }\n: main\nouter v4\n",
        expect![[r#"
            3 label main
            1 Instr(RegImm(SetI, 4, Number(7)))
        "#]],
    );
}

#[test]
fn numbers_from_arguments_become_data() {
    check(
        ":macro db x { x }\n: main\ndb 7",
        expect![[r#"
            2 label main
            1 Byte(Number(7))
        "#]],
    );
}

#[test]
fn calls_counts_per_macro() {
    check(
        ":macro count { v0 := CALLS }\n:macro other { v1 := CALLS }\n: main\ncount\nother\ncount",
        expect![[r#"
            3 label main
            1 Instr(RegImm(SetI, 0, Number(1)))
            2 Instr(RegImm(SetI, 1, Number(1)))
            1 Instr(RegImm(SetI, 0, Number(2)))
        "#]],
    );
}

#[test]
fn reserved_constants_need_context() {
    check(
        ": main\nv0 := CALLS",
        expect!["error: line 2: `CALLS`: only valid inside a macro or stringmode body\n"],
    );
    check(
        ": main\nv0 := CHAR",
        expect!["error: line 2: `CHAR`: only valid inside a stringmode body\n"],
    );
    check(
        ":macro m { v0 := INDEX }\n: main\nm",
        expect!["error: line 1: `INDEX`: only valid inside a stringmode body\n"],
    );
    check(
        ": main\nv0 := KEY_W",
        expect!["error: line 2: `KEY_W`: only valid inside a calc expression\n"],
    );
    check(
        ":calc k { KEY_W }\n: main\nv0 := k",
        expect![[r#"
            2 label main
            3 Instr(RegImm(SetI, 0, Number(5)))
        "#]],
    );
}

#[test]
fn stringmode_expansion() {
    check(
        ":stringmode text \"abc\" { v0 := VALUE }\n\
         :stringmode text \"xyz\" { v1 := VALUE }\n: main\ntext \"bz\"\n",
        expect![[r#"
            3 label main
            1 Instr(RegImm(SetI, 0, Number(1)))
            2 Instr(RegImm(SetI, 1, Number(2)))
        "#]],
    );
    check(
        ":stringmode s \"ab\" { v0 := CHAR v1 := INDEX }\n: main\ns \"ba\"",
        expect![[r#"
            2 label main
            1 Instr(RegImm(SetI, 0, Number(98)))
            1 Instr(RegImm(SetI, 1, Number(0)))
            1 Instr(RegImm(SetI, 0, Number(97)))
            1 Instr(RegImm(SetI, 1, Number(1)))
        "#]],
    );
}

#[test]
fn stringmode_coverage() {
    check(
        ":stringmode text \"abc\" { v0 := VALUE }\n: main\ntext \"abd\"\n",
        expect![[r#"
            error: line 3: `"abd"`: no alphabet covers 'd'
        "#]],
    );
    check(
        ":stringmode t \"ab\" { clear }\n:stringmode t \"bc\" { clear }\n: main",
        expect![[r#"
            error: line 2: `"bc"`: alphabet shares 'b' with an earlier declaration
        "#]],
    );
    assert_eq!(
        error_kind(":stringmode t \"ab\" { clear }\n: main\nt v1"),
        AnalysisErrorKind::ExpectedString("a register")
    );
}

#[test]
fn calc_folding() {
    check(
        ":calc half { 10 / 4 }\n:calc w { 2 * 3 + 4 }\n:calc n { strlen \"hello\" }\n\
         : main\nv0 := half\nv1 := w\nv2 := n",
        expect![[r#"
            4 label main
            5 Instr(RegImm(SetI, 0, Number(2)))
            6 Instr(RegImm(SetI, 1, Number(14)))
            7 Instr(RegImm(SetI, 2, Number(5)))
        "#]],
    );
}

#[test]
fn calc_with_labels_waits_for_addresses() {
    let (stmts, _) =
        analyze_with(": main\n:calc a { 2 + @ main }\ni := a", &Options::default()).unwrap();
    assert!(matches!(
        stmts[1].kind,
        StmtKind::Instr(Instr::Addr(_, Imm::Expr(_)))
    ));
}

#[test]
fn calc_chains_stay_bounded() {
    let src = format!(": main\n:calc a {{ @ main }}\n{}", ":calc a { a + 1 }\n".repeat(300));
    check(
        &src,
        expect!["error: line 259: `+`: calc expression nested deeper than 256 levels\n"],
    );
}

#[test]
fn calc_errors() {
    check(
        ": main\n:calc a { main + 1 }",
        expect!["error: line 2: `main`: labels in calc expressions need `@`\n"],
    );
    check(
        ":const c 1\n: main\n:calc a { 2 + @ c }",
        expect!["error: line 3: `c`: `@` applies only to labels\n"],
    );
    check(
        ": main\n:calc a { @ main + 2 }",
        expect!["error: line 2: `@`: `@` applies only to labels\n"],
    );
    check(
        ":alias r v1\n: main\n:calc a { r }",
        expect!["error: line 3: `r`: registers cannot appear in calc expressions\n"],
    );
    check(
        ": main\n:calc a { strlen 3 }",
        expect!["error: line 2: `strlen`: `strlen` applies only to strings\n"],
    );
    check(
        ": main\n:calc a { 1 / 0 }\nv0 := a",
        expect!["error: line 3: `a`: calc result is not a finite number\n"],
    );
}

#[test]
fn register_constants() {
    check(
        ":alias hi { 2 + 1 }\n: main\nhi := 4",
        expect![[r#"
            2 label main
            3 Instr(RegImm(SetI, 3, Number(4)))
        "#]],
    );
    check(
        ":alias bad { 16 }\n: main",
        expect!["error: line 1: `16`: register constant 16 is not in 0..=15\n"],
    );
}

#[test]
fn immediate_ranges() {
    check(
        ": main\nv0 := 256",
        expect!["error: line 2: `256`: 256 does not fit in 8 bits\n"],
    );
    check(
        ": main\ni := 4096",
        expect!["error: line 2: `4096`: 4096 does not fit in 12 bits\n"],
    );
    check(
        ": main\nsprite v0 v1 16",
        expect!["error: line 2: `16`: 16 does not fit in 4 bits\n"],
    );
    check(
        ": main\nv0 := -128",
        expect![[r#"
            1 label main
            2 Instr(RegImm(SetI, 0, Number(-128)))
        "#]],
    );
}

#[test]
fn compare_temporary() {
    check(
        ": main\nif vf < 3 then clear",
        expect!["error: line 2: `vf`: vf is the compare temporary and cannot be compared with `<`, `>`, `<=` or `>=`\n"],
    );
    check(
        ":alias compare-temp ve\n: main\nif vf < 3 then clear",
        expect![[r#"
            2 label main
            3 If { cond: Compare { reg: 15, op: Lt, rhs: Imm(Number(3)), temp: 14 }, then: [Stmt { line: 3, kind: Instr(Bare(Clr)), .. }] }
        "#]],
    );
}

#[test]
fn unpack_targets() {
    check(
        ":alias unpack-hi v4\n: main\n:unpack 0x123",
        expect![[r#"
            2 label main
            3 Unpack { hi: 4, lo: 1, tag: None, value: Number(291) }
        "#]],
    );
}

#[test]
fn loop_break_condition() {
    check(
        ": main\nloop\n  v0 += 1\n  if v0 == 10 then\nagain",
        expect![[r#"
            1 label main
            2 Loop { body: [Stmt { line: 3, kind: Instr(RegImm(AddI, 0, Number(1))), .. }], break_cond: Some(Compare { reg: 0, op: Eq, rhs: Imm(Number(10)), temp: 15 }) }
        "#]],
    );
}

#[test]
fn expansion_depth_is_bounded() {
    check(
        ":macro forever { forever }\n: main\nforever",
        expect!["error: line 1: `forever`: expansion nested deeper than 64 levels\n"],
    );
}

#[test]
fn defines_are_constants() {
    let options = Options {
        defines: vec![("LEVEL".to_owned(), 3)],
        ..Options::default()
    };
    let (stmts, si) = analyze_with(": main\nv0 := LEVEL", &options).unwrap();
    expect![[r#"
        1 label main
        2 Instr(RegImm(SetI, 0, Number(3)))
    "#]]
    .assert_eq(&render(&stmts, &si));
}

#[test]
fn names_must_be_declared() {
    check(
        ": main\njump nowhere",
        expect!["error: line 2: `nowhere`: undeclared name\n"],
    );
    check(
        ": main\nnowhere v1",
        expect!["error: line 2: `nowhere`: undeclared name\n"],
    );
    check(
        ": main\nmain v1",
        expect!["error: line 2: `main`: not a macro or stringmode, it is a label\n"],
    );
    check(
        ": main\nv0 := main\nmain := 1",
        expect!["error: line 3: `main`: expected a register, found a label\n"],
    );
}

#[test]
fn bare_names_call_labels() {
    let (stmts, si) = analyze_with(": main\n: sub\nsub", &Options::default()).unwrap();
    let sub = si.get("sub").unwrap();
    assert_eq!(
        stmts[2].kind,
        StmtKind::Instr(Instr::Addr(chasm_isa::Mnemonic::Call, Imm::Label(sub)))
    );
}
