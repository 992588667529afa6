use expect_test::expect;

use crate::{compile, Error, Options};

fn bytes(src: &str) -> Vec<u8> {
    compile(src, &Options::default()).unwrap().bytes
}

fn error(src: &str) -> Error {
    compile(src, &Options::default()).unwrap_err()
}

#[test]
fn straight_line() {
    assert_eq!(
        bytes(": main\nv0 := 5\nv1 += v0\nreturn\n"),
        [0x60, 0x05, 0x81, 0x04, 0x00, 0xEE]
    );
    assert_eq!(
        bytes(":const FOO 10\n: main\nva := FOO\nreturn\n"),
        [0x6A, 0x0A, 0x00, 0xEE]
    );
}

#[test]
fn forward_reference() {
    assert_eq!(
        bytes(": main\njump later\n: later\nreturn\n"),
        [0x12, 0x02, 0x00, 0xEE]
    );
}

#[test]
fn animation() {
    let src = "\
# slide a face right until a key goes down
:const SPEED 2
:alias x v1
:alias y v2

: main
  x := 10
  y := 8
  i := face
  loop
    clear
    sprite x y 5
    x += SPEED
    if v0 key then
  again

: face
  0x24 0x24 0x00 0x81 0x7E
";
    let rom = compile(src, &Options::default()).unwrap();
    assert_eq!(rom.label("face"), Some(0x212));
    expect![[r#"
        [
            0x61,
            0x0a,
            0x62,
            0x08,
            0xa2,
            0x12,
            0x00,
            0xe0,
            0xd1,
            0x25,
            0x71,
            0x02,
            0xe0,
            0xa1,
            0x12,
            0x12,
            0x12,
            0x06,
            0x24,
            0x24,
            0x00,
            0x81,
            0x7e,
        ]
    "#]]
    .assert_debug_eq(&rom.bytes.iter().map(|b| Hex(*b)).collect::<Vec<_>>());
}

struct Hex(u8);

impl std::fmt::Debug for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[test]
fn long_calc_chain() {
    let src = format!(": main\n:byte {{ {}1 }}", "1 + ".repeat(199));
    assert_eq!(bytes(&src), [200]);
}

#[test]
fn stringmode_text() {
    let src = ":stringmode text \"ABC\" { :byte { VALUE + 1 } }\n: main\ntext \"CAB\"\n";
    assert_eq!(bytes(src), [3, 1, 2]);
}

#[test]
fn errors_carry_their_stage() {
    let lex = error(": main\n:nope");
    assert!(matches!(lex, Error::Lex(_)));
    assert_eq!(lex.line(), 2);

    let parse = error(": main\nv0 := ");
    assert!(matches!(parse, Error::Parse(_)));

    let analysis = error(": main\nv0 := nothing");
    expect!["line 2: `nothing`: undeclared name"].assert_eq(&analysis.to_string());
    assert_eq!(analysis.line(), 2);

    let generation = error(": main\n:assert \"never\" { 0 }");
    expect!["line 2: `:assert`: assertion failed: never"].assert_eq(&generation.to_string());
}
