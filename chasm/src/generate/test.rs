use expect_test::{expect, Expect};

use super::{GenerationErrorKind, MonitorBase, MonitorShow};
use crate::{compile, Error, Options, Rom};

fn words(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(|word| word.iter().map(|b| format!("{b:02X}")).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_with(src: &str, options: &Options, expect: Expect) {
    let out = match compile(src, options) {
        Ok(rom) => words(&rom.bytes),
        Err(e) => format!("error: {e}"),
    };
    expect.assert_eq(&out);
}

fn check(src: &str, expect: Expect) {
    check_with(src, &Options::default(), expect);
}

fn rom(src: &str) -> Rom {
    compile(src, &Options::default()).unwrap()
}

#[test]
fn forward_jump() {
    check(": main\njump done\nclear\n: done\nreturn", expect!["1204 00E0 00EE"]);
    check(
        ": main\nsub\nreturn\n: sub\nclear\nreturn",
        expect!["2204 00EE 00E0 00EE"],
    );
}

#[test]
fn every_instruction_form() {
    check(
        ": main\nsprite v1 v2 5\njump0 main\ni := hex v3\nbcd v4\nsave v5\nload v6\n\
         delay := v7\nbuzzer := v8\nv9 := delay\nva := key\nvb := random 0x0F\ni += vc",
        expect!["D125 B200 F329 F433 F555 F665 F715 F818 F907 FA0A CB0F FC1E"],
    );
    check(
        ": main\nv1 |= v2\nv1 &= v2\nv1 ^= v2\nv1 += v2\nv1 -= v2\nv1 >>= v2\nv1 =- v2\nv1 <<= v2",
        expect!["8121 8122 8123 8124 8125 8126 8127 812E"],
    );
}

#[test]
fn then_skips_one_instruction() {
    check(
        ": main\nif v0 == 1 then v1 := 2\nreturn",
        expect!["4001 6102 00EE"],
    );
    check(": main\nif v2 key then clear", expect!["E2A1 00E0"]);
    check(": main\nif v2 -key then clear", expect!["E29E 00E0"]);
}

#[test]
fn relational_conditions_use_the_temporary() {
    check(
        ": main\nif v1 < 5 then clear",
        expect!["6F05 8F17 4F00 00E0"],
    );
    check(
        ": main\nif v1 >= v2 then clear",
        expect!["8F10 8F25 4F01 00E0"],
    );
    check(
        ": main\nif v1 > v2 begin\n  clear\nend",
        expect!["8F20 8F15 3F00 120A 00E0"],
    );
}

#[test]
fn if_else_patches_both_jumps() {
    check(
        ": main\nif v0 != v1 begin\n  v2 := 1\nelse\n  v2 := 2\nend\nreturn",
        expect!["9010 1208 6201 120A 6202 00EE"],
    );
    check(
        ": main\nif v0 == 3 begin\n  clear\nend\nreturn",
        expect!["3003 1206 00E0 00EE"],
    );
}

#[test]
fn loops() {
    check(": main\nloop\n  clear\nagain", expect!["00E0 1200"]);
    check(
        ": main\nloop\n  v0 += 1\n  if v0 == 10 then\nagain\nreturn",
        expect!["7001 400A 1208 1200 00EE"],
    );
    check(
        ": main\nwhile v0 != 0 v0 -= 1\nreturn",
        expect!["4000 1208 70FF 1200 00EE"],
    );
}

#[test]
fn then_must_be_single() {
    check(
        ":macro two { clear clear }\n: main\nif v0 key then two",
        expect!["error: line 3: `if`: the statement after `then` must be one instruction, it takes 4 bytes"],
    );
}

#[test]
fn org() {
    check(
        ": main\nclear\n:org 0x208\nreturn",
        expect!["00E0 0000 0000 0000 00EE"],
    );
    check(
        ": main\nclear\nclear\n:org 0x200",
        expect!["error: line 4: `:org`: cannot move back from 0x204 to 0x200"],
    );
    check(
        ": main\n:org 0x203",
        expect!["error: line 2: `:org`: target 0x203 is not word aligned"],
    );
    check(
        ": main\n:org { 2 + @ later }\n: later",
        expect!["error: line 2: `:org`: target depends on a label that is not laid out yet"],
    );
}

#[test]
fn asserts() {
    check(
        ": main\n:assert \"too big\" { 1 - 1 }",
        expect!["error: line 2: `:assert`: assertion failed: too big"],
    );
    check(": main\n:assert { 0 }", expect!["error: line 2: `:assert`: assertion failed"]);
    check(
        ": main\n:assert { 0x202 == @ done }\nclear\n: done",
        expect!["00E0"],
    );
}

#[test]
fn unpack() {
    check(": main\n:unpack 0xA main", expect!["60A2 6100"]);
    check(": main\n:unpack 0x1234", expect!["6012 6134"]);
    check(
        ":alias unpack-hi v5\n:alias unpack-lo v6\n: main\n:unpack 0x1234",
        expect!["6512 6634"],
    );
    check(
        ": main\n:unpack 1 0x1000",
        expect!["error: line 2: `:unpack`: 4096 does not fit in 12 bits"],
    );
}

#[test]
fn next_labels_the_immediate() {
    check(
        ": main\n:next target v0 := 5\ni := target\nreturn",
        expect!["6005 A201 00EE"],
    );
    let rom = rom(": main\n:next target v0 := 5\n:next target v1 := 6\ni := target");
    assert_eq!(rom.label("target"), Some(0x201));
}

#[test]
fn data() {
    check(
        ": main\n:byte 0xAB\n:byte { 3 * 4 }\n:pointer main\n0x10 0x20",
        expect!["AB0C 0200 1020"],
    );
    check(
        ": main\n:macro db x { x }\n: table\ndb 1\ndb 2\n:pointer { 1 + @ table }",
        expect!["0102 0201"],
    );
}

#[test]
fn label_values_are_range_checked() {
    check(": main\nv0 := main", expect!["error: line 2: `v0`: 512 does not fit in 8 bits"]);
    let err = compile(": main\n:calc x { 256 - @ main }\nv0 := x", &Options::default())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Generation(ref e) if e.kind == GenerationErrorKind::Overflow { value: -256, bits: 8 }
    ));
}

#[test]
fn program_too_large() {
    let options = Options {
        memory_end: 0x204,
        ..Options::default()
    };
    check_with(
        ": main\nclear\nclear\nclear",
        &options,
        expect!["error: line 4: `clear`: program does not fit below 0x204"],
    );
}

#[test]
fn origin_moves_everything() {
    let options = Options {
        origin: 0x300,
        ..Options::default()
    };
    check_with(": main\njump main", &options, expect!["1300"]);
}

#[test]
fn debugging_metadata() {
    let rom = rom(
        ": main\nclear\n:breakpoint here\n: data\n:monitor data 4\n:monitor v3 \"%i\"\n0x00 0x01",
    );
    assert_eq!(words(&rom.bytes), "00E0 0001");
    assert_eq!(rom.label("data"), Some(0x202));
    assert_eq!(rom.monitors[0].base, MonitorBase::Address(0x202));
    assert_eq!(rom.monitors[1].show, MonitorShow::Format("%i".to_owned()));
    expect![[r#"
        0x200 main
        0x202 data
        0x202 breakpoint here
        monitor 0x202 4
        monitor v3 "%i"
    "#]]
    .assert_eq(&rom.symbols());
}
