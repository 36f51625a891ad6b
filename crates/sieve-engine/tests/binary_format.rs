//! Binary container properties: determinism, persistence round-trips,
//! staleness and corruption handling.

mod common;

use common::{compile, instance, run, TestMessage};
use sieve_engine::{
    CompileFlags, ErrorHandler, ExecuteFlags, ExitStatus, Script, SieveBinary, SieveError,
};

/// Byte offset of the code block, read from the serialized block table.
fn code_block_offset(bytes: &[u8]) -> usize {
    // First table entry starts right after the 20-byte header.
    u64::from_le_bytes(bytes[20..28].try_into().unwrap()) as usize
}

#[test]
fn compilation_is_deterministic() {
    let source = r#"
        require ["fileinto"];
        if anyof (header :contains "Subject" "sale", size :over 10K) {
            fileinto "Junk";
        }
        keep;
    "#;
    let engine = instance();
    let first = compile(&engine, source);
    let second = compile(&engine, source);
    assert_eq!(first.to_bytes(), second.to_bytes());
}

#[test]
fn save_load_preserves_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.svbin");
    let engine = instance();
    let mut binary = compile(
        &engine,
        r#"require "fileinto"; if size :over 1K { fileinto "Big"; }"#,
    );
    binary.save(Some(&path), true).unwrap();
    let loaded = SieveBinary::load(&path).unwrap();

    let message = TestMessage::new().with_size(5000);
    let (_, from_fresh) = run(&engine, &binary, &message);
    let (_, from_loaded) = run(&engine, &loaded, &message);
    assert_eq!(from_fresh, from_loaded);
    assert_eq!(binary.to_bytes(), loaded.to_bytes());
}

#[test]
fn redundant_require_does_not_change_bytecode() {
    let engine = instance();
    let base = compile(&engine, r#"require "fileinto"; fileinto "Junk";"#);
    let doubled = compile(
        &engine,
        r#"require "fileinto"; require ["fileinto"]; fileinto "Junk";"#,
    );
    assert_eq!(base.to_bytes(), doubled.to_bytes());
}

#[test]
fn unknown_opcode_is_bin_corrupt() {
    let engine = instance();
    let binary = compile(&engine, "keep;");
    let mut bytes = binary.to_bytes();
    let offset = code_block_offset(&bytes);
    // 0xFF names an extension slot far beyond the dependency table.
    bytes[offset] = 0xff;
    let corrupt = SieveBinary::from_bytes(&bytes, "test").unwrap();

    let mut env = common::RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &corrupt,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::BinCorrupt);
    // Corrupt bytecode skips action commit entirely.
    assert!(env.committed.is_empty());
}

#[test]
fn truncated_operand_is_bin_corrupt() {
    let engine = instance();
    let binary = compile(&engine, r#"redirect "someone@example.org";"#);
    let mut bytes = binary.to_bytes();
    // Shrink the code block so the string operand is cut off.
    let length = u64::from_le_bytes(bytes[28..36].try_into().unwrap());
    bytes[28..36].copy_from_slice(&(length - 1).to_le_bytes());
    let corrupt = SieveBinary::from_bytes(&bytes, "test").unwrap();

    let mut env = common::RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &corrupt,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::BinCorrupt);
    assert!(env.committed.is_empty());
}

#[test]
fn open_caches_and_recompiles_when_stale() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("filter.sieve");
    std::fs::write(&script_path, "keep;\n").unwrap();

    let engine = instance();
    let mut ehandler = ErrorHandler::default();
    let binary = engine
        .open(&script_path, &mut ehandler, CompileFlags::default())
        .unwrap();
    assert!(binary.up_to_date(false));

    let cached = dir.path().join("filter.svbin");
    assert!(cached.exists());
    let cached_bytes = std::fs::read(&cached).unwrap();

    // Unchanged source: the cached binary is served as-is.
    let again = engine
        .open(&script_path, &mut ehandler, CompileFlags::default())
        .unwrap();
    assert_eq!(again.to_bytes(), binary.to_bytes());

    // Grow the source; the recorded size no longer matches.
    std::fs::write(&script_path, "keep;\nstop;\n").unwrap();
    let loaded = SieveBinary::load(&cached).unwrap();
    assert!(!loaded.up_to_date(false));

    let recompiled = engine
        .open(&script_path, &mut ehandler, CompileFlags::default())
        .unwrap();
    assert_ne!(std::fs::read(&cached).unwrap(), cached_bytes);
    assert!(recompiled.up_to_date(false));
}

#[test]
fn dependency_table_names_required_extensions() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require ["fileinto", "reject"]; fileinto "A"; reject "B";"#,
    );
    let names: Vec<&str> = binary.deps().iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["fileinto", "reject"]);
}

#[test]
fn dump_disassembles_whole_program() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require "fileinto";
           if header :contains "Subject" "sale" { fileinto "Junk"; }
           stop;"#,
    );
    let mut out = Vec::new();
    engine.dump(&binary, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("HEADER"));
    assert!(text.contains("JMP_IF_FALSE"));
    assert!(text.contains("FILEINTO"));
    assert!(text.contains("STOP"));
    assert!(text.contains(":contains"));
    assert!(text.contains("\"Junk\""));
    assert!(text.contains("0: fileinto (version 1)"));

    let mut hex = Vec::new();
    engine.hexdump(&binary, &mut hex).unwrap();
    assert!(String::from_utf8(hex).unwrap().contains("block 0"));
}

#[test]
fn compile_error_produces_no_binary() {
    let engine = instance();
    let script = Script::from_source("broken", "keep ;;");
    let mut ehandler = ErrorHandler::default();
    let result = engine.compile(&script, &mut ehandler, CompileFlags::default());
    assert_eq!(result.unwrap_err(), SieveError::NotValid);
    assert!(ehandler.error_count() > 0);
}
