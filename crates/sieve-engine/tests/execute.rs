//! End-to-end execution scenarios: compile source, run against a message,
//! check the committed actions.

mod common;

use common::{compile, instance, instance_with_cpu_limit, run, RecordingEnv, TestMessage};
use sieve_engine::{
    CompileFlags, ErrorHandler, ExecuteFlags, ExitStatus, Script, SieveError,
};
use std::time::Duration;

#[test]
fn explicit_keep() {
    let engine = instance();
    let binary = compile(&engine, "require [\"fileinto\"];\nkeep;");
    let (status, committed) = run(&engine, &binary, &TestMessage::new());
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["keep:INBOX"]);
}

#[test]
fn size_over_branches() {
    let engine = instance();
    let binary = compile(&engine, "if size :over 1K { discard; } else { keep; }");

    let (status, committed) = run(&engine, &binary, &TestMessage::new().with_size(600));
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["keep:INBOX"]);

    let (status, committed) = run(&engine, &binary, &TestMessage::new().with_size(2000));
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["discard"]);
}

#[test]
fn header_contains_default_comparator_folds_case() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require "fileinto"; if header :contains "Subject" "sale" { fileinto "Junk"; }"#,
    );
    let message = TestMessage::new().with_header("Subject", "Weekend SALE!!");
    let (status, committed) = run(&engine, &binary, &message);
    assert_eq!(status, ExitStatus::Ok);
    // The successful fileinto cancels the implicit keep at commit time;
    // only the dry-run view shows both.
    assert_eq!(committed, vec!["fileinto:Junk"]);
}

#[test]
fn header_contains_octet_comparator_is_exact() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require "fileinto";
           if header :comparator "i;octet" :contains "Subject" "sale" { fileinto "Junk"; }"#,
    );
    let message = TestMessage::new().with_header("Subject", "Weekend SALE!!");
    let (status, committed) = run(&engine, &binary, &message);
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["keep:INBOX"]);
}

#[test]
fn address_domain_is_case_insensitive_by_default() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"if address :domain :is "From" "example.com" { redirect "a@b.example"; }"#,
    );
    let message = TestMessage::new().with_header("From", "x@EXAMPLE.COM");
    let (status, committed) = run(&engine, &binary, &message);
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["redirect:a@b.example"]);
}

#[test]
fn anyof_short_circuits() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"if anyof (header :contains "X" "a", header :contains "Y" "b") { discard; }"#,
    );
    let message = TestMessage::new()
        .with_header("X", "has a inside")
        .with_header("Y", "has b inside");
    let (status, committed) = run(&engine, &binary, &message);
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["discard"]);
    // The X lookup matched, so Y was never fetched.
    assert_eq!(message.header_lookups.get(), 1);
}

#[test]
fn allof_evaluates_all_when_true() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"if allof (exists "X", exists "Y") { discard; }"#,
    );
    let message = TestMessage::new()
        .with_header("X", "1")
        .with_header("Y", "2");
    let (_, committed) = run(&engine, &binary, &message);
    assert_eq!(committed, vec!["discard"]);
    assert_eq!(message.header_lookups.get(), 2);
}

#[test]
fn missing_extension_fails_compile() {
    let engine = instance();
    let script = Script::from_source("test", "require [\"no-such-ext\"];\nkeep;");
    let mut ehandler = ErrorHandler::default();
    let result = engine.compile(&script, &mut ehandler, CompileFlags::default());
    assert_eq!(result.unwrap_err(), SieveError::NotValid);
    assert!(ehandler
        .format_all()
        .contains("unknown extension 'no-such-ext'"));
}

#[test]
fn stop_halts_execution() {
    let engine = instance();
    let binary = compile(&engine, "keep; stop; discard;");
    let (status, committed) = run(&engine, &binary, &TestMessage::new());
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["keep:INBOX"]);
}

#[test]
fn implicit_keep_when_no_action_ran() {
    let engine = instance();
    let binary = compile(&engine, "if false { keep; }");
    let (status, committed) = run(&engine, &binary, &TestMessage::new());
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(committed, vec!["keep:INBOX"]);
}

#[test]
fn nested_logic() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"if anyof (allof (exists "A", not exists "B"), size :over 10K) { discard; } else { keep; }"#,
    );
    // A present, B absent -> allof true -> discard.
    let message = TestMessage::new().with_header("A", "1");
    let (_, committed) = run(&engine, &binary, &message);
    assert_eq!(committed, vec!["discard"]);

    // A and B present, small message -> keep.
    let message = TestMessage::new().with_header("A", "1").with_header("B", "2");
    let (_, committed) = run(&engine, &binary, &message);
    assert_eq!(committed, vec!["keep:INBOX"]);
}

#[test]
fn envelope_test_matches_sender() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require ["envelope", "fileinto"];
           if envelope :domain :is "from" "example.org" { fileinto "Lists"; }"#,
    );
    let message = TestMessage::new().with_envelope_from("news@example.org");
    let (_, committed) = run(&engine, &binary, &message);
    assert_eq!(committed, vec!["fileinto:Lists"]);
}

#[test]
fn reject_commits_before_storage() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require "reject"; reject "not wanted here";"#,
    );
    let (status, committed) = run(&engine, &binary, &TestMessage::new());
    assert_eq!(status, ExitStatus::Ok);
    // Reject succeeded, so the implicit keep is cancelled.
    assert_eq!(committed, vec!["reject:not wanted here"]);
}

#[test]
fn reject_and_keep_conflict_fails_execution() {
    let engine = instance();
    let binary = compile(&engine, r#"require "reject"; reject "no"; keep;"#);
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &binary,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::Failure);
    // Evaluation failed: pending actions were voided, implicit keep ran.
    assert_eq!(env.committed, vec!["keep:INBOX"]);
    assert!(ehandler.error_count() > 0);
}

#[test]
fn zero_cpu_budget_tempfails_without_commit() {
    let engine = instance_with_cpu_limit(Duration::ZERO);
    let binary = compile(&engine, "keep;");
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &binary,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::TempFailure);
    assert!(env.committed.is_empty());
}

#[test]
fn cancellation_token_stops_execution() {
    use std::sync::atomic::AtomicBool;

    let engine = instance();
    let binary = compile(&engine, "keep;");
    let cancel = AtomicBool::new(true);
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute_with_cancel(
            &binary,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
            Some(&cancel),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::TempFailure);
    assert!(env.committed.is_empty());
}

#[test]
fn keep_failed_when_everything_fails() {
    let engine = instance();
    let binary = compile(&engine, "keep;");
    let mut env = RecordingEnv {
        fail_all: true,
        ..RecordingEnv::default()
    };
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &binary,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags::default(),
        )
        .unwrap();
    assert_eq!(status, ExitStatus::KeepFailed);
}

#[test]
fn dry_run_prints_pending_actions() {
    let engine = instance();
    let binary = compile(
        &engine,
        r#"require "fileinto"; if header :contains "Subject" "sale" { fileinto "Junk"; }"#,
    );
    let message = TestMessage::new().with_header("Subject", "Big sale");
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let mut out = Vec::new();
    let status = engine
        .test(&binary, &message, &mut env, &mut ehandler, &mut out)
        .unwrap();
    assert_eq!(status, ExitStatus::Ok);
    // Nothing committed; the pending set is printed instead.
    assert!(env.committed.is_empty());
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("store message in mailbox 'Junk'"));
    assert!(text.contains("store message in mailbox 'INBOX'"));
}

#[test]
fn no_delivery_flag_suppresses_commit() {
    let engine = instance();
    let binary = compile(&engine, "keep;");
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = engine
        .execute(
            &binary,
            &TestMessage::new(),
            &mut env,
            &mut ehandler,
            ExecuteFlags {
                no_delivery: true,
                ..ExecuteFlags::default()
            },
        )
        .unwrap();
    assert_eq!(status, ExitStatus::Ok);
    assert!(env.committed.is_empty());
}

#[test]
fn multiscript_chain_commits_once() {
    let engine = instance();
    let first = compile(
        &engine,
        r#"require "fileinto"; if exists "X-List" { fileinto "Lists"; }"#,
    );
    let second = compile(&engine, r#"if size :over 100K { discard; }"#);

    let message = TestMessage::new().with_header("X-List", "dev");
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();

    let mut chain = engine.multiscript();
    assert!(chain.run(&first, &message, &mut env, &mut ehandler));
    assert!(chain.keep_equivalence());
    assert!(chain.run(&second, &message, &mut env, &mut ehandler));
    assert!(!chain.will_discard());
    // Nothing committed until the chain finishes.
    assert!(env.committed.is_empty());

    let status = chain.finish(&mut env, &mut ehandler);
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(env.committed, vec!["fileinto:Lists"]);
}

#[test]
fn multiscript_dry_run_prints_shared_result() {
    let engine = instance();
    let first = compile(&engine, r#"require "fileinto"; fileinto "Lists";"#);
    let second = compile(&engine, "keep;");

    let message = TestMessage::new();
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let mut chain = engine.multiscript();
    chain.run(&first, &message, &mut env, &mut ehandler);
    chain.run(&second, &message, &mut env, &mut ehandler);

    let mut out = Vec::new();
    let status = chain.finish_test(&mut out).unwrap();
    assert_eq!(status, ExitStatus::Ok);
    assert!(env.committed.is_empty());
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("store message in mailbox 'Lists'"));
    assert!(text.contains("keep"));
}

#[test]
fn disabled_extension_rejects_execution() {
    let mut engine = instance();
    let binary = compile(&engine, r#"require "fileinto"; fileinto "Junk";"#);
    // Narrow the enabled set after compilation; the cached binary now
    // names an unavailable extension.
    engine.set_extensions(Some("reject"));
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let result = engine.execute(
        &binary,
        &TestMessage::new(),
        &mut env,
        &mut ehandler,
        ExecuteFlags::default(),
    );
    assert_eq!(result.unwrap_err(), SieveError::NotValid);
}
