//! Shared test doubles: a scripted message and a recording environment.
#![allow(dead_code)]

use sieve_engine::{
    ActionError, CompileFlags, EngineConfig, EnvelopeField, ErrorHandler, ExecuteFlags,
    ExitStatus, Instance, MessageData, Script, ScriptEnv, SieveBinary,
};
use std::cell::Cell;
use std::time::Duration;

/// In-memory message with instrumented header access.
#[derive(Default)]
pub struct TestMessage {
    pub size: u64,
    pub headers: Vec<(String, String)>,
    pub envelope_from: Vec<String>,
    pub header_lookups: Cell<usize>,
}

impl TestMessage {
    pub fn new() -> Self {
        Self {
            size: 1000,
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_envelope_from(mut self, value: &str) -> Self {
        self.envelope_from.push(value.to_string());
        self
    }
}

impl MessageData for TestMessage {
    fn physical_size(&self) -> u64 {
        self.size
    }

    fn header(&self, name: &str, _decoded: bool) -> Vec<String> {
        self.header_lookups.set(self.header_lookups.get() + 1);
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn envelope(&self, field: EnvelopeField) -> Vec<String> {
        match field {
            EnvelopeField::From => self.envelope_from.clone(),
            _ => Vec::new(),
        }
    }
}

/// Environment that records every committed action as a string.
#[derive(Default)]
pub struct RecordingEnv {
    pub committed: Vec<String>,
    pub fail_all: bool,
}

impl ScriptEnv for RecordingEnv {
    fn user(&self) -> &str {
        "tester"
    }

    fn postmaster_address(&self) -> &str {
        "postmaster@example.com"
    }

    fn keep(&mut self, mailbox: Option<&str>) -> Result<(), ActionError> {
        if self.fail_all {
            return Err(ActionError::not_possible("storage down"));
        }
        self.committed
            .push(format!("keep:{}", mailbox.unwrap_or("INBOX")));
        Ok(())
    }

    fn fileinto(&mut self, mailbox: &str) -> Result<(), ActionError> {
        if self.fail_all {
            return Err(ActionError::not_possible("storage down"));
        }
        self.committed.push(format!("fileinto:{mailbox}"));
        Ok(())
    }

    fn redirect(&mut self, address: &str) -> Result<(), ActionError> {
        self.committed.push(format!("redirect:{address}"));
        Ok(())
    }

    fn reject(&mut self, reason: &str) -> Result<(), ActionError> {
        self.committed.push(format!("reject:{reason}"));
        Ok(())
    }

    fn discard(&mut self) -> Result<(), ActionError> {
        self.committed.push("discard".into());
        Ok(())
    }
}

pub fn instance() -> Instance {
    Instance::new(EngineConfig::default())
}

pub fn instance_with_cpu_limit(limit: Duration) -> Instance {
    Instance::new(EngineConfig {
        max_cpu_time: Some(limit),
        ..EngineConfig::default()
    })
}

/// Compile source text, panicking with diagnostics on failure.
pub fn compile(instance: &Instance, source: &str) -> SieveBinary {
    let script = Script::from_source("test", source);
    let mut ehandler = ErrorHandler::default();
    match instance.compile(&script, &mut ehandler, CompileFlags::default()) {
        Ok(binary) => binary,
        Err(err) => panic!("compile failed ({err}):\n{}", ehandler.format_all()),
    }
}

/// Execute a binary and return the status plus the recorded actions.
pub fn run(instance: &Instance, binary: &SieveBinary, message: &TestMessage) -> (ExitStatus, Vec<String>) {
    let mut env = RecordingEnv::default();
    let mut ehandler = ErrorHandler::default();
    let status = instance
        .execute(binary, message, &mut env, &mut ehandler, ExecuteFlags::default())
        .expect("binary must be executable");
    (status, env.committed)
}
