// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! A Sieve (RFC 5228) mail-filtering engine.
//!
//! The engine turns Sieve source text into a persistent binary artifact
//! and interprets that artifact against a message to produce a set of
//! mail actions:
//!
//! ```text
//! source → parser → AST → validator → AST' → generator → binary
//!                                   binary + message → interpreter → result
//! ```
//!
//! Extensions plug into every stage through the [`extension::Extension`]
//! trait: they register commands, tests, tags and opcodes, and are
//! persisted as named dependencies in the binary container.
//!
//! Message access and action delivery stay outside the engine: hosts
//! implement [`MessageData`] and [`ScriptEnv`].
//!
//! # Example
//!
//! ```
//! use sieve_engine::{EngineConfig, ErrorHandler, Instance, Script};
//!
//! let instance = Instance::new(EngineConfig::default());
//! let script = Script::from_source("example", r#"
//!     require ["fileinto"];
//!     if header :contains "Subject" "sale" {
//!         fileinto "Junk";
//!     }
//! "#);
//! let mut ehandler = ErrorHandler::default();
//! let binary = instance
//!     .compile(&script, &mut ehandler, Default::default())
//!     .expect("script compiles");
//! assert_eq!(binary.deps()[0].name, "fileinto");
//! ```

pub mod ast;
pub mod binary;
pub mod codegen;
pub mod command;
pub(crate) mod commands;
pub mod engine;
pub mod error;
pub mod extension;
pub(crate) mod extensions;
pub mod foundation;
pub mod interp;
pub mod lexer;
pub mod matching;
pub mod message;
pub mod multiscript;
pub(crate) mod operand;
pub mod parser;
pub mod registry;
pub mod result;
pub mod script;
pub mod validate;

pub use binary::SieveBinary;
pub use engine::{CompileFlags, EngineConfig, ExecuteFlags, Instance};
pub use error::{Diagnostic, ErrorHandler, ExitStatus, Location, Severity, SieveError};
pub use extension::{Extension, ExtensionId};
pub use matching::{AddressPart, Comparator, MatchType};
pub use message::{ActionError, EnvelopeField, MessageData, RawMessage, ScriptEnv};
pub use multiscript::Multiscript;
pub use registry::ExtensionRegistry;
pub use result::{Action, ResultSet};
pub use script::Script;
