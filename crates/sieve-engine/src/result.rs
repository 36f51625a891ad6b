//! The action result set.
//!
//! Action opcodes never touch the environment directly; they record
//! pending actions here and the engine commits them after interpretation
//! succeeds. Commit order is deterministic: actions that redirect the
//! message first, then storage actions, then `discard`, then the implicit
//! keep if still owed.
//!
//! The implicit-keep flag starts set. An explicit `keep` or a `discard`
//! clears it at record time; delivery actions (`fileinto`, `redirect`,
//! `reject`) clear it only once they succeed at commit, so a dry run still
//! reports the implicit keep beside them.

use crate::error::{ExitStatus, RuntimeError};
use crate::extension::ExtensionId;
use crate::message::ScriptEnv;
use serde::Serialize;
use std::io::Write;

/// One side-effect a script asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    Keep { mailbox: Option<String> },
    FileInto { mailbox: String },
    Redirect { address: String },
    Reject { reason: String },
    Discard,
}

impl Action {
    /// Whether a successful commit of this action delivers the message
    /// somewhere (and thereby cancels the implicit keep).
    fn delivers(&self) -> bool {
        !matches!(self, Action::Discard)
    }

    fn conflicts_with_reject(&self) -> bool {
        matches!(
            self,
            Action::Keep { .. } | Action::FileInto { .. } | Action::Redirect { .. }
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Keep { mailbox: None } => write!(f, "keep"),
            Action::Keep {
                mailbox: Some(mailbox),
            } => write!(f, "keep (mailbox '{mailbox}')"),
            Action::FileInto { mailbox } => write!(f, "store message in mailbox '{mailbox}'"),
            Action::Redirect { address } => write!(f, "redirect message to <{address}>"),
            Action::Reject { reason } => write!(f, "reject message: \"{reason}\""),
            Action::Discard => write!(f, "discard"),
        }
    }
}

/// A pending action with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: Action,
    /// Extension that produced the action, `None` for core actions.
    #[serde(skip)]
    pub owner: Option<ExtensionId>,
    /// Script the action came from.
    pub source: String,
}

/// Ordered multiset of pending actions for one (or, in multiscript mode,
/// several chained) executions.
#[derive(Debug, Default)]
pub struct ResultSet {
    actions: Vec<ActionRecord>,
    implicit_keep: bool,
}

impl ResultSet {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            implicit_keep: true,
        }
    }

    pub fn pending(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn implicit_keep_needed(&self) -> bool {
        self.implicit_keep
    }

    /// Whether committing this result would store the message somewhere:
    /// a delivery-class action is pending or the implicit keep is owed.
    pub fn is_keep_equivalent(&self) -> bool {
        self.implicit_keep || self.actions.iter().any(|r| r.action.delivers())
    }

    pub fn will_discard(&self) -> bool {
        self.actions
            .iter()
            .any(|r| matches!(r.action, Action::Discard))
    }

    /// Record a pending action, applying per-kind duplicate and conflict
    /// rules.
    ///
    /// Duplicates (same `fileinto` mailbox, same `redirect` address, a
    /// second `keep`) collapse silently. A `reject` beside any
    /// delivery-class action is a conflict and fails the execution.
    pub fn record(
        &mut self,
        action: Action,
        owner: Option<ExtensionId>,
        source: &str,
    ) -> Result<(), RuntimeError> {
        let has_reject = self
            .actions
            .iter()
            .any(|r| matches!(r.action, Action::Reject { .. }));
        if action.conflicts_with_reject() && has_reject {
            return Err(RuntimeError::Failure(
                "delivery action conflicts with an earlier reject".into(),
            ));
        }
        if matches!(action, Action::Reject { .. })
            && self.actions.iter().any(|r| r.action.conflicts_with_reject())
        {
            return Err(RuntimeError::Failure(
                "reject conflicts with an earlier delivery action".into(),
            ));
        }

        let duplicate = self.actions.iter().any(|r| match (&r.action, &action) {
            (Action::Keep { .. }, Action::Keep { .. }) => true,
            (Action::FileInto { mailbox: a }, Action::FileInto { mailbox: b }) => a == b,
            (Action::Redirect { address: a }, Action::Redirect { address: b }) => a == b,
            (Action::Reject { .. }, Action::Reject { .. }) => true,
            (Action::Discard, Action::Discard) => true,
            _ => false,
        });

        match action {
            Action::Keep { .. } | Action::Discard => self.implicit_keep = false,
            _ => {}
        }
        if duplicate {
            return Ok(());
        }
        self.actions.push(ActionRecord {
            action,
            owner,
            source: source.to_string(),
        });
        Ok(())
    }

    /// Drop all pending actions (runtime failure path); the implicit keep
    /// stays owed so the message is not lost.
    pub fn discard_pending(&mut self) {
        self.actions.clear();
        self.implicit_keep = true;
    }

    /// Commit pending actions in order.
    ///
    /// Failing actions are reported and the remaining ones still run. If
    /// nothing delivered the message and no discard was requested, the
    /// implicit keep runs last; if even that fails the status degrades to
    /// `KeepFailed`.
    pub fn execute(
        &mut self,
        env: &mut dyn ScriptEnv,
        ehandler: &mut crate::error::ErrorHandler,
        defer_keep: bool,
        log_result: bool,
    ) -> ExitStatus {
        let mut delivered = false;
        let mut failed = false;
        let mut temp_failed = false;

        let ordered: Vec<usize> = phase_order(&self.actions);
        for index in ordered {
            let record = &self.actions[index];
            if let Action::Discard = record.action {
                // Discard "runs" only when nothing delivered the message.
                if !delivered {
                    if log_result {
                        tracing::info!(script = %record.source, "action: discard");
                    }
                    let _ = env.discard();
                }
                continue;
            }
            let result = match &record.action {
                Action::Keep { mailbox } => env.keep(mailbox.as_deref()),
                Action::FileInto { mailbox } => env.fileinto(mailbox),
                Action::Redirect { address } => env.redirect(address),
                Action::Reject { reason } => env.reject(reason),
                Action::Discard => unreachable!("handled above"),
            };
            match result {
                Ok(()) => {
                    if log_result {
                        tracing::info!(script = %record.source, action = %record.action, "action committed");
                    }
                    if record.action.delivers() {
                        delivered = true;
                        self.implicit_keep = false;
                    }
                }
                Err(err) => {
                    ehandler.error(
                        None,
                        format!("failed to execute action ({}): {err}", record.action),
                    );
                    if err.kind == crate::error::SieveError::TempFailure {
                        temp_failed = true;
                    }
                    failed = true;
                }
            }
        }

        // The safety net: a failed storage action still owes the user their
        // mail even when an explicit keep had cleared the flag.
        let owes_keep = self.implicit_keep || (failed && !delivered && !self.will_discard());
        if owes_keep && !defer_keep {
            match env.keep(None) {
                Ok(()) => {
                    if log_result {
                        tracing::info!("action: implicit keep");
                    }
                    self.implicit_keep = false;
                }
                Err(err) => {
                    ehandler.error(None, format!("implicit keep failed: {err}"));
                    return ExitStatus::KeepFailed;
                }
            }
        }

        if temp_failed {
            ExitStatus::TempFailure
        } else if failed {
            ExitStatus::Failure
        } else {
            ExitStatus::Ok
        }
    }

    /// Print the pending result, dry-run style.
    pub fn print(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "Performed actions:")?;
        if self.actions.is_empty() {
            writeln!(out, "  (none)")?;
        }
        for index in phase_order(&self.actions) {
            writeln!(out, "  * {}", self.actions[index].action)?;
        }
        writeln!(out, "Implicit keep:")?;
        if self.implicit_keep {
            writeln!(out, "  * store message in mailbox 'INBOX'")?;
        } else {
            writeln!(out, "  (none)")?;
        }
        Ok(())
    }
}

/// Commit order: redirect-class actions, then storage actions, then
/// discard. Within a phase, record order is kept.
fn phase_order(actions: &[ActionRecord]) -> Vec<usize> {
    let phase = |action: &Action| match action {
        Action::Redirect { .. } | Action::Reject { .. } => 0u8,
        Action::Keep { .. } | Action::FileInto { .. } => 1,
        Action::Discard => 2,
    };
    let mut order: Vec<usize> = (0..actions.len()).collect();
    order.sort_by_key(|&i| phase(&actions[i].action));
    order
}
