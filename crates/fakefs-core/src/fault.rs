// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Deterministic fault injection for exercising error paths in code under
//! test without constructing the triggering filesystem shape.

use std::io;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::FsError;

/// Operation classes a fault rule can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Open,
    Create,
    Read,
    Write,
    Unlink,
    Rename,
    Mkdir,
}

/// Errno values available for synthetic failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultErrno {
    Eio,
    Enospc,
    Eacces,
}

impl FaultErrno {
    pub(crate) fn to_error(self, path: &str) -> FsError {
        match self {
            FaultErrno::Eio => FsError::Io(io::Error::from_raw_os_error(libc::EIO)),
            FaultErrno::Enospc => FsError::no_space(path),
            FaultErrno::Eacces => FsError::access_denied(path),
        }
    }
}

/// One rule: which op fails, how, and how often.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    pub errno: FaultErrno,
    /// Number of leading invocations to let through before arming.
    #[serde(default)]
    pub start_after: u64,
    /// Maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl Default for FaultRule {
    fn default() -> Self {
        Self {
            op: FaultOp::Write,
            errno: FaultErrno::Eio,
            start_after: 0,
            max_faults: None,
        }
    }
}

/// JSON-loadable fault policy.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    invocations: u64,
    hits: u64,
}

#[derive(Debug, Default)]
struct InjectorState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime controller consulted by the engine at primitive entry.
#[derive(Debug, Default)]
pub(crate) struct FaultInjector {
    state: Mutex<InjectorState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InjectorState::default()),
        }
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut state = self.state.lock().unwrap();
        state.counters = vec![RuleCounters::default(); policy.rules.len()];
        state.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    pub fn policy(&self) -> FaultPolicy {
        self.state.lock().unwrap().policy.clone()
    }

    /// The errno to inject for `op`, if an armed rule matches.
    pub fn should_fault(&self, op: FaultOp) -> Option<FaultErrno> {
        let mut state = self.state.lock().unwrap();
        if !state.policy.enabled {
            return None;
        }
        for idx in 0..state.policy.rules.len() {
            let rule = state.policy.rules[idx].clone();
            if rule.op != op {
                continue;
            }
            let counters = &mut state.counters[idx];
            counters.invocations += 1;
            if counters.invocations <= rule.start_after {
                continue;
            }
            if let Some(max) = rule.max_faults {
                if counters.hits >= max {
                    continue;
                }
            }
            counters.hits += 1;
            return Some(rule.errno);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_json() {
        let json =
            br#"{ "enabled": true, "rules": [ { "op": "write", "errno": "enospc", "max_faults": 1 } ] }"#;
        let policy = FaultPolicy::from_json_bytes(json).expect("policy");
        assert!(policy.enabled);
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].op, FaultOp::Write);
        assert_eq!(policy.rules[0].errno, FaultErrno::Enospc);
        assert_eq!(policy.rules[0].max_faults, Some(1));
    }

    #[test]
    fn respects_start_after_and_max_faults() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::Read,
                errno: FaultErrno::Eio,
                start_after: 1,
                max_faults: Some(2),
            }],
        });

        assert!(injector.should_fault(FaultOp::Read).is_none());
        assert!(injector.should_fault(FaultOp::Read).is_some());
        assert!(injector.should_fault(FaultOp::Read).is_some());
        assert!(injector.should_fault(FaultOp::Read).is_none());
        // Other ops never match the rule
        assert!(injector.should_fault(FaultOp::Write).is_none());
    }

    #[test]
    fn disabled_policy_never_fires() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy {
            enabled: false,
            rules: vec![FaultRule::default()],
        });
        assert!(injector.should_fault(FaultOp::Write).is_none());

        injector.clear();
        assert!(injector.should_fault(FaultOp::Write).is_none());
    }

    #[test]
    fn injected_errors_carry_the_path() {
        let err = FaultErrno::Enospc.to_error("/mnt/f");
        assert!(matches!(err, FsError::NoSpace(p) if p == "/mnt/f"));
        assert_eq!(FaultErrno::Eio.to_error("/f").errno(), libc::EIO);
        assert_eq!(FaultErrno::Eacces.to_error("/f").errno(), libc::EACCES);
    }
}
