// src/exec/env.rs

//! Environment allowlist for child processes.
//!
//! Children never inherit the ambient environment wholesale; only the names
//! below, plus anything under the `SEQDAG_` namespace, are forwarded. This
//! keeps API keys and other secrets out of monitored/logged process output.

use std::collections::BTreeMap;
use std::ffi::OsString;

/// Variables forwarded verbatim when set.
pub const PASSTHROUGH_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "SHELL", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR",
    "TZ",
];

/// Prefix of variables that are always forwarded.
pub const ENV_PREFIX: &str = "SEQDAG_";

pub fn is_passthrough(name: &str) -> bool {
    PASSTHROUGH_VARS.contains(&name) || name.starts_with(ENV_PREFIX)
}

/// Keep only allowlisted variables. Names that are not UTF-8 never match;
/// values are forwarded as they are.
pub fn filter_env<I>(vars: I) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter(|(name, _)| name.to_str().is_some_and(is_passthrough))
        .collect()
}

/// The full child environment: filtered ambient variables overlaid with the
/// caller's explicit ones.
pub fn child_env(extra: &BTreeMap<String, String>) -> BTreeMap<OsString, OsString> {
    let mut env = filter_env(std::env::vars_os());
    env.extend(extra.iter().map(|(k, v)| (OsString::from(k), OsString::from(v))));
    env
}
