// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Parsing helpers for the string-typed settings the data bus is wired with.
//!
//! Deployments hand the bus its topology through flat strings: boolean flags
//! such as `DEV_MODE`, comma-separated peer lists such as `Clients`, and
//! per-topic transport directives such as `results_cfg = "zmq_tcp, 127.0.0.1:65013"`.
//! Everything here is pure string handling so the runtime can feed it either
//! from the process environment or from an explicit configuration struct.

use std::collections::HashMap;

/// Suffix of the environment variables that carry a topic's transport directive.
pub const TOPIC_CFG_SUFFIX: &str = "_cfg";

/// Check if a string is truthy.
///
/// Truthy values: "1", "true", "on", "yes" (case-insensitive)
pub fn is_truthy(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Check if a string is falsey.
///
/// Falsey values: "0", "false", "off", "no" (case-insensitive)
pub fn is_falsey(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no")
}

/// Parse a string as a boolean value, returning an error if invalid.
///
/// ```ignore
/// assert_eq!(parse_bool("true")?, true);
/// assert_eq!(parse_bool("0")?, false);
/// assert!(parse_bool("maybe").is_err());
/// ```
pub fn parse_bool(val: &str) -> anyhow::Result<bool> {
    if is_truthy(val) {
        Ok(true)
    } else if is_falsey(val) {
        Ok(false)
    } else {
        anyhow::bail!(
            "Invalid boolean value: '{}'. Expected one of: true/false, 1/0, on/off, yes/no",
            val
        )
    }
}

/// Check if an environment variable is truthy. Unset or invalid reads as `false`.
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Parse an environment variable as a boolean.
///
/// * `Ok(Some(_))` - the variable is set to a valid boolean
/// * `Ok(None)` - the variable is not set
/// * `Err(_)` - the variable is set to something else
pub fn env_parse_bool(env: &str) -> anyhow::Result<Option<bool>> {
    match std::env::var(env) {
        Ok(val) => parse_bool(&val).map(Some),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => anyhow::bail!("Failed to read environment variable {}: {}", env, e),
    }
}

/// Split a comma-separated list, trimming whitespace and dropping empty entries.
///
/// `"svcA, svcB,,"` becomes `["svcA", "svcB"]`.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read an environment variable as a comma-separated list. Unset reads as empty.
pub fn env_list(env: &str) -> Vec<String> {
    std::env::var(env)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}

/// Name of the variable holding the transport directive for `topic`.
pub fn topic_cfg_key(topic: &str) -> String {
    format!("{topic}{TOPIC_CFG_SUFFIX}")
}

/// Collect every `<topic>_cfg` entry from a set of variables, keyed by topic name.
pub fn collect_topic_directives<I, K, V>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    vars.into_iter()
        .filter_map(|(k, v)| {
            let topic = k.as_ref().strip_suffix(TOPIC_CFG_SUFFIX)?;
            if topic.is_empty() {
                return None;
            }
            Some((topic.to_string(), v.as_ref().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("True"));
        assert!(is_truthy(" yes "));
        assert!(is_truthy("ON"));

        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("random"));
    }

    #[test]
    fn test_is_falsey() {
        assert!(is_falsey("0"));
        assert!(is_falsey("FALSE"));
        assert!(is_falsey("no"));

        assert!(!is_falsey("1"));
        assert!(!is_falsey(""));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("").is_err());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_env_parse_bool_not_set() {
        assert_eq!(
            env_parse_bool("DEFINITELY_NOT_SET_VAR_12345").unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("svcA,svcB"), vec!["svcA", "svcB"]);
        assert_eq!(parse_list(" svcA , svcB ,, "), vec!["svcA", "svcB"]);
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn test_env_list_not_set() {
        assert!(env_list("DEFINITELY_NOT_SET_VAR_12345").is_empty());
    }

    #[test]
    fn test_collect_topic_directives() {
        let vars = vec![
            ("results_cfg", "zmq_tcp, 127.0.0.1:65013"),
            ("camera1_stream_cfg", "zmq_ipc, /EII/sockets"),
            ("_cfg", "ignored"),
            ("AppName", "VideoAnalytics"),
        ];
        let directives = collect_topic_directives(vars);
        assert_eq!(directives.len(), 2);
        assert_eq!(directives["results"], "zmq_tcp, 127.0.0.1:65013");
        assert_eq!(directives["camera1_stream"], "zmq_ipc, /EII/sockets");
        assert_eq!(topic_cfg_key("results"), "results_cfg");
    }
}
