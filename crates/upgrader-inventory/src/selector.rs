//! Selector compilation and the `key=value` string syntax used by the CLI.
//!
//! Predicates are full-match regexes: `eu-.*` matches `eu-west-1` but not
//! `xeu-west-1`. An absent or empty predicate matches anything.

use regex::Regex;
use upgrader_state::{Runtime, RuntimeMatcher, TargetSelector};

use crate::error::{ResolveError, ResolveResult};

/// A [`TargetSelector`] with its regexes compiled.
#[derive(Debug, Clone)]
pub enum CompiledSelector {
    All,
    Match {
        global_account: Option<Regex>,
        sub_account: Option<Regex>,
        region: Option<Regex>,
        runtime_id: Option<Regex>,
    },
}

fn compile_predicate(field: &str, pattern: &Option<String>) -> ResolveResult<Option<Regex>> {
    match pattern.as_deref() {
        None | Some("") => Ok(None),
        Some(pattern) => Regex::new(&format!("^(?:{pattern})$"))
            .map(Some)
            .map_err(|e| ResolveError::InvalidSelector(format!("{field}={pattern}: {e}"))),
    }
}

fn check(predicate: &Option<Regex>, value: &str) -> bool {
    predicate.as_ref().is_none_or(|re| re.is_match(value))
}

impl CompiledSelector {
    pub fn compile(selector: &TargetSelector) -> ResolveResult<Self> {
        match selector {
            TargetSelector::All => Ok(Self::All),
            TargetSelector::Match(m) => Ok(Self::Match {
                global_account: compile_predicate("globalAccount", &m.global_account)?,
                sub_account: compile_predicate("subAccount", &m.sub_account)?,
                region: compile_predicate("region", &m.region)?,
                runtime_id: compile_predicate("runtimeID", &m.runtime_id)?,
            }),
        }
    }

    /// Whether `runtime` satisfies every present predicate. Eligibility
    /// (runtime state) is the resolver's concern, not the selector's.
    pub fn matches(&self, runtime: &Runtime) -> bool {
        match self {
            Self::All => true,
            Self::Match {
                global_account,
                sub_account,
                region,
                runtime_id,
            } => {
                check(global_account, &runtime.global_account_id)
                    && check(sub_account, &runtime.sub_account_id)
                    && check(region, &runtime.region)
                    && check(runtime_id, &runtime.runtime_id)
            }
        }
    }
}

// ── String syntax ──────────────────────────────────────────────────

pub const SELECTOR_ALL: &str = "all";
pub const SELECTOR_ACCOUNT: &str = "account";
pub const SELECTOR_SUBACCOUNT: &str = "subaccount";
pub const SELECTOR_REGION: &str = "region";
pub const SELECTOR_RUNTIME_ID: &str = "runtime-id";

/// Parse one `--target` / `--target-exclude` value.
///
/// The input is a comma-separated list of `all`, `account=<REGEX>`,
/// `subaccount=<REGEX>`, `region=<REGEX>` and `runtime-id=<ID>`. The
/// pieces of one value form a conjunction. `all` wins over any predicate in
/// the same value and is rejected for excludes. A runtime id is taken
/// literally.
pub fn parse_selector(input: &str, include: bool) -> ResolveResult<TargetSelector> {
    let flag = if include { "--target" } else { "--target-exclude" };
    let mut matcher = RuntimeMatcher::default();
    let mut all = false;

    for part in input.split(',') {
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (part.trim(), ""),
        };
        if key == SELECTOR_ALL {
            if !include {
                return Err(ResolveError::ExcludeAll);
            }
            all = true;
            continue;
        }
        let slot = match key {
            SELECTOR_ACCOUNT => &mut matcher.global_account,
            SELECTOR_SUBACCOUNT => &mut matcher.sub_account,
            SELECTOR_REGION => &mut matcher.region,
            SELECTOR_RUNTIME_ID => &mut matcher.runtime_id,
            _ => {
                return Err(ResolveError::InvalidSelector(format!(
                    "{flag} {key}: unknown selector"
                )));
            }
        };
        if value.is_empty() {
            return Err(ResolveError::InvalidSelector(format!(
                "{flag} {key} is missing required value ({flag} {key}=<VALUE>)"
            )));
        }
        *slot = Some(if key == SELECTOR_RUNTIME_ID {
            regex::escape(value)
        } else {
            value.to_string()
        });
    }

    let selector = if all {
        TargetSelector::All
    } else {
        TargetSelector::Match(matcher)
    };
    // Surface regex errors at parse time rather than at submit time.
    CompiledSelector::compile(&selector)?;
    Ok(selector)
}
