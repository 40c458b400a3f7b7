//! # Vantage Matchers
//!
//! Query classification and static answer sources:
//!
//! - **Domain sets**: suffix-or-exact name matching loaded from rule files
//! - **IP sets**: CIDR membership for answer validation
//! - **Message matchers**: qname / qtype / IP-in-answer predicates over a
//!   [`QueryContext`]
//! - **Static answerers**: hosts files and arbitrary record tables that
//!   synthesize authoritative replies without touching the network
//!
//! Everything here is immutable after load and safe to share across tasks
//! without synchronization.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use vantage_query::QueryContext;

pub mod arbitrary;
pub mod domain;
pub mod hosts;
pub mod msg;
pub mod netlist;

pub use arbitrary::Arbitrary;
pub use domain::DomainSet;
pub use hosts::Hosts;
pub use msg::{QNameMatcher, QTypeMatcher, ResponseIpMatcher};
pub use netlist::IpSet;

/// Errors raised while loading matcher or answerer data files.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid record data: {0}")]
    InvalidRecord(String),
}

/// Result type for matcher operations.
pub type Result<T> = std::result::Result<T, MatchError>;

/// A predicate over an in-flight query.
///
/// Matchers over questions read the question field; matchers that inspect
/// replies read the context's response slot. A failed match is reported to
/// the caller, which decides whether to treat it as non-match.
pub trait Matcher: Send + Sync {
    /// Evaluates the predicate against the query context.
    fn matches(&self, qctx: &QueryContext) -> Result<bool>;
}

pub(crate) fn read_rule_lines(path: &std::path::Path) -> Result<Vec<(usize, String)>> {
    let content = std::fs::read_to_string(path).map_err(|source| MatchError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            // Strip trailing comments and surrounding whitespace.
            let line = line.split('#').next().unwrap_or("").trim();
            (i + 1, line.to_string())
        })
        .filter(|(_, line)| !line.is_empty())
        .collect())
}
