//! The taint lattice and per-expression analysis values.
//!
//! A [`TaintSet`] is a canonical map from provenance (which variable the
//! taint came from, if any) to the strongest level observed for it.
//! Merge takes the maximum per matching provenance and unions the rest,
//! which makes it commutative, associative, and idempotent — the
//! properties the fixpoint driver relies on. Sets are value objects:
//! every operation returns a new set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Vulnerability kinds tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintKind {
    Sql,
    Xss,
}

impl TaintKind {
    pub const ALL: [TaintKind; 2] = [TaintKind::Sql, TaintKind::Xss];
}

impl fmt::Display for TaintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintKind::Sql => write!(f, "SQL injection"),
            TaintKind::Xss => write!(f, "XSS"),
        }
    }
}

/// Ordered taint tag. `PartiallyQuoted` marks data that passed through
/// a quoting-dependent escape and is only dangerous outside quotes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaintLevel {
    #[default]
    Untainted,
    PartiallyQuoted,
    Tainted,
}

/// Where a taint entry came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// No single originating variable (literal mixing, opaque values).
    Unattributed,
    /// The named variable the value was read from.
    Var(String),
}

/// Taint for one vulnerability kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaintSet {
    // Untainted entries are never stored; the map is canonical so
    // structural equality is lattice equality.
    entries: BTreeMap<Provenance, TaintLevel>,
}

impl TaintSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fully tainted with no attributable origin.
    pub fn tainted() -> Self {
        Self::single(Provenance::Unattributed, TaintLevel::Tainted)
    }

    pub fn single(provenance: Provenance, level: TaintLevel) -> Self {
        let mut entries = BTreeMap::new();
        if level > TaintLevel::Untainted {
            entries.insert(provenance, level);
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Strongest tag in the set.
    pub fn level(&self) -> TaintLevel {
        self.entries.values().copied().max().unwrap_or(TaintLevel::Untainted)
    }

    /// Whether data from this set reaching a sink is a finding.
    pub fn is_tainted(&self) -> bool {
        self.level() == TaintLevel::Tainted
    }

    /// Lattice join: maximum per matching provenance, union otherwise.
    pub fn merge(&self, other: &TaintSet) -> TaintSet {
        let mut entries = self.entries.clone();
        for (prov, &level) in &other.entries {
            entries
                .entry(prov.clone())
                .and_modify(|cur| *cur = (*cur).max(level))
                .or_insert(level);
        }
        TaintSet { entries }
    }

    /// Collapse to a single entry attributed to `name`, keeping the
    /// strongest level. Used when a variable read records itself as the
    /// origin of whatever it held.
    pub fn attributed_to(&self, name: &str) -> TaintSet {
        Self::single(Provenance::Var(name.to_string()), self.level())
    }

    /// Cap every entry at `level`, dropping entries that fall to
    /// `Untainted`. `capped(Untainted)` is full sanitization.
    pub fn capped(&self, level: TaintLevel) -> TaintSet {
        let entries = self
            .entries
            .iter()
            .map(|(p, &l)| (p.clone(), l.min(level)))
            .filter(|&(_, l)| l > TaintLevel::Untainted)
            .collect();
        TaintSet { entries }
    }

    /// Originating variable names, strongest first then lexicographic.
    pub fn origins(&self) -> Vec<&str> {
        let mut named: Vec<(&str, TaintLevel)> = self
            .entries
            .iter()
            .filter_map(|(p, &l)| match p {
                Provenance::Var(name) => Some((name.as_str(), l)),
                Provenance::Unattributed => None,
            })
            .collect();
        named.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        named.into_iter().map(|(n, _)| n).collect()
    }
}

/// The per-value taint pair: one set per tracked kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaintSets {
    pub sql: TaintSet,
    pub xss: TaintSet,
}

impl TaintSets {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fully tainted for every kind — the conservative default for
    /// unknown values.
    pub fn tainted() -> Self {
        Self { sql: TaintSet::tainted(), xss: TaintSet::tainted() }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.xss.is_empty()
    }

    pub fn get(&self, kind: TaintKind) -> &TaintSet {
        match kind {
            TaintKind::Sql => &self.sql,
            TaintKind::Xss => &self.xss,
        }
    }

    pub fn merge(&self, other: &TaintSets) -> TaintSets {
        TaintSets {
            sql: self.sql.merge(&other.sql),
            xss: self.xss.merge(&other.xss),
        }
    }

    pub fn attributed_to(&self, name: &str) -> TaintSets {
        TaintSets {
            sql: self.sql.attributed_to(name),
            xss: self.xss.attributed_to(name),
        }
    }

    /// Zero out one kind (a sanitizer for that kind ran).
    pub fn sanitized(&self, kind: TaintKind) -> TaintSets {
        let mut out = self.clone();
        match kind {
            TaintKind::Sql => out.sql = TaintSet::empty(),
            TaintKind::Xss => out.xss = TaintSet::empty(),
        }
        out
    }

    /// Cap one kind at `level`.
    pub fn capped(&self, kind: TaintKind, level: TaintLevel) -> TaintSets {
        let mut out = self.clone();
        match kind {
            TaintKind::Sql => out.sql = out.sql.capped(level),
            TaintKind::Xss => out.xss = out.xss.capped(level),
        }
        out
    }
}

/// A scalar value known at analysis time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl ScalarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Taint that may have been written to persistent storage and read
/// back: carried on values produced by storage-read calls so a later
/// sink can be correlated with the write site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTaint {
    /// Storage channel (option name, meta key, ...).
    pub channel: String,
    /// The reading function that produced the value.
    pub origin: String,
}

/// Everything the transfer functions know about one evaluated
/// expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpressionInfo {
    pub taints: TaintSets,
    /// Present when the value came back from persistent storage.
    pub stored: Option<StoredTaint>,
    /// Statically known scalar value, when there is one.
    pub value: Option<ScalarValue>,
    /// Candidate class names, for values holding objects.
    pub classes: Vec<String>,
}

impl ExpressionInfo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_taints(taints: TaintSets) -> Self {
        Self { taints, ..Self::default() }
    }

    /// Conservative result for values the analysis cannot see through.
    pub fn opaque() -> Self {
        Self::with_taints(TaintSets::tainted())
    }

    pub fn literal(value: ScalarValue) -> Self {
        Self { value: Some(value), ..Self::default() }
    }

    /// Join two expression results: taints merge, agreement on
    /// value/stored survives, disagreement degrades to unknown.
    pub fn merge(&self, other: &ExpressionInfo) -> ExpressionInfo {
        ExpressionInfo {
            taints: self.taints.merge(&other.taints),
            stored: match (&self.stored, &other.stored) {
                (Some(a), Some(b)) if a == b => Some(a.clone()),
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(b.clone()),
                _ => None,
            },
            value: match (&self.value, &other.value) {
                (Some(a), Some(b)) if a == b => Some(a.clone()),
                _ => None,
            },
            classes: {
                let mut classes = self.classes.clone();
                for c in &other.classes {
                    if !classes.contains(c) {
                        classes.push(c.clone());
                    }
                }
                classes
            },
        }
    }
}
