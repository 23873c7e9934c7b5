//! Scenario Catalog
//!
//! A scenario fixes the filter shape each session subscribes with. The
//! catalog is immutable: ids map to cardinality rules at startup and never
//! change during a run.

/// How a session's subscription filter is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRule {
    /// One value, `eq` comparison, generated once at connect
    Single,
    /// `in` comparison over a fixed number of distinct values
    InSet { cardinality: usize },
    /// One value, `eq` comparison, replaced on a timer while the session
    /// is active
    PeriodicSingle,
}

/// Immutable workload definition for one benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    id: u8,
    rule: FilterRule,
    label: &'static str,
}

impl Scenario {
    /// Look up a scenario by its numeric id (1-5).
    pub fn from_id(id: u8) -> Option<Self> {
        let (rule, label) = match id {
            1 => (FilterRule::Single, "single eq filter"),
            2 => (FilterRule::PeriodicSingle, "periodic filter update"),
            3 => (FilterRule::InSet { cardinality: 10 }, "in-set of 10"),
            4 => (FilterRule::InSet { cardinality: 100 }, "in-set of 100"),
            5 => (FilterRule::InSet { cardinality: 500 }, "in-set of 500"),
            _ => return None,
        };
        Some(Self { id, rule, label })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn rule(&self) -> FilterRule {
        self.rule
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of filter values a single generation produces.
    pub fn cardinality(&self) -> usize {
        match self.rule {
            FilterRule::Single | FilterRule::PeriodicSingle => 1,
            FilterRule::InSet { cardinality } => cardinality,
        }
    }

    /// Whether sessions replace their filter on a timer.
    pub fn is_periodic(&self) -> bool {
        matches!(self.rule, FilterRule::PeriodicSingle)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scenario {} ({})", self.id, self.label)
    }
}
