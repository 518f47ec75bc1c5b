//! Saturation ceilings per (kind, subtype).
//!
//! Lookup is two-step with an explicit result: the subtype registry takes
//! precedence, falling back to the kind registry is logged, and a pair with
//! no registration passes through unchecked — each path is observable so
//! tests assert which one was taken rather than inferring it from effects.

use tracing::debug;

use crate::graph::GraphStore;
use crate::rules::SaturationLimit;

/// Which registry answered a saturation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationLookup {
    /// A (kind, subtype) limit matched exactly.
    Subtype,
    /// No subtype entry; the kind-level limit applied.
    Kind,
    /// Neither registry knows the pair; creation passes unchecked.
    Unregistered,
}

/// The decision for one creation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationDecision {
    pub lookup: SaturationLookup,
    /// Effective ceiling after tolerance, when a limit applied.
    pub ceiling: Option<usize>,
    pub current: usize,
    pub blocked: bool,
}

/// World-level saturation limits, checked before every creation in addition
/// to any per-rule limits the rule's own contract carries.
#[derive(Debug, Clone, Default)]
pub struct SaturationRegistry {
    limits: Vec<SaturationLimit>,
}

impl SaturationRegistry {
    pub fn new(limits: Vec<SaturationLimit>) -> Self {
        Self { limits }
    }

    fn find(&self, kind: &str, subtype: Option<&str>) -> (SaturationLookup, Option<&SaturationLimit>) {
        if let Some(sub) = subtype {
            if let Some(limit) = self
                .limits
                .iter()
                .find(|l| l.kind == kind && l.subtype.as_deref() == Some(sub))
            {
                return (SaturationLookup::Subtype, Some(limit));
            }
        }
        if let Some(limit) = self
            .limits
            .iter()
            .find(|l| l.kind == kind && l.subtype.is_none())
        {
            if subtype.is_some() {
                debug!(kind, ?subtype, "no subtype limit, falling back to kind limit");
            }
            return (SaturationLookup::Kind, Some(limit));
        }
        debug!(kind, ?subtype, "no saturation registry entry, passing through");
        (SaturationLookup::Unregistered, None)
    }

    /// Decide whether creating `additional` entities of (kind, subtype)
    /// would exceed the applicable ceiling. Tolerance widens the ceiling by
    /// its fraction, rounded down.
    pub fn check(
        &self,
        store: &GraphStore,
        kind: &str,
        subtype: Option<&str>,
        additional: usize,
    ) -> SaturationDecision {
        let (lookup, limit) = self.find(kind, subtype);
        let current = match lookup {
            // kind-level limits count the whole kind, not just this subtype
            SaturationLookup::Subtype => store.count_kind_subtype(kind, subtype),
            _ => store.count_kind_subtype(kind, None),
        };
        match limit {
            None => SaturationDecision {
                lookup,
                ceiling: None,
                current,
                blocked: false,
            },
            Some(limit) => {
                let ceiling =
                    (limit.ceiling as f64 * (1.0 + limit.tolerance.max(0.0))).floor() as usize;
                SaturationDecision {
                    lookup,
                    ceiling: Some(ceiling),
                    current,
                    blocked: current + additional > ceiling,
                }
            }
        }
    }

    /// Check a rule's own saturation limits against the store, returning the
    /// first limit that would be exceeded.
    pub fn check_rule_limits<'a>(
        store: &GraphStore,
        limits: &'a [SaturationLimit],
        kind: &str,
        subtype: Option<&str>,
        additional: usize,
    ) -> Option<&'a SaturationLimit> {
        limits.iter().find(|l| {
            if l.kind != kind {
                return false;
            }
            if l.subtype.is_some() && l.subtype.as_deref() != subtype {
                return false;
            }
            let current = store.count_kind_subtype(&l.kind, l.subtype.as_deref());
            let ceiling = (l.ceiling as f64 * (1.0 + l.tolerance.max(0.0))).floor() as usize;
            current + additional > ceiling
        })
    }
}
