//! Condition evaluator: boolean expression trees gating rule firings.
//!
//! Every evaluation yields the verdict plus a diagnostic trace, so a skipped
//! rule can always answer "why not" without re-running anything.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::rules::metric::{Metric, MetricCtx};

/// Comparison operator. `above`/`below` are accepted as aliases for the
/// strict inequalities, matching the vocabulary rule authors use for
/// pressures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = ">", alias = "above", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "below", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    #[serde(rename = "<=", alias = "le")]
    Le,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
}

impl CmpOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Gt => lhs > rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

/// Evaluation context for conditions: the metric context plus the pieces
/// only conditions need (randomness, firing history).
pub struct ConditionCtx<'a, 'r> {
    pub metrics: MetricCtx<'a>,
    pub rng: &'r mut StdRng,
    /// Tick this rule last fired, for cooldown checks.
    pub last_fired: Option<u64>,
}

/// Verdict plus a human-readable trace of what was compared.
#[derive(Debug, Clone)]
pub struct ConditionOutcome {
    pub passed: bool,
    pub trace: String,
}

impl ConditionOutcome {
    fn new(passed: bool, trace: impl Into<String>) -> Self {
        Self {
            passed,
            trace: trace.into(),
        }
    }
}

/// A boolean expression tree over pressures, counts, time, randomness, and
/// graph paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a pressure's current value.
    Pressure {
        pressure: String,
        op: CmpOp,
        value: f64,
    },
    /// Compare an entity count (kind/subtype/tag restricted).
    EntityCount {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        subtype: Option<String>,
        op: CmpOp,
        value: f64,
    },
    /// Compare a non-archived relationship count.
    RelationshipCount {
        #[serde(default)]
        kind: Option<String>,
        op: CmpOp,
        value: f64,
    },
    /// Compare any metric against a threshold.
    Metric { metric: Metric, op: CmpOp, value: f64 },
    /// World age: passes once the tick counter reaches `ticks`.
    Elapsed { ticks: u64 },
    /// Rate limit: passes when the rule has not fired in the last `ticks`.
    Cooldown { ticks: u64 },
    /// Bernoulli draw from the run's single RNG stream.
    RandomChance { probability: f64 },
    /// Graph-path assertion from a bound entity: existence when `op` is
    /// absent, reachable-count comparison when present.
    GraphPath {
        from: String,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default = "default_max_hops")]
        max_hops: usize,
        #[serde(default)]
        op: Option<CmpOp>,
        #[serde(default)]
        value: Option<f64>,
    },
    And { all: Vec<Condition> },
    Or { any: Vec<Condition> },
    Not { condition: Box<Condition> },
    Always,
}

fn default_max_hops() -> usize {
    3
}

impl Condition {
    pub fn eval(&self, ctx: &mut ConditionCtx<'_, '_>) -> ConditionOutcome {
        match self {
            Condition::Pressure {
                pressure,
                op,
                value,
            } => {
                let current = ctx.metrics.pressures.get(pressure).copied().unwrap_or(0.0);
                ConditionOutcome::new(
                    op.apply(current, *value),
                    format!("pressure {pressure}={current:.1} {} {value}", op.symbol()),
                )
            }
            Condition::EntityCount {
                kind,
                subtype,
                op,
                value,
            } => {
                let count = Metric::EntityCount {
                    kind: kind.clone(),
                    subtype: subtype.clone(),
                    tag: None,
                }
                .eval(&ctx.metrics);
                let label = kind.as_deref().unwrap_or("*");
                ConditionOutcome::new(
                    op.apply(count, *value),
                    format!("entity_count({label})={count} {} {value}", op.symbol()),
                )
            }
            Condition::RelationshipCount { kind, op, value } => {
                let count = Metric::RelationshipCount { kind: kind.clone() }.eval(&ctx.metrics);
                let label = kind.as_deref().unwrap_or("*");
                ConditionOutcome::new(
                    op.apply(count, *value),
                    format!("relationship_count({label})={count} {} {value}", op.symbol()),
                )
            }
            Condition::Metric { metric, op, value } => {
                let current = metric.eval(&ctx.metrics);
                ConditionOutcome::new(
                    op.apply(current, *value),
                    format!("metric={current:.3} {} {value}", op.symbol()),
                )
            }
            Condition::Elapsed { ticks } => ConditionOutcome::new(
                ctx.metrics.tick >= *ticks,
                format!("elapsed tick {} >= {ticks}", ctx.metrics.tick),
            ),
            Condition::Cooldown { ticks } => match ctx.last_fired {
                None => ConditionOutcome::new(true, "cooldown: never fired"),
                Some(last) => {
                    let since = ctx.metrics.tick.saturating_sub(last);
                    ConditionOutcome::new(
                        since >= *ticks,
                        format!("cooldown {since}/{ticks} ticks since last firing"),
                    )
                }
            },
            Condition::RandomChance { probability } => {
                let roll: f64 = ctx.rng.r#gen();
                ConditionOutcome::new(
                    roll < *probability,
                    format!("random {roll:.3} < {probability}"),
                )
            }
            Condition::GraphPath {
                from,
                kind,
                max_hops,
                op,
                value,
            } => {
                let Some(start) = ctx.metrics.bindings.first(from) else {
                    return ConditionOutcome::new(false, format!("graph_path: ${from} unbound"));
                };
                let reached = ctx
                    .metrics
                    .store
                    .reachable_within(start, *max_hops, kind.as_deref());
                match (op, value) {
                    (Some(op), Some(value)) => ConditionOutcome::new(
                        op.apply(reached.len() as f64, *value),
                        format!(
                            "graph_path from ${from}: {} reached {} {value}",
                            reached.len(),
                            op.symbol()
                        ),
                    ),
                    _ => ConditionOutcome::new(
                        !reached.is_empty(),
                        format!("graph_path from ${from}: {} reached", reached.len()),
                    ),
                }
            }
            Condition::And { all } => {
                for (i, c) in all.iter().enumerate() {
                    let outcome = c.eval(ctx);
                    if !outcome.passed {
                        return ConditionOutcome::new(
                            false,
                            format!("and[{i}] failed: {}", outcome.trace),
                        );
                    }
                }
                ConditionOutcome::new(true, format!("and: all {} passed", all.len()))
            }
            Condition::Or { any } => {
                for (i, c) in any.iter().enumerate() {
                    let outcome = c.eval(ctx);
                    if outcome.passed {
                        return ConditionOutcome::new(
                            true,
                            format!("or[{i}] passed: {}", outcome.trace),
                        );
                    }
                }
                ConditionOutcome::new(false, format!("or: none of {} passed", any.len()))
            }
            Condition::Not { condition } => {
                let inner = condition.eval(ctx);
                ConditionOutcome::new(!inner.passed, format!("not({})", inner.trace))
            }
            Condition::Always => ConditionOutcome::new(true, "always"),
        }
    }
}
