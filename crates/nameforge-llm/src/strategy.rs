//! Router strategies turn the registered providers into an ordered candidate list.
//!
//! Every variant shares one rule: a `preferred` provider that is available is
//! always tried first. Priority, weighted and capability ordering are pure
//! functions of their inputs; round-robin carries a rotation cursor between
//! calls behind a mutex.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::RouterSettings;
use crate::{ProviderInfo, RoutingContext};

/// Priority used when the configuration does not name one.
pub const DEFAULT_PRIORITY: &[&str] = &[
    "aistudio",
    "aliyun",
    "siliconflow",
    "paiou",
    "openai",
    "gemini",
];

// ---------------------------------------------------------------------------
// RouterStrategy
// ---------------------------------------------------------------------------

pub trait RouterStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate order over `available`. Empty input yields an empty list.
    fn order(
        &self,
        available: &[ProviderInfo],
        preferred: Option<&str>,
        context: &RoutingContext,
    ) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Shared ordering helpers
// ---------------------------------------------------------------------------

/// Provider names in registration order, duplicates dropped.
fn unique_names(available: &[ProviderInfo]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    available
        .iter()
        .map(|p| p.name.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Names listed in `priority` first (in priority order), then the rest in the
/// order they were given.
fn priority_order(names: &[&str], priority: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(names.len());
    for listed in priority {
        if names.contains(&listed.as_str()) && !ordered.contains(listed) {
            ordered.push(listed.clone());
        }
    }
    for name in names {
        if !ordered.iter().any(|o| o == name) {
            ordered.push((*name).to_string());
        }
    }
    ordered
}

/// Moves `preferred` to the front if it is present.
fn promote(mut order: Vec<String>, preferred: Option<&str>) -> Vec<String> {
    if let Some(preferred) = preferred {
        if let Some(pos) = order.iter().position(|name| name == preferred) {
            let name = order.remove(pos);
            order.insert(0, name);
        }
    }
    order
}

fn owned(priority: &[&str]) -> Vec<String> {
    priority.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// PriorityStrategy
// ---------------------------------------------------------------------------

/// Fixed priority list, then unlisted providers in registration order.
#[derive(Debug, Clone)]
pub struct PriorityStrategy {
    priority: Vec<String>,
}

impl PriorityStrategy {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }
}

impl Default for PriorityStrategy {
    fn default() -> Self {
        Self::new(owned(DEFAULT_PRIORITY))
    }
}

impl RouterStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn order(
        &self,
        available: &[ProviderInfo],
        preferred: Option<&str>,
        _context: &RoutingContext,
    ) -> Vec<String> {
        let names = unique_names(available);
        promote(priority_order(&names, &self.priority), preferred)
    }
}

// ---------------------------------------------------------------------------
// WeightedStrategy
// ---------------------------------------------------------------------------

/// Descending weight; ties by priority position, then by name.
#[derive(Debug, Clone)]
pub struct WeightedStrategy {
    priority: Vec<String>,
    weights: BTreeMap<String, f64>,
}

impl WeightedStrategy {
    pub fn new(priority: Vec<String>, weights: BTreeMap<String, f64>) -> Self {
        Self { priority, weights }
    }

    fn weight_of(&self, name: &str) -> f64 {
        self.weights
            .get(name)
            .copied()
            .filter(|w| w.is_finite())
            .unwrap_or(0.0)
    }

    fn rank_of(&self, name: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == name)
            .unwrap_or(self.priority.len())
    }
}

impl RouterStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn order(
        &self,
        available: &[ProviderInfo],
        preferred: Option<&str>,
        _context: &RoutingContext,
    ) -> Vec<String> {
        let mut ordered: Vec<String> = unique_names(available)
            .into_iter()
            .map(String::from)
            .collect();
        ordered.sort_by(|a, b| {
            self.weight_of(b)
                .total_cmp(&self.weight_of(a))
                .then_with(|| self.rank_of(a).cmp(&self.rank_of(b)))
                .then_with(|| a.cmp(b))
        });
        promote(ordered, preferred)
    }
}

// ---------------------------------------------------------------------------
// RoundRobinStrategy
// ---------------------------------------------------------------------------

/// Base order plus the cursor of the provider that goes first next time.
#[derive(Debug, Default)]
struct RotationState {
    order: Vec<String>,
    index: usize,
}

impl RotationState {
    fn same_members(&self, names: &[&str]) -> bool {
        let current: BTreeSet<&str> = self.order.iter().map(String::as_str).collect();
        let incoming: BTreeSet<&str> = names.iter().copied().collect();
        current == incoming
    }

    /// Replaces the base order after the member set changed. The cursor moves
    /// one step and wraps into the new size.
    fn rebuild(&mut self, base: Vec<String>) {
        let first_build = self.order.is_empty();
        self.order = base;
        self.index = if first_build || self.order.is_empty() {
            0
        } else {
            (self.index + 1) % self.order.len()
        };
    }

    /// `order[index..] ++ order[..index]`, optionally moving the cursor on.
    fn rotate(&mut self, advance: bool) -> Vec<String> {
        if self.order.is_empty() {
            return Vec::new();
        }
        let start = self.index % self.order.len();
        if advance {
            self.index = (start + 1) % self.order.len();
        }
        let mut rotated = Vec::with_capacity(self.order.len());
        rotated.extend_from_slice(&self.order[start..]);
        rotated.extend_from_slice(&self.order[..start]);
        rotated
    }
}

/// Rotates the priority ordering by one position per request.
///
/// The check-rebuild-rotate sequence runs under a single lock, so concurrent
/// callers each observe a distinct rotation. Requests that name a preferred
/// provider see the current rotation without consuming a turn.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    priority: Vec<String>,
    state: Mutex<RotationState>,
}

impl RoundRobinStrategy {
    pub fn new(priority: Vec<String>) -> Self {
        Self {
            priority,
            state: Mutex::new(RotationState::default()),
        }
    }
}

impl RouterStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn order(
        &self,
        available: &[ProviderInfo],
        preferred: Option<&str>,
        _context: &RoutingContext,
    ) -> Vec<String> {
        let names = unique_names(available);
        if names.is_empty() {
            return Vec::new();
        }
        let has_preferred = preferred.map_or(false, |p| names.contains(&p));

        let rotated = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.same_members(&names) {
                state.rebuild(priority_order(&names, &self.priority));
                tracing::debug!(order = ?state.order, index = state.index, "Rebuilt round-robin rotation");
            }
            state.rotate(!has_preferred)
        };

        promote(rotated, preferred)
    }
}

// ---------------------------------------------------------------------------
// CapabilityStrategy
// ---------------------------------------------------------------------------

/// Honors `avoid` and `needs_streaming` from the routing context.
///
/// Avoided providers are dropped unless that would leave nothing. A preferred
/// provider is kept (and goes first) even when it is in the avoid set.
#[derive(Debug, Clone)]
pub struct CapabilityStrategy {
    priority: Vec<String>,
}

impl CapabilityStrategy {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }
}

impl RouterStrategy for CapabilityStrategy {
    fn name(&self) -> &'static str {
        "capability"
    }

    fn order(
        &self,
        available: &[ProviderInfo],
        preferred: Option<&str>,
        context: &RoutingContext,
    ) -> Vec<String> {
        let names = unique_names(available);
        if names.is_empty() {
            return Vec::new();
        }

        let kept: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !context.avoid.contains(*name))
            .collect();
        let filtered = if kept.is_empty() { names.clone() } else { kept };

        let mut ordered = if context.needs_streaming {
            let streams = |name: &str| {
                available
                    .iter()
                    .any(|p| p.name == name && p.supports_streaming)
            };
            let (streaming, plain): (Vec<&str>, Vec<&str>) =
                filtered.into_iter().partition(|name| streams(name));
            let mut ordered = priority_order(&streaming, &self.priority);
            ordered.extend(priority_order(&plain, &self.priority));
            ordered
        } else {
            priority_order(&filtered, &self.priority)
        };

        if let Some(preferred) = preferred {
            if names.contains(&preferred) && !ordered.iter().any(|n| n == preferred) {
                ordered.insert(0, preferred.to_string());
            }
        }
        promote(ordered, preferred)
    }
}

// ---------------------------------------------------------------------------
// StrategyKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Priority,
    Weighted,
    #[serde(alias = "roundrobin")]
    RoundRobin,
    Capability,
}

impl StrategyKind {
    /// Lenient, case-insensitive parse. Unknown names fall back to priority.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "priority" => StrategyKind::Priority,
            "weighted" => StrategyKind::Weighted,
            "round_robin" | "roundrobin" => StrategyKind::RoundRobin,
            "capability" => StrategyKind::Capability,
            other => {
                tracing::warn!(strategy = other, "Unknown router strategy, using priority");
                StrategyKind::Priority
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Priority => "priority",
            StrategyKind::Weighted => "weighted",
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Capability => "capability",
        }
    }

    pub fn build(
        self,
        priority: Vec<String>,
        weights: BTreeMap<String, f64>,
    ) -> Arc<dyn RouterStrategy> {
        match self {
            StrategyKind::Priority => Arc::new(PriorityStrategy::new(priority)),
            StrategyKind::Weighted => Arc::new(WeightedStrategy::new(priority, weights)),
            StrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new(priority)),
            StrategyKind::Capability => Arc::new(CapabilityStrategy::new(priority)),
        }
    }
}

pub fn from_settings(settings: &RouterSettings) -> Arc<dyn RouterStrategy> {
    settings
        .strategy
        .build(settings.priority.clone(), settings.weights.clone())
}

/// Parses `"a=2,b:1.5"`. Entries without a separator or a numeric weight are skipped.
pub fn parse_weights(raw: &str) -> BTreeMap<String, f64> {
    raw.split(',')
        .filter_map(|item| {
            let (name, value) = item.split_once('=').or_else(|| item.split_once(':'))?;
            let name = name.trim();
            let weight: f64 = value.trim().parse().ok()?;
            (!name.is_empty() && weight.is_finite()).then(|| (name.to_string(), weight))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn providers(names: &[&str]) -> Vec<ProviderInfo> {
        names.iter().map(|n| ProviderInfo::new(*n)).collect()
    }

    fn priority(names: &[&str]) -> Vec<String> {
        owned(names)
    }

    fn all_variants() -> Vec<Arc<dyn RouterStrategy>> {
        let order = priority(&["c", "a"]);
        let mut weights = BTreeMap::new();
        weights.insert("b".to_string(), 5.0);
        vec![
            StrategyKind::Priority.build(order.clone(), weights.clone()),
            StrategyKind::Weighted.build(order.clone(), weights.clone()),
            StrategyKind::RoundRobin.build(order.clone(), weights.clone()),
            StrategyKind::Capability.build(order, weights),
        ]
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    // --- shared properties ---

    #[test]
    fn every_variant_puts_preferred_first() {
        let available = providers(&["a", "b", "c", "d"]);
        for strategy in all_variants() {
            for preferred in ["a", "b", "c", "d"] {
                let order = strategy.order(&available, Some(preferred), &RoutingContext::new());
                assert_eq!(order[0], preferred, "strategy {}", strategy.name());
            }
        }
    }

    #[test]
    fn every_variant_returns_a_permutation() {
        let available = providers(&["a", "b", "c", "d"]);
        for strategy in all_variants() {
            for preferred in [None, Some("d"), Some("unknown")] {
                let order = strategy.order(&available, preferred, &RoutingContext::new());
                assert_eq!(
                    sorted(order),
                    vec!["a", "b", "c", "d"],
                    "strategy {}",
                    strategy.name()
                );
            }
        }
    }

    #[test]
    fn every_variant_returns_empty_for_no_providers() {
        for strategy in all_variants() {
            assert!(strategy
                .order(&[], Some("a"), &RoutingContext::new())
                .is_empty());
        }
    }

    #[test]
    fn unknown_preferred_is_ignored() {
        let strategy = PriorityStrategy::new(priority(&["b"]));
        let order = strategy.order(&providers(&["a", "b"]), Some("zzz"), &RoutingContext::new());
        assert_eq!(order, vec!["b", "a"]);
    }

    // --- priority ---

    #[test]
    fn priority_lists_configured_then_registration_order() {
        let strategy = PriorityStrategy::new(priority(&["siliconflow", "ghost", "aliyun"]));
        let available = providers(&["openai", "aliyun", "gemini", "siliconflow"]);
        let order = strategy.order(&available, None, &RoutingContext::new());
        assert_eq!(order, vec!["siliconflow", "aliyun", "openai", "gemini"]);
    }

    #[test]
    fn priority_remainder_keeps_priority_after_preferred() {
        let strategy = PriorityStrategy::new(priority(&["a", "b", "c"]));
        let order = strategy.order(&providers(&["c", "b", "a"]), Some("c"), &RoutingContext::new());
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn priority_list_duplicates_do_not_duplicate_output() {
        let strategy = PriorityStrategy::new(priority(&["a", "a", "b"]));
        let order = strategy.order(&providers(&["b", "a"]), None, &RoutingContext::new());
        assert_eq!(order, vec!["a", "b"]);
    }

    // --- weighted ---

    #[test]
    fn weighted_sorts_by_weight_then_priority_then_name() {
        let mut weights = BTreeMap::new();
        weights.insert("zeta".to_string(), 2.0);
        weights.insert("beta".to_string(), 1.0);
        weights.insert("alpha".to_string(), 1.0);
        let strategy = WeightedStrategy::new(priority(&["beta"]), weights);

        let available = providers(&["gamma", "alpha", "beta", "zeta", "delta"]);
        let order = strategy.order(&available, None, &RoutingContext::new());
        // zeta (2.0); beta vs alpha tie on 1.0, beta is listed; gamma/delta weigh 0, by name.
        assert_eq!(order, vec!["zeta", "beta", "alpha", "delta", "gamma"]);
    }

    #[test]
    fn weighted_treats_non_finite_weight_as_zero() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), f64::NAN);
        weights.insert("b".to_string(), 0.5);
        let strategy = WeightedStrategy::new(vec![], weights);
        let order = strategy.order(&providers(&["a", "b"]), None, &RoutingContext::new());
        assert_eq!(order, vec!["b", "a"]);
    }

    // --- round robin ---

    #[test]
    fn round_robin_each_provider_leads_once_per_cycle() {
        let strategy = RoundRobinStrategy::new(priority(&["a", "b", "c"]));
        let available = providers(&["c", "b", "a"]);

        let orders: Vec<Vec<String>> = (0..3)
            .map(|_| strategy.order(&available, None, &RoutingContext::new()))
            .collect();

        assert_eq!(orders[0], vec!["a", "b", "c"]);
        assert_eq!(orders[1], vec!["b", "c", "a"]);
        assert_eq!(orders[2], vec!["c", "a", "b"]);

        // Next cycle starts over.
        let again = strategy.order(&available, None, &RoutingContext::new());
        assert_eq!(again, vec!["a", "b", "c"]);
    }

    #[test]
    fn round_robin_ignores_member_order_changes() {
        let strategy = RoundRobinStrategy::new(vec![]);
        let first = strategy.order(&providers(&["a", "b"]), None, &RoutingContext::new());
        let second = strategy.order(&providers(&["b", "a"]), None, &RoutingContext::new());
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(second, vec!["b", "a"]);
    }

    #[test]
    fn round_robin_rebuilds_when_members_change() {
        let strategy = RoundRobinStrategy::new(priority(&["a", "b", "c"]));
        let ctx = RoutingContext::new();

        assert_eq!(strategy.order(&providers(&["a", "b"]), None, &ctx), vec!["a", "b"]);
        // Cursor now at 1; a new member set rebuilds and steps once more (wrapping).
        let order = strategy.order(&providers(&["a", "b", "c"]), None, &ctx);
        assert_eq!(sorted(order.clone()), vec!["a", "b", "c"]);
        assert_eq!(order, vec!["c", "a", "b"]);

        let shrunk = strategy.order(&providers(&["b"]), None, &ctx);
        assert_eq!(shrunk, vec!["b"]);
    }

    #[test]
    fn round_robin_preferred_does_not_consume_a_turn() {
        let strategy = RoundRobinStrategy::new(priority(&["a", "b", "c"]));
        let available = providers(&["a", "b", "c"]);
        let ctx = RoutingContext::new();

        assert_eq!(strategy.order(&available, None, &ctx)[0], "a");
        let pinned = strategy.order(&available, Some("a"), &ctx);
        assert_eq!(pinned, vec!["a", "b", "c"]);
        assert_eq!(strategy.order(&available, None, &ctx)[0], "b");
    }

    #[test]
    fn round_robin_is_fair_under_concurrency() {
        let strategy = Arc::new(RoundRobinStrategy::new(priority(&["a", "b", "c"])));
        let available = providers(&["a", "b", "c"]);

        let leaders: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let strategy = Arc::clone(&strategy);
                    let available = available.clone();
                    scope.spawn(move || {
                        (0..5)
                            .map(|_| {
                                let order = strategy.order(&available, None, &RoutingContext::new());
                                assert_eq!(order.len(), 3);
                                order[0].clone()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let mut counts: HashMap<String, usize> = HashMap::new();
        for leader in leaders {
            *counts.entry(leader).or_default() += 1;
        }
        assert_eq!(counts.get("a"), Some(&10));
        assert_eq!(counts.get("b"), Some(&10));
        assert_eq!(counts.get("c"), Some(&10));
    }

    // --- capability ---

    fn streaming_fleet() -> Vec<ProviderInfo> {
        vec![
            ProviderInfo::new("aliyun"),
            ProviderInfo::new("paiou").with_streaming(true),
            ProviderInfo::new("siliconflow"),
            ProviderInfo::new("openai").with_streaming(true),
            ProviderInfo::new("custom").with_streaming(true),
        ]
    }

    #[test]
    fn capability_drops_avoided_providers() {
        let strategy = CapabilityStrategy::new(priority(&["siliconflow", "aliyun"]));
        let ctx = RoutingContext::new().avoiding(["aliyun", "openai"]);
        let order = strategy.order(&streaming_fleet(), None, &ctx);
        assert_eq!(order, vec!["siliconflow", "paiou", "custom"]);
    }

    #[test]
    fn capability_falls_back_to_full_set_when_everything_is_avoided() {
        let strategy = CapabilityStrategy::new(priority(&["b"]));
        let ctx = RoutingContext::new().avoiding(["a", "b"]);
        let order = strategy.order(&providers(&["a", "b"]), None, &ctx);
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn capability_puts_streaming_providers_first() {
        let strategy = CapabilityStrategy::new(priority(&["openai", "siliconflow", "paiou"]));
        let ctx = RoutingContext::new().streaming();
        let order = strategy.order(&streaming_fleet(), None, &ctx);
        assert_eq!(
            order,
            vec!["openai", "paiou", "custom", "siliconflow", "aliyun"]
        );
    }

    #[test]
    fn capability_without_streaming_uses_priority() {
        let strategy = CapabilityStrategy::new(priority(&["siliconflow"]));
        let order = strategy.order(&streaming_fleet(), None, &RoutingContext::new());
        assert_eq!(
            order,
            vec!["siliconflow", "aliyun", "paiou", "openai", "custom"]
        );
    }

    #[test]
    fn capability_keeps_avoided_preferred_provider_first() {
        let strategy = CapabilityStrategy::new(vec![]);
        let ctx = RoutingContext::new().avoiding(["paiou"]);
        let order = strategy.order(&streaming_fleet(), Some("paiou"), &ctx);
        assert_eq!(order[0], "paiou");
        assert_eq!(order.len(), 5);
    }

    // --- kind / weights parsing ---

    #[test]
    fn strategy_kind_parse_is_lenient() {
        assert_eq!(StrategyKind::parse("Weighted"), StrategyKind::Weighted);
        assert_eq!(StrategyKind::parse("roundrobin"), StrategyKind::RoundRobin);
        assert_eq!(StrategyKind::parse("round-robin"), StrategyKind::RoundRobin);
        assert_eq!(StrategyKind::parse(" capability "), StrategyKind::Capability);
        assert_eq!(StrategyKind::parse("nonsense"), StrategyKind::Priority);
        assert_eq!(StrategyKind::parse(""), StrategyKind::Priority);
    }

    #[test]
    fn strategy_kind_serde_accepts_alias() {
        let kind: StrategyKind = serde_json::from_str("\"roundrobin\"").unwrap();
        assert_eq!(kind, StrategyKind::RoundRobin);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"round_robin\"");
    }

    #[test]
    fn build_reports_variant_names() {
        for kind in [
            StrategyKind::Priority,
            StrategyKind::Weighted,
            StrategyKind::RoundRobin,
            StrategyKind::Capability,
        ] {
            assert_eq!(kind.build(vec![], BTreeMap::new()).name(), kind.as_str());
        }
    }

    #[test]
    fn parse_weights_accepts_both_separators() {
        let weights = parse_weights("aliyun=3, paiou:1.5,broken,gemini=abc, =2");
        assert_eq!(weights.len(), 2);
        assert_eq!(weights["aliyun"], 3.0);
        assert_eq!(weights["paiou"], 1.5);
    }
}
