//! Tier Classifier (MTG-006)
//!
//! Maps measured power stability to a discrete pricing tier. Rules are an
//! ordered list evaluated first-match-wins with strict `<` comparisons on
//! both coefficient of variation and average power; anything that matches
//! no rule lands in tier 3 at standard pricing. Thresholds are deployment
//! configuration, not constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pricing tier derived from measured power stability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Stable, low-power workloads
    #[serde(rename = "tier_1")]
    Tier1,
    /// Moderately stable workloads
    #[serde(rename = "tier_2")]
    Tier2,
    /// High-variance or high-power workloads; standard pricing
    #[serde(rename = "tier_3")]
    Tier3,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Tier1 => "tier_1",
            Tier::Tier2 => "tier_2",
            Tier::Tier3 => "tier_3",
        };
        write!(f, "{name}")
    }
}

/// One classification rule: both bounds must hold (strict `<`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    /// Tier granted when the rule matches
    pub tier: Tier,
    /// Power CV must be strictly below this
    pub max_cv: f64,
    /// Average power must be strictly below this, watts
    pub max_avg_power_watts: f64,
    /// Discount granted, percent
    pub discount_percentage: f64,
}

/// Ordered tier rules for one deployment.
///
/// Rules are evaluated in listed order; the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    /// Ordered rules, most favourable first
    pub rules: Vec<TierRule>,
    /// Discount for workloads matching no rule, percent
    pub fallback_discount: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                TierRule {
                    tier: Tier::Tier1,
                    max_cv: 0.10,
                    max_avg_power_watts: 150.0,
                    discount_percentage: 20.0,
                },
                TierRule {
                    tier: Tier::Tier2,
                    max_cv: 0.15,
                    max_avg_power_watts: 200.0,
                    discount_percentage: 10.0,
                },
            ],
            fallback_discount: 0.0,
        }
    }
}

/// Outcome of classifying one set of measured metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDecision {
    /// Granted tier
    pub tier: Tier,
    /// Granted discount, percent
    pub discount_percentage: f64,
    /// The CV the decision was made on
    pub power_cv: f64,
    /// The average power the decision was made on, watts
    pub avg_power_watts: f64,
    /// Whether the workload qualifies for a discount
    pub qualified: bool,
    /// Human-readable account of the decision
    pub reasoning: String,
}

impl TierPolicy {
    /// Classify measured metrics. Deterministic and total: identical
    /// inputs always produce the identical decision.
    #[must_use]
    pub fn classify(&self, avg_power_watts: f64, power_cv: f64) -> TierDecision {
        for rule in &self.rules {
            if power_cv < rule.max_cv && avg_power_watts < rule.max_avg_power_watts {
                return TierDecision {
                    tier: rule.tier,
                    discount_percentage: rule.discount_percentage,
                    power_cv,
                    avg_power_watts,
                    qualified: rule.tier != Tier::Tier3,
                    reasoning: match_reasoning(rule, avg_power_watts, power_cv),
                };
            }
        }
        TierDecision {
            tier: Tier::Tier3,
            discount_percentage: self.fallback_discount,
            power_cv,
            avg_power_watts,
            qualified: false,
            reasoning: format!(
                "High power variance (CV={power_cv:.3}) or high average power \
                 ({avg_power_watts:.1}W). Standard pricing applies."
            ),
        }
    }
}

fn match_reasoning(rule: &TierRule, avg_power_watts: f64, power_cv: f64) -> String {
    match rule.tier {
        Tier::Tier1 => format!(
            "Excellent power stability (CV={power_cv:.3}) and low average power \
             ({avg_power_watts:.1}W). Qualifies for Tier 1."
        ),
        Tier::Tier2 => format!(
            "Good power stability (CV={power_cv:.3}) and moderate power \
             ({avg_power_watts:.1}W). Qualifies for Tier 2."
        ),
        Tier::Tier3 => format!(
            "Power profile (CV={power_cv:.3}, {avg_power_watts:.1}W) matches the \
             standard-pricing rule."
        ),
    }
}
