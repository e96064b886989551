//! Conversation funnel state machine.
//!
//! Stages progress `awareness -> interest -> consideration -> negotiation
//! -> closed_won`, with `closed_lost` as a terminal side-branch reachable
//! from any non-terminal stage. The stage is a high-water mark: requests
//! that would move it backward are ignored rather than rejected.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadStage;
use crate::errors::UnknownEnumValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Awareness,
    Interest,
    Consideration,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl FunnelStage {
    /// The committed progression, in order. `ClosedLost` sits outside it.
    pub const ORDERED: [FunnelStage; 5] = [
        FunnelStage::Awareness,
        FunnelStage::Interest,
        FunnelStage::Consideration,
        FunnelStage::Negotiation,
        FunnelStage::ClosedWon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Awareness => "awareness",
            Self::Interest => "interest",
            Self::Consideration => "consideration",
            Self::Negotiation => "negotiation",
            Self::ClosedWon => "closed_won",
            Self::ClosedLost => "closed_lost",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Awareness => 0,
            Self::Interest => 1,
            Self::Consideration => 2,
            Self::Negotiation => 3,
            Self::ClosedWon | Self::ClosedLost => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost)
    }
}

impl FromStr for FunnelStage {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "awareness" => Ok(Self::Awareness),
            "interest" => Ok(Self::Interest),
            "consideration" => Ok(Self::Consideration),
            "negotiation" => Ok(Self::Negotiation),
            "closed_won" => Ok(Self::ClosedWon),
            "closed_lost" => Ok(Self::ClosedLost),
            other => Err(UnknownEnumValue { kind: "funnel stage", value: other.to_owned() }),
        }
    }
}

/// Apply a stage request against the high-water mark. Backward requests
/// return the current stage unchanged; an explicit `ClosedLost` is always
/// honored from any non-terminal stage; terminal stages absorb everything.
pub fn advance(current: FunnelStage, requested: FunnelStage) -> FunnelStage {
    if current.is_terminal() {
        return current;
    }
    if requested == FunnelStage::ClosedLost {
        return FunnelStage::ClosedLost;
    }
    if requested.rank() <= current.rank() {
        current
    } else {
        requested
    }
}

/// Lead stage and score synthesized from a funnel stage when a handoff
/// arrives with no explicit lead. The score mapping is monotonic in the
/// stage ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeadProfile {
    pub stage: LeadStage,
    pub score: i32,
}

pub fn synthesized_lead_profile(stage: FunnelStage) -> LeadProfile {
    match stage {
        FunnelStage::Awareness => LeadProfile { stage: LeadStage::Cold, score: 30 },
        FunnelStage::Interest => LeadProfile { stage: LeadStage::Warm, score: 50 },
        FunnelStage::Consideration => LeadProfile { stage: LeadStage::Warm, score: 60 },
        FunnelStage::Negotiation => LeadProfile { stage: LeadStage::Hot, score: 80 },
        FunnelStage::ClosedWon => LeadProfile { stage: LeadStage::Qualified, score: 90 },
        FunnelStage::ClosedLost => LeadProfile { stage: LeadStage::Cold, score: 10 },
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub from: FunnelStage,
    pub to: FunnelStage,
    pub rate_pct: f64,
}

/// Consecutive-stage conversion rates from current-stage counts. A stage
/// with zero conversations yields a rate of 0 for the following pair
/// instead of failing on the division.
pub fn conversion_rates(counts: &HashMap<FunnelStage, i64>) -> Vec<ConversionRate> {
    FunnelStage::ORDERED
        .windows(2)
        .map(|pair| {
            let current = counts.get(&pair[0]).copied().unwrap_or(0);
            let next = counts.get(&pair[1]).copied().unwrap_or(0);
            let rate_pct = if current > 0 {
                round2(next as f64 / current as f64 * 100.0)
            } else {
                0.0
            };
            ConversionRate { from: pair[0], to: pair[1], rate_pct }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        advance, conversion_rates, synthesized_lead_profile, FunnelStage, LeadProfile,
    };
    use crate::domain::lead::LeadStage;

    #[test]
    fn stage_never_decreases() {
        use FunnelStage::*;

        let requests = [Interest, Awareness, Negotiation, Consideration, Interest, ClosedWon];
        let mut stage = Awareness;
        let mut observed = vec![stage];
        for requested in requests {
            stage = advance(stage, requested);
            observed.push(stage);
        }

        for window in observed.windows(2) {
            assert!(
                window[1].rank() >= window[0].rank(),
                "stage regressed: {:?} -> {:?}",
                window[0],
                window[1]
            );
        }
        assert_eq!(stage, FunnelStage::ClosedWon);
    }

    #[test]
    fn backward_request_is_ignored_not_rejected() {
        let stage = advance(FunnelStage::Negotiation, FunnelStage::Interest);
        assert_eq!(stage, FunnelStage::Negotiation);
    }

    #[test]
    fn closed_lost_is_always_honored_from_non_terminal_stages() {
        for current in [
            FunnelStage::Awareness,
            FunnelStage::Interest,
            FunnelStage::Consideration,
            FunnelStage::Negotiation,
        ] {
            assert_eq!(advance(current, FunnelStage::ClosedLost), FunnelStage::ClosedLost);
        }
    }

    #[test]
    fn terminal_stages_absorb_all_requests() {
        assert_eq!(advance(FunnelStage::ClosedWon, FunnelStage::ClosedLost), FunnelStage::ClosedWon);
        assert_eq!(advance(FunnelStage::ClosedLost, FunnelStage::ClosedWon), FunnelStage::ClosedLost);
        assert_eq!(advance(FunnelStage::ClosedLost, FunnelStage::Awareness), FunnelStage::ClosedLost);
    }

    #[test]
    fn synthesized_profile_maps_negotiation_to_hot() {
        assert_eq!(
            synthesized_lead_profile(FunnelStage::Negotiation),
            LeadProfile { stage: LeadStage::Hot, score: 80 }
        );
        assert_eq!(
            synthesized_lead_profile(FunnelStage::Consideration),
            LeadProfile { stage: LeadStage::Warm, score: 60 }
        );
    }

    #[test]
    fn synthesized_scores_are_monotonic_over_the_ordering() {
        let scores: Vec<i32> = FunnelStage::ORDERED
            .iter()
            .map(|stage| synthesized_lead_profile(*stage).score)
            .collect();
        for window in scores.windows(2) {
            assert!(window[0] < window[1], "scores must increase: {scores:?}");
        }
    }

    #[test]
    fn conversion_rates_divide_consecutive_stage_counts() {
        let mut counts = HashMap::new();
        counts.insert(FunnelStage::Awareness, 10);
        counts.insert(FunnelStage::Interest, 4);
        counts.insert(FunnelStage::Consideration, 3);

        let rates = conversion_rates(&counts);
        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0].rate_pct, 40.0);
        assert_eq!(rates[1].rate_pct, 75.0);
    }

    #[test]
    fn zero_denominator_yields_zero_rate() {
        let mut counts = HashMap::new();
        counts.insert(FunnelStage::Interest, 5);

        let rates = conversion_rates(&counts);
        let awareness_to_interest = &rates[0];
        assert_eq!(awareness_to_interest.rate_pct, 0.0);
        assert!(rates.iter().all(|r| r.rate_pct.is_finite()));
    }
}
