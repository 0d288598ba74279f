// target.rs — Per-architecture cut costs and enablement
//
// Costs are abstract units roughly proportional to pipeline stalls. A kind
// the architecture cannot express has no cost and is never planned: the
// greedy planner skips it and the optimizer compiles it to constant false.

use crate::cut::CutKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Power,
    #[value(name = "armv7")]
    ArmV7,
    #[value(name = "armv8")]
    ArmV8,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Power => "power",
            Target::ArmV7 => "armv7",
            Target::ArmV8 => "armv8",
        }
    }

    /// Unit cost of a cut, or `None` if the target cannot express it.
    pub fn cost(self, kind: CutKind) -> Option<u64> {
        use CutKind::*;
        match (self, kind) {
            (_, Ctrl) | (_, Data) => Some(1),
            (_, Isync) => Some(200),
            (_, Sync) => Some(800),
            (Target::Power, Lwsync) => Some(500),
            // ARM has no lightweight full barrier; `dmb ish` does both jobs.
            (Target::ArmV7 | Target::ArmV8, Lwsync) => Some(800),
            (Target::ArmV7 | Target::ArmV8, DmbSt) => Some(300),
            (Target::ArmV8, DmbLd) => Some(300),
            (Target::ArmV8, Release | Acquire) => Some(240),
            _ => None,
        }
    }

    pub fn is_enabled(self, kind: CutKind) -> bool {
        self.cost(kind).is_some()
    }

    /// Enabled barrier kinds, cheapest first.
    pub fn barriers_by_cost(self) -> Vec<CutKind> {
        let mut kinds: Vec<(u64, CutKind)> = CutKind::BARRIERS
            .iter()
            .filter_map(|&k| self.cost(k).map(|c| (c, k)))
            .collect();
        kinds.sort_by_key(|&(cost, _)| cost);
        kinds.into_iter().map(|(_, k)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_has_no_arm_barriers() {
        assert!(Target::Power.is_enabled(CutKind::Lwsync));
        assert!(!Target::Power.is_enabled(CutKind::DmbSt));
        assert!(!Target::Power.is_enabled(CutKind::DmbLd));
        assert!(!Target::Power.is_enabled(CutKind::Release));
    }

    #[test]
    fn armv8_adds_load_barrier_and_ordering() {
        assert!(!Target::ArmV7.is_enabled(CutKind::DmbLd));
        assert!(Target::ArmV8.is_enabled(CutKind::DmbLd));
        assert_eq!(Target::ArmV8.cost(CutKind::Acquire), Some(240));
        assert!(!Target::ArmV7.is_enabled(CutKind::Release));
    }

    #[test]
    fn barriers_sorted_by_cost() {
        assert_eq!(
            Target::Power.barriers_by_cost(),
            vec![CutKind::Lwsync, CutKind::Sync]
        );
        assert_eq!(
            Target::ArmV8.barriers_by_cost(),
            vec![CutKind::DmbSt, CutKind::DmbLd, CutKind::Sync, CutKind::Lwsync]
        );
    }
}
