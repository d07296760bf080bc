//! Roll output: granted loot, effect instructions and per-item traces.

use serde::{Deserialize, Serialize};

use crate::mutation::ItemSpec;
use crate::registry::{AssetId, CurveId, PrototypeId};

use super::settings::CooldownGate;
use super::LootRollResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LootResult {
    Item(ItemSpec),
    Agent { agent: PrototypeId, level: i32 },
    Credits(i32),
    Experience { curve: CurveId, amount: i32 },
    PowerPoints(i32),
    HealthBonus(i32),
    EnduranceBonus(i32),
    RealMoney {
        coupon_code: String,
        transaction_context: String,
        num: i32,
    },
    VanityTitle(PrototypeId),
    VendorXp { vendor: PrototypeId, amount: i32 },
}

/// Client-side reaction to a roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootCallback {
    BannerMessage { message: String },
    UsePower { power: PrototypeId },
    PlayVisualEffect { effect: AssetId },
    ChatMessage { message: String },
}

/// Instruction for the caller to persist; the engine holds no such state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootEffect {
    ConsumeCooldown(CooldownGate),
    MarkFirstTime { node: PrototypeId },
    Callback(LootCallback),
}

// ============================================================
// Roll state trace
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollState {
    Selecting,
    Drafting,
    Mutating,
    Finalized,
    Discarded,
}

impl RollState {
    fn order(self) -> u8 {
        match self {
            RollState::Selecting => 0,
            RollState::Drafting => 1,
            RollState::Mutating => 2,
            RollState::Finalized | RollState::Discarded => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RollState::Finalized | RollState::Discarded)
    }

    /// Move forward to `to`; `Mutating` may repeat, one step per mutation
    pub fn advance(&mut self, to: RollState) -> bool {
        let allowed = !self.is_terminal()
            && (to.order() > self.order()
                || (*self == RollState::Mutating && to == RollState::Mutating));
        if allowed {
            *self = to;
        } else {
            tracing::warn!(from = ?self, to = ?to, "rejected roll state transition");
        }
        allowed
    }
}

/// States one drafted item passed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollTrace {
    pub item: PrototypeId,
    pub states: Vec<RollState>,
}

impl RollTrace {
    pub fn new(item: PrototypeId) -> Self {
        Self {
            item,
            states: vec![RollState::Selecting],
        }
    }

    pub fn current(&self) -> RollState {
        self.states.last().copied().unwrap_or(RollState::Selecting)
    }

    pub fn advance(&mut self, to: RollState) -> bool {
        let mut state = self.current();
        let moved = state.advance(to);
        if moved {
            self.states.push(state);
        }
        moved
    }
}

// ============================================================
// Results
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootResults {
    pub outcome: LootRollResult,
    pub results: Vec<LootResult>,
    pub effects: Vec<LootEffect>,
    pub traces: Vec<RollTrace>,
}

impl Default for LootResults {
    fn default() -> Self {
        Self {
            outcome: LootRollResult::NO_ROLL,
            results: Vec::new(),
            effects: Vec::new(),
            traces: Vec::new(),
        }
    }
}

impl LootResults {
    pub fn item_specs(&self) -> impl Iterator<Item = &ItemSpec> {
        self.results.iter().filter_map(|r| match r {
            LootResult::Item(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn item_count(&self) -> usize {
        self.item_specs().count()
    }

    pub fn credits(&self) -> i64 {
        self.results
            .iter()
            .map(|r| match r {
                LootResult::Credits(amount) => i64::from(*amount),
                _ => 0,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
