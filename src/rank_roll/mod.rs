//! Difficulty-based rank and rank-affix selection.
//!
//! - `RankAffixTable` per difficulty tier, one weighted entry per rank
//! - `AffixTableEntry::roll_affix` with a chance gate and reuse bias
//! - `roll_rank_affixes` rolls every slot of an entry

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::affix::{prefer_previously_rolled, Rank};
use crate::picker::Picker;
use crate::registry::{PrototypeId, PrototypeRegistry};
use crate::rng::RandomSource;

fn default_chance_pct() -> i32 {
    100
}

/// One affix slot of a rank entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffixTableEntry {
    pub table: PrototypeId,
    #[serde(default = "default_chance_pct")]
    pub chance_pct: i32,
}

impl AffixTableEntry {
    /// Roll one affix from the table, or `INVALID`
    ///
    /// The chance gate is consumed first. Affixes in `already_rolled` that
    /// the table contains are preferred; otherwise any table affix not in
    /// `excluded`.
    pub fn roll_affix<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        registry: &dyn PrototypeRegistry,
        already_rolled: &BTreeSet<PrototypeId>,
        excluded: &BTreeSet<PrototypeId>,
    ) -> PrototypeId {
        let Some(table) = registry.affix_table(self.table) else {
            tracing::warn!(table = ?self.table, "affix table missing");
            return PrototypeId::INVALID;
        };
        if !rng.next_pct(self.chance_pct) {
            return PrototypeId::INVALID;
        }
        prefer_previously_rolled(rng, &table.affixes, already_rolled, excluded)
            .unwrap_or(PrototypeId::INVALID)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankAffixEntry {
    pub rank: Rank,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub affix_tables: Vec<AffixTableEntry>,
}

impl RankAffixEntry {
    pub fn get_affix_slot(&self, slot: usize) -> Option<&AffixTableEntry> {
        self.affix_tables.get(slot)
    }

    pub fn get_max_affixes(&self) -> usize {
        self.affix_tables.len()
    }
}

/// Rank table for one difficulty tier; `INVALID` tier is the fallback table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankAffixTable {
    #[serde(default)]
    pub difficulty_tier: PrototypeId,
    #[serde(default)]
    pub entries: Vec<RankAffixEntry>,
}

impl RankAffixTable {
    /// Entries with positive weight and, unless `no_affixes`, at least one slot
    pub fn build_rank_picker(&self, no_affixes: bool) -> Picker<&RankAffixEntry> {
        let mut picker = Picker::new();
        for entry in &self.entries {
            if entry.weight > 0 && (no_affixes || entry.get_max_affixes() > 0) {
                picker.add(entry, entry.weight);
            }
        }
        picker
    }

    pub fn roll_rank<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        no_affixes: bool,
    ) -> Option<&RankAffixEntry> {
        self.build_rank_picker(no_affixes).pick(rng)
    }

    pub fn entry_for_rank(&self, rank: Rank) -> Option<&RankAffixEntry> {
        self.entries.iter().find(|e| e.rank == rank)
    }
}

/// Table for `difficulty_tier`, falling back to the default table
pub fn get_rank_affix_table(
    registry: &dyn PrototypeRegistry,
    difficulty_tier: PrototypeId,
) -> Option<&RankAffixTable> {
    registry
        .rank_affix_table(difficulty_tier)
        .or_else(|| registry.rank_affix_table(PrototypeId::INVALID))
}

/// Roll every slot of `entry`
///
/// `already_rolled` is shared across a spawn group so copies of the same
/// table reuse one affix. Each rolled affix is added to it.
pub fn roll_rank_affixes<R: RandomSource + ?Sized>(
    entry: &RankAffixEntry,
    rng: &mut R,
    registry: &dyn PrototypeRegistry,
    already_rolled: &mut BTreeSet<PrototypeId>,
) -> Vec<PrototypeId> {
    let mut rolled = Vec::with_capacity(entry.get_max_affixes());
    let mut own = BTreeSet::new();
    for slot in &entry.affix_tables {
        let reusable: BTreeSet<PrototypeId> = already_rolled.difference(&own).copied().collect();
        let affix = slot.roll_affix(rng, registry, &reusable, &own);
        if !affix.is_valid() || !own.insert(affix) {
            continue;
        }
        already_rolled.insert(affix);
        rolled.push(affix);
    }
    tracing::debug!(rank = entry.rank.as_str(), count = rolled.len(), "rank affixes rolled");
    rolled
}
