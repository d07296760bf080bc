//! Affix & rarity model.
//!
//! - Affix positions and per-rarity/context slot-count limits
//! - Rarity downgrade chains (tier = 1-based chain depth) and weight curves
//! - Enemy rank ordering used when picking rank affix tables
//! - The shared "prefer previously rolled" selection

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::UNLIMITED_AFFIX_COUNT;
use crate::loot::LootRollSettings;
use crate::picker::Picker;
use crate::registry::{CurveId, PrototypeId, PrototypeRegistry};
use crate::rng::RandomSource;

// ============================================================
// Positions
// ============================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum AffixPosition {
    #[default]
    None,
    Prefix,
    Suffix,
    Visual,
    Ultimate,
    Cosmic,
    Unique,
    Blessing,
    Runeword,
    TeamUp,
    Metadata,
    PetTech1,
    PetTech2,
    PetTech3,
    PetTech4,
    PetTech5,
    RegionAffix,
    Socket1,
    Socket2,
    Socket3,
}

impl AffixPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffixPosition::None => "none",
            AffixPosition::Prefix => "prefix",
            AffixPosition::Suffix => "suffix",
            AffixPosition::Visual => "visual",
            AffixPosition::Ultimate => "ultimate",
            AffixPosition::Cosmic => "cosmic",
            AffixPosition::Unique => "unique",
            AffixPosition::Blessing => "blessing",
            AffixPosition::Runeword => "runeword",
            AffixPosition::TeamUp => "team_up",
            AffixPosition::Metadata => "metadata",
            AffixPosition::PetTech1 => "pet_tech_1",
            AffixPosition::PetTech2 => "pet_tech_2",
            AffixPosition::PetTech3 => "pet_tech_3",
            AffixPosition::PetTech4 => "pet_tech_4",
            AffixPosition::PetTech5 => "pet_tech_5",
            AffixPosition::RegionAffix => "region_affix",
            AffixPosition::Socket1 => "socket_1",
            AffixPosition::Socket2 => "socket_2",
            AffixPosition::Socket3 => "socket_3",
        }
    }

    /// Every position in order, `None` included
    pub fn all_positions() -> Vec<AffixPosition> {
        vec![
            AffixPosition::None,
            AffixPosition::Prefix,
            AffixPosition::Suffix,
            AffixPosition::Visual,
            AffixPosition::Ultimate,
            AffixPosition::Cosmic,
            AffixPosition::Unique,
            AffixPosition::Blessing,
            AffixPosition::Runeword,
            AffixPosition::TeamUp,
            AffixPosition::Metadata,
            AffixPosition::PetTech1,
            AffixPosition::PetTech2,
            AffixPosition::PetTech3,
            AffixPosition::PetTech4,
            AffixPosition::PetTech5,
            AffixPosition::RegionAffix,
            AffixPosition::Socket1,
            AffixPosition::Socket2,
            AffixPosition::Socket3,
        ]
    }

    pub fn is_pet_tech(&self) -> bool {
        matches!(
            self,
            AffixPosition::PetTech1
                | AffixPosition::PetTech2
                | AffixPosition::PetTech3
                | AffixPosition::PetTech4
                | AffixPosition::PetTech5
        )
    }

    /// Positions that carry an independent min
    pub fn has_min_limit(&self) -> bool {
        matches!(
            self,
            AffixPosition::Prefix
                | AffixPosition::Suffix
                | AffixPosition::Unique
                | AffixPosition::TeamUp
                | AffixPosition::RegionAffix
        )
    }

    /// Positions filled when affix counts are rolled
    pub fn is_rolled_by_count(&self) -> bool {
        !matches!(
            self,
            AffixPosition::None | AffixPosition::Blessing | AffixPosition::Runeword
        ) && !self.is_pet_tech()
    }
}

bitflags::bitflags! {
    /// Where a roll originates
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LootContext: u32 {
        const ACHIEVEMENT_REWARD = 1 << 0;
        const DROP = 1 << 1;
        const INITIALIZATION = 1 << 2;
        const CASH_SHOP = 1 << 3;
        const CRAFTING = 1 << 4;
        const MYSTERY_CHEST = 1 << 5;
        const MISSION_REWARD = 1 << 6;
        const VENDOR = 1 << 7;
    }
}

impl Default for LootContext {
    fn default() -> Self {
        LootContext::DROP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicateHandling {
    #[default]
    Fail,
    Ignore,
    Overwrite,
    Append,
}

// ============================================================
// Affix prototype
// ============================================================

fn default_affix_weight() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffixPrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    pub position: AffixPosition,
    #[serde(default = "default_affix_weight")]
    pub weight: i32,
    #[serde(default)]
    pub keywords: Vec<PrototypeId>,
    #[serde(default)]
    pub categories: Vec<PrototypeId>,
    /// Item parents this affix may attach to. Empty allows any item.
    #[serde(default)]
    pub type_filters: Vec<PrototypeId>,
    /// Scope candidates (a power, a power group). Empty means unscoped.
    #[serde(default)]
    pub scopes: Vec<PrototypeId>,
    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,
    #[serde(default)]
    pub level_requirement: i32,
    #[serde(default)]
    pub is_gem: bool,
}

impl AffixPrototype {
    /// True when the affix carries every keyword (or any, with `match_any`)
    pub fn has_keywords(&self, keywords: &[PrototypeId], match_any: bool) -> bool {
        if keywords.is_empty() {
            return true;
        }
        if match_any {
            keywords.iter().any(|k| self.keywords.contains(k))
        } else {
            keywords.iter().all(|k| self.keywords.contains(k))
        }
    }

    /// True when no categories are requested or one of them matches
    pub fn has_any_category(&self, categories: &[PrototypeId]) -> bool {
        categories.is_empty() || categories.iter().any(|c| self.categories.contains(c))
    }

    pub fn first_category_match(&self, categories: &[PrototypeId]) -> Option<PrototypeId> {
        categories
            .iter()
            .copied()
            .find(|c| self.categories.contains(c))
    }

    pub fn has_category(&self, category: PrototypeId) -> bool {
        self.categories.contains(&category)
    }

    pub fn allow_attachment(&self, item: PrototypeId, registry: &dyn PrototypeRegistry) -> bool {
        self.type_filters.is_empty()
            || self
                .type_filters
                .iter()
                .any(|filter| registry.is_child_of(item, *filter))
    }
}

// ============================================================
// Affix limits
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountRange {
    #[serde(default)]
    pub min: i16,
    #[serde(default)]
    pub max: i16,
}

impl CountRange {
    pub fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }

    fn clamped(self) -> Self {
        let max = self.max.max(0);
        Self {
            min: self.min.clamp(0, max),
            max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizedAffixLimit {
    pub category: PrototypeId,
    pub min_affixes: i16,
}

/// Slot counts for one (rarity, context set) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffixLimits {
    pub rarity: PrototypeId,
    pub allowed_contexts: LootContext,
    pub prefixes: CountRange,
    pub suffixes: CountRange,
    pub uniques: CountRange,
    pub team_ups: CountRange,
    pub region_affixes: CountRange,
    pub max_ultimates: i16,
    pub max_cosmics: i16,
    pub max_blessings: i16,
    pub max_runewords: i16,
    pub max_sockets: [i16; 3],
    pub categorized: Vec<CategorizedAffixLimit>,
}

impl AffixLimits {
    /// Load-time clamp so stored values already satisfy `0 <= min <= max`
    pub fn post_process(&mut self) {
        self.prefixes = self.prefixes.clamped();
        self.suffixes = self.suffixes.clamped();
        self.uniques = self.uniques.clamped();
        self.team_ups = self.team_ups.clamped();
        self.region_affixes = self.region_affixes.clamped();
    }

    pub fn matches(&self, rarity: PrototypeId, context: LootContext) -> bool {
        self.rarity == rarity && self.allowed_contexts.contains(context)
    }

    fn base_limit(&self, position: AffixPosition, is_max: bool) -> i16 {
        let pick = |range: CountRange| if is_max { range.max } else { range.min };
        let max_only = |value: i16| if is_max { value } else { 0 };
        match position {
            AffixPosition::Prefix => pick(self.prefixes),
            AffixPosition::Suffix => pick(self.suffixes),
            AffixPosition::Unique => pick(self.uniques),
            AffixPosition::TeamUp => pick(self.team_ups),
            AffixPosition::RegionAffix => pick(self.region_affixes),
            AffixPosition::Ultimate => max_only(self.max_ultimates),
            AffixPosition::Cosmic => max_only(self.max_cosmics),
            AffixPosition::Blessing => max_only(self.max_blessings),
            AffixPosition::Runeword => max_only(self.max_runewords),
            AffixPosition::Socket1 => max_only(self.max_sockets[0]),
            AffixPosition::Socket2 => max_only(self.max_sockets[1]),
            AffixPosition::Socket3 => max_only(self.max_sockets[2]),
            AffixPosition::None
            | AffixPosition::Visual
            | AffixPosition::Metadata
            | AffixPosition::PetTech1
            | AffixPosition::PetTech2
            | AffixPosition::PetTech3
            | AffixPosition::PetTech4
            | AffixPosition::PetTech5 => 0,
        }
    }

    /// Static limit plus roll-modifier deltas, clamped to `0 <= min <= max`
    pub fn get_limit(
        &self,
        position: AffixPosition,
        is_max: bool,
        settings: Option<&LootRollSettings>,
    ) -> i16 {
        let mut limit = self.base_limit(position, is_max);

        if let Some(settings) = settings {
            let deltas = if is_max {
                &settings.affix_limit_max_by_position
            } else {
                &settings.affix_limit_min_by_position
            };
            if let Some(delta) = deltas.get(&position) {
                limit = limit.saturating_add(*delta);
            }
        }

        if !is_max {
            limit = limit.min(self.get_limit(position, true, settings));
        }

        limit.max(0)
    }

    pub fn get_max(&self, position: AffixPosition, settings: Option<&LootRollSettings>) -> i16 {
        self.get_limit(position, true, settings)
    }

    pub fn get_min(&self, position: AffixPosition, settings: Option<&LootRollSettings>) -> i16 {
        self.get_limit(position, false, settings)
    }

    /// Category cap, unlimited when the category has no entry
    pub fn get_category_max(
        &self,
        category: PrototypeId,
        settings: Option<&LootRollSettings>,
    ) -> i16 {
        let Some(entry) = self.categorized.iter().find(|e| e.category == category) else {
            return UNLIMITED_AFFIX_COUNT;
        };
        let delta = settings
            .and_then(|s| s.affix_limit_by_category.get(&category))
            .copied()
            .unwrap_or(0);
        entry.min_affixes.saturating_add(delta).max(0)
    }
}

// ============================================================
// Rarity
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RarityPrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub downgrade_to: PrototypeId,
    #[serde(default)]
    pub weight_curve: CurveId,
}

impl RarityPrototype {
    /// 1-based depth of the downgrade chain
    ///
    /// Stops at the first unresolvable link. A cycle is cut at the first
    /// revisited rarity.
    pub fn tier(&self, registry: &dyn PrototypeRegistry) -> i32 {
        let mut tier = 1;
        let mut visited = BTreeSet::new();
        visited.insert(self.id);
        let mut next = self.downgrade_to;
        while next.is_valid() {
            let Some(downgrade) = registry.rarity(next) else {
                tracing::debug!(rarity = ?self.id, missing = ?next, "rarity chain truncated");
                break;
            };
            if !visited.insert(downgrade.id) {
                tracing::warn!(rarity = ?self.id, repeated = ?downgrade.id, "cyclic rarity chain");
                break;
            }
            tier += 1;
            next = downgrade.downgrade_to;
        }
        tier
    }

    /// Weight at `level`, level clamped into the curve's range
    pub fn get_weight(&self, level: i32, registry: &dyn PrototypeRegistry) -> f32 {
        match registry.curve(self.weight_curve) {
            Some(curve) => curve.get_at(level),
            None => {
                tracing::warn!(
                    rarity = ?self.id,
                    curve = ?self.weight_curve,
                    "rarity weight curve missing"
                );
                0.0
            }
        }
    }

    /// True when following downgrades from `self` reaches `other`
    pub fn downgrades_to(&self, other: PrototypeId, registry: &dyn PrototypeRegistry) -> bool {
        let mut visited = BTreeSet::new();
        let mut next = self.downgrade_to;
        while next.is_valid() && visited.insert(next) {
            if next == other {
                return true;
            }
            match registry.rarity(next) {
                Some(r) => next = r.downgrade_to,
                None => break,
            }
        }
        false
    }
}

// ============================================================
// Rank
// ============================================================

/// Enemy rank, ordered weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Rank {
    Popcorn,
    Champion,
    Elite,
    MiniBoss,
    Boss,
    Player,
    GroupBoss,
    TeamUp,
}

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Popcorn => "popcorn",
            Rank::Champion => "champion",
            Rank::Elite => "elite",
            Rank::MiniBoss => "mini_boss",
            Rank::Boss => "boss",
            Rank::Player => "player",
            Rank::GroupBoss => "group_boss",
            Rank::TeamUp => "team_up",
        }
    }

    pub fn all_ranks() -> Vec<Rank> {
        vec![
            Rank::Popcorn,
            Rank::Champion,
            Rank::Elite,
            Rank::MiniBoss,
            Rank::Boss,
            Rank::Player,
            Rank::GroupBoss,
            Rank::TeamUp,
        ]
    }

    /// `a` when it ranks at least as high as `b`, otherwise `b`
    pub fn do_override(a: Option<Rank>, b: Option<Rank>) -> Option<Rank> {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => Some(if a >= b { a } else { b }),
        }
    }
}

// ============================================================
// Reuse bias
// ============================================================

/// Pick from `pool`, preferring ids already in `previously_rolled`
///
/// Candidates are weighted equally. Previously rolled ids that the pool
/// contains are tried first; otherwise any pool id outside `excluded`.
pub fn prefer_previously_rolled<R: RandomSource + ?Sized>(
    rng: &mut R,
    pool: &[PrototypeId],
    previously_rolled: &BTreeSet<PrototypeId>,
    excluded: &BTreeSet<PrototypeId>,
) -> Option<PrototypeId> {
    let mut reuse = Picker::new();
    for id in previously_rolled {
        if pool.contains(id) {
            reuse.add_one(*id);
        }
    }
    if let Some(id) = reuse.pick(rng) {
        return Some(id);
    }

    let mut fresh = Picker::new();
    for id in pool {
        if !excluded.contains(id) {
            fresh.add_one(*id);
        }
    }
    fresh.pick(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ContentDatabase, ContentRegistry, Curve};
    use crate::rng::GRandom;

    const COMMON: PrototypeId = PrototypeId(10);
    const UNCOMMON: PrototypeId = PrototypeId(11);
    const RARE: PrototypeId = PrototypeId(12);

    fn rarity(id: PrototypeId, downgrade_to: PrototypeId, curve: u64) -> RarityPrototype {
        RarityPrototype {
            id,
            name: String::new(),
            downgrade_to,
            weight_curve: CurveId(curve),
        }
    }

    fn registry_with_chain() -> ContentRegistry {
        let mut db = ContentDatabase::default();
        db.rarities = vec![
            rarity(COMMON, PrototypeId::INVALID, 1),
            rarity(UNCOMMON, COMMON, 1),
            rarity(RARE, UNCOMMON, 2),
        ];
        db.curves = vec![
            Curve::new(CurveId(1), 1, vec![100.0; 60]),
            Curve::new(CurveId(2), 10, vec![5.0, 6.0, 7.0]),
        ];
        ContentRegistry::new(db).unwrap()
    }

    fn limits() -> AffixLimits {
        AffixLimits {
            rarity: RARE,
            allowed_contexts: LootContext::DROP | LootContext::VENDOR,
            prefixes: CountRange::new(1, 2),
            suffixes: CountRange::new(0, 1),
            max_ultimates: 1,
            max_sockets: [2, 0, 0],
            ..Default::default()
        }
    }

    #[test]
    fn test_tier_chain() {
        let reg = registry_with_chain();
        assert_eq!(reg.rarity(COMMON).unwrap().tier(&reg), 1);
        assert_eq!(reg.rarity(UNCOMMON).unwrap().tier(&reg), 2);
        assert_eq!(reg.rarity(RARE).unwrap().tier(&reg), 3);
    }

    #[test]
    fn test_tier_dangling_downgrade_truncates() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(RARE, PrototypeId(999), 1)];
        let reg = ContentRegistry::new(db).unwrap();
        assert_eq!(reg.rarity(RARE).unwrap().tier(&reg), 1);
    }

    #[test]
    fn test_tier_cycle_terminates() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(COMMON, UNCOMMON, 1), rarity(UNCOMMON, COMMON, 1)];
        let reg = ContentRegistry::new(db).unwrap();
        assert_eq!(reg.rarity(COMMON).unwrap().tier(&reg), 2);
    }

    #[test]
    fn test_get_weight_clamps_below_curve() {
        let reg = registry_with_chain();
        let rare = reg.rarity(RARE).unwrap();
        assert_eq!(rare.get_weight(1, &reg), 5.0);
        assert_eq!(rare.get_weight(11, &reg), 6.0);
        assert_eq!(rare.get_weight(500, &reg), 7.0);
    }

    #[test]
    fn test_get_weight_missing_curve() {
        let reg = registry_with_chain();
        let orphan = rarity(PrototypeId(50), PrototypeId::INVALID, 77);
        assert_eq!(orphan.get_weight(10, &reg), 0.0);
    }

    #[test]
    fn test_downgrades_to() {
        let reg = registry_with_chain();
        let rare = reg.rarity(RARE).unwrap();
        assert!(rare.downgrades_to(COMMON, &reg));
        assert!(!reg.rarity(COMMON).unwrap().downgrades_to(RARE, &reg));
    }

    #[test]
    fn test_limits_static_values() {
        let l = limits();
        assert_eq!(l.get_max(AffixPosition::Prefix, None), 2);
        assert_eq!(l.get_min(AffixPosition::Prefix, None), 1);
        assert_eq!(l.get_max(AffixPosition::Ultimate, None), 1);
        assert_eq!(l.get_min(AffixPosition::Ultimate, None), 0);
        assert_eq!(l.get_max(AffixPosition::Socket1, None), 2);
        assert_eq!(l.get_max(AffixPosition::Visual, None), 0);
        assert_eq!(l.get_max(AffixPosition::PetTech3, None), 0);
    }

    #[test]
    fn test_limits_with_modifier_deltas() {
        let l = limits();
        let mut settings = LootRollSettings::default();
        settings
            .affix_limit_min_by_position
            .insert(AffixPosition::Prefix, 5);
        settings
            .affix_limit_max_by_position
            .insert(AffixPosition::Suffix, -4);
        // min raised past max is pulled back to max
        assert_eq!(l.get_min(AffixPosition::Prefix, Some(&settings)), 2);
        // max pushed negative clamps to zero, min follows
        assert_eq!(l.get_max(AffixPosition::Suffix, Some(&settings)), 0);
        assert_eq!(l.get_min(AffixPosition::Suffix, Some(&settings)), 0);
    }

    #[test]
    fn test_limits_post_process() {
        let mut l = AffixLimits {
            prefixes: CountRange::new(4, 2),
            suffixes: CountRange::new(-1, -3),
            ..Default::default()
        };
        l.post_process();
        assert_eq!(l.prefixes, CountRange::new(2, 2));
        assert_eq!(l.suffixes, CountRange::new(0, 0));
    }

    #[test]
    fn test_limits_matches() {
        let l = limits();
        assert!(l.matches(RARE, LootContext::DROP));
        assert!(l.matches(RARE, LootContext::VENDOR));
        assert!(!l.matches(RARE, LootContext::CRAFTING));
        assert!(!l.matches(COMMON, LootContext::DROP));
    }

    #[test]
    fn test_category_max() {
        let category = PrototypeId(300);
        let mut l = limits();
        assert_eq!(l.get_category_max(category, None), i16::MAX);
        l.categorized.push(CategorizedAffixLimit {
            category,
            min_affixes: 2,
        });
        let mut settings = LootRollSettings::default();
        settings.affix_limit_by_category.insert(category, 1);
        assert_eq!(l.get_category_max(category, None), 2);
        assert_eq!(l.get_category_max(category, Some(&settings)), 3);
    }

    #[test]
    fn test_rank_override() {
        assert_eq!(Rank::do_override(None, None), None);
        assert_eq!(Rank::do_override(Some(Rank::Elite), None), Some(Rank::Elite));
        assert_eq!(Rank::do_override(None, Some(Rank::Boss)), Some(Rank::Boss));
        assert_eq!(
            Rank::do_override(Some(Rank::Champion), Some(Rank::Boss)),
            Some(Rank::Boss)
        );
        assert_eq!(
            Rank::do_override(Some(Rank::GroupBoss), Some(Rank::Boss)),
            Some(Rank::GroupBoss)
        );
    }

    #[test]
    fn test_affix_keyword_and_category_filters() {
        let affix = AffixPrototype {
            id: PrototypeId(1),
            name: String::new(),
            position: AffixPosition::Prefix,
            weight: 1,
            keywords: vec![PrototypeId(5), PrototypeId(6)],
            categories: vec![PrototypeId(9)],
            type_filters: vec![],
            scopes: vec![],
            duplicate_handling: DuplicateHandling::Fail,
            level_requirement: 0,
            is_gem: false,
        };
        assert!(affix.has_keywords(&[], false));
        assert!(affix.has_keywords(&[PrototypeId(5), PrototypeId(6)], false));
        assert!(!affix.has_keywords(&[PrototypeId(5), PrototypeId(7)], false));
        assert!(affix.has_keywords(&[PrototypeId(5), PrototypeId(7)], true));
        assert!(affix.has_any_category(&[]));
        assert!(affix.has_any_category(&[PrototypeId(8), PrototypeId(9)]));
        assert!(!affix.has_any_category(&[PrototypeId(8)]));
    }

    #[test]
    fn test_prefer_previously_rolled_reuses() {
        let mut rng = GRandom::new(3);
        let pool = [PrototypeId(1), PrototypeId(2), PrototypeId(3)];
        let rolled: BTreeSet<_> = [PrototypeId(2), PrototypeId(40)].into_iter().collect();
        for _ in 0..50 {
            let pick = prefer_previously_rolled(&mut rng, &pool, &rolled, &BTreeSet::new());
            assert_eq!(pick, Some(PrototypeId(2)));
        }
    }

    #[test]
    fn test_prefer_previously_rolled_falls_back() {
        let mut rng = GRandom::new(4);
        let pool = [PrototypeId(1), PrototypeId(2)];
        let excluded: BTreeSet<_> = [PrototypeId(1)].into_iter().collect();
        let pick = prefer_previously_rolled(&mut rng, &pool, &BTreeSet::new(), &excluded);
        assert_eq!(pick, Some(PrototypeId(2)));
        let all: BTreeSet<_> = pool.into_iter().collect();
        assert_eq!(
            prefer_previously_rolled(&mut rng, &pool, &BTreeSet::new(), &all),
            None
        );
    }

    #[test]
    fn test_rolled_by_count_positions() {
        assert!(AffixPosition::Prefix.is_rolled_by_count());
        assert!(AffixPosition::Socket2.is_rolled_by_count());
        assert!(!AffixPosition::Blessing.is_rolled_by_count());
        assert!(!AffixPosition::PetTech4.is_rolled_by_count());
        assert_eq!(AffixPosition::all_positions().len(), 20);
    }
}
