//! Item resolver: the seam between the loot tree and the outside world.
//!
//! - `LootOracle` answers questions about recipient state (cooldowns,
//!   first-time grants, party, unlocked characters, missions)
//! - `ItemResolver` is what nodes and mutations call into
//! - `LootResolver` is the in-memory implementation used by `roll_loot`

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::affix::LootContext;
use crate::constants::{MAX_ITEM_LEVEL, MAX_LOOT_TREE_DEPTH, MIN_ITEM_LEVEL};
use crate::mutation::{self, AffixBehavior, ItemSpec, LootMutation, MutationResults};
use crate::picker::Picker;
use crate::registry::{
    ItemPrototype, PrototypeId, PrototypeKind, PrototypeRegistry, RestrictionTestFlags,
};
use crate::rng::{GRandom, RandomSource};

use super::results::{LootEffect, LootResult, LootResults, RollState, RollTrace};
use super::settings::{CooldownGate, LootDropChanceModifiers, LootRollSettings};
use super::LootRollResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MissionState {
    #[default]
    Invalid,
    Inactive,
    Available,
    Active,
    Completed,
    Failed,
}

/// Recipient state owned by the caller
///
/// Every default answers as if the recipient had no history.
pub trait LootOracle {
    fn is_on_cooldown(&self, _gate: &CooldownGate) -> bool {
        false
    }

    fn has_received_first_time(&self, _key: PrototypeId) -> bool {
        false
    }

    fn party_avatars(&self) -> Vec<PrototypeId> {
        Vec::new()
    }

    fn has_unlocked_character(&self, _character: PrototypeId) -> bool {
        false
    }

    /// Remaining vendor xp for today, `None` when uncapped
    fn vendor_xp_remaining(&self, _vendor: PrototypeId) -> Option<i32> {
        None
    }

    fn mission_state(&self, _mission: PrototypeId) -> MissionState {
        MissionState::Invalid
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl LootOracle for NoOracle {}

pub(crate) static NO_ORACLE: NoOracle = NoOracle;

pub trait ItemResolver<'r> {
    fn registry(&self) -> &'r dyn PrototypeRegistry;
    fn oracle(&self) -> &'r dyn LootOracle;
    fn rng(&mut self) -> &mut dyn RandomSource;
    fn context(&self) -> LootContext;

    fn max_tree_depth(&self) -> u32 {
        MAX_LOOT_TREE_DEPTH
    }

    /// Drop-restriction gate; with `enforce` the item spec is adjusted until it passes
    fn check_item(&self, spec: &mut ItemSpec, flags: RestrictionTestFlags, enforce: bool) -> bool;
    fn check_drop_chance(&mut self, settings: &LootRollSettings, no_drop_percent: f32) -> bool;
    fn resolve_level(&self, level: i32, use_level_verbatim: bool) -> i32;
    fn resolve_avatar(&mut self, settings: &LootRollSettings) -> PrototypeId;
    fn resolve_rarity(
        &mut self,
        rarities: &BTreeSet<PrototypeId>,
        level: i32,
        item: Option<&ItemPrototype>,
    ) -> PrototypeId;

    fn push_item(
        &mut self,
        spec: ItemSpec,
        flags: RestrictionTestFlags,
        mutations: &[LootMutation],
    ) -> LootRollResult;
    /// Queue an already-rolled item; affixes are kept as they are
    fn push_clone(&mut self, spec: ItemSpec) -> LootRollResult;
    fn push_result(&mut self, result: LootResult) -> LootRollResult;
    fn push_effect(&mut self, effect: LootEffect);
    fn clear_pending(&mut self);
    fn process_pending(&mut self, settings: &LootRollSettings) -> bool;
    /// Finalized item at `index` in this roll, for clone nodes and mutations
    fn clone_source(&self, index: usize) -> Option<ItemSpec>;
}

enum PendingLoot {
    Item {
        spec: ItemSpec,
        mutations: Vec<LootMutation>,
        roll_affixes: bool,
    },
    Other(LootResult),
}

pub struct LootResolver<'r> {
    registry: &'r dyn PrototypeRegistry,
    oracle: &'r dyn LootOracle,
    rng: GRandom,
    context: LootContext,
    drop_rate_multiplier: f32,
    max_tree_depth: u32,
    pending: Vec<PendingLoot>,
    results: LootResults,
}

impl<'r> LootResolver<'r> {
    pub fn new(registry: &'r dyn PrototypeRegistry, seed: u64) -> Self {
        Self {
            registry,
            oracle: &NO_ORACLE,
            rng: GRandom::new(seed),
            context: LootContext::default(),
            drop_rate_multiplier: 1.0,
            max_tree_depth: MAX_LOOT_TREE_DEPTH,
            pending: Vec::new(),
            results: LootResults::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: &'r dyn LootOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_context(mut self, context: LootContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_drop_rate_multiplier(mut self, multiplier: f32) -> Self {
        self.drop_rate_multiplier = multiplier.max(0.0);
        self
    }

    pub fn with_max_tree_depth(mut self, depth: u32) -> Self {
        self.max_tree_depth = depth;
        self
    }

    pub fn results(&self) -> &LootResults {
        &self.results
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn into_results(mut self, outcome: LootRollResult) -> LootResults {
        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "unprocessed loot discarded");
        }
        self.results.outcome = outcome;
        self.results
    }

    fn finish_item(
        &mut self,
        mut spec: ItemSpec,
        mutations: &[LootMutation],
        roll_affixes: bool,
        settings: &LootRollSettings,
    ) -> bool {
        let mut trace = RollTrace::new(spec.item);
        trace.advance(RollState::Drafting);

        if roll_affixes {
            let rolled = mutation::update_affixes(
                &mut spec,
                AffixBehavior::Roll,
                Some(settings),
                self,
            );
            if rolled.contains(MutationResults::ERROR) {
                warn!(item = ?spec.item, result = ?rolled, "affix roll incomplete");
            }
        }

        let (spec, outcome) =
            mutation::apply_mutations_traced(spec, mutations, settings, self, &mut trace);
        let ok = !outcome.contains(MutationResults::ERROR);
        if ok {
            trace.advance(RollState::Finalized);
            self.results.results.push(LootResult::Item(spec));
        } else {
            debug!(item = ?trace.item, result = ?outcome, "item discarded by mutation");
            trace.advance(RollState::Discarded);
        }
        self.results.traces.push(trace);
        ok
    }
}

impl<'r> ItemResolver<'r> for LootResolver<'r> {
    fn registry(&self) -> &'r dyn PrototypeRegistry {
        self.registry
    }

    fn oracle(&self) -> &'r dyn LootOracle {
        self.oracle
    }

    fn rng(&mut self) -> &mut dyn RandomSource {
        &mut self.rng
    }

    fn context(&self) -> LootContext {
        self.context
    }

    fn max_tree_depth(&self) -> u32 {
        self.max_tree_depth
    }

    fn check_item(&self, spec: &mut ItemSpec, flags: RestrictionTestFlags, enforce: bool) -> bool {
        let Some(item) = self.registry.item(spec.item) else {
            warn!(item = ?spec.item, "item prototype missing");
            return false;
        };
        if enforce {
            item.make_restrictions_droppable(spec, self.context, flags, self.registry)
                .is_some()
        } else {
            item.is_droppable_for_restrictions(spec, self.context, flags, self.registry)
        }
    }

    fn check_drop_chance(&mut self, settings: &LootRollSettings, no_drop_percent: f32) -> bool {
        if settings.is_restricted_by_loot_roll_modifier() {
            return false;
        }
        let mut drop_chance = (1.0 - no_drop_percent) * self.drop_rate_multiplier;
        if settings
            .drop_chance_modifiers
            .contains(LootDropChanceModifiers::DIFFICULTY_TIER_NO_DROP_MODIFIED)
        {
            drop_chance *= settings.no_drop_modifier;
        }
        self.rng.next_float() < drop_chance
    }

    fn resolve_level(&self, level: i32, use_level_verbatim: bool) -> i32 {
        if use_level_verbatim {
            level.max(MIN_ITEM_LEVEL)
        } else {
            level.clamp(MIN_ITEM_LEVEL, MAX_ITEM_LEVEL)
        }
    }

    fn resolve_avatar(&mut self, settings: &LootRollSettings) -> PrototypeId {
        if settings.usable_avatar.is_valid()
            && (settings.force_usable || self.rng.next_float() < settings.usable_percent)
        {
            return settings.usable_avatar;
        }
        let mut picker = Picker::new();
        for avatar in self.registry.ids_of_kind(PrototypeKind::Avatar) {
            picker.add_one(avatar);
        }
        picker
            .pick(&mut self.rng)
            .unwrap_or(settings.usable_avatar)
    }

    fn resolve_rarity(
        &mut self,
        rarities: &BTreeSet<PrototypeId>,
        level: i32,
        item: Option<&ItemPrototype>,
    ) -> PrototypeId {
        let mut picker = Picker::new();
        for id in self.registry.ids_of_kind(PrototypeKind::Rarity) {
            if !rarities.is_empty() && !rarities.contains(&id) {
                continue;
            }
            let Some(rarity) = self.registry.rarity(id) else {
                continue;
            };
            if let Some(item) = item {
                let candidate = ItemSpec {
                    item: item.id,
                    rarity: id,
                    level,
                    ..Default::default()
                };
                if !item.is_droppable_for_restrictions(
                    &candidate,
                    self.context,
                    RestrictionTestFlags::RARITY,
                    self.registry,
                ) {
                    continue;
                }
            }
            // Curve weights are fractional; scale before truncating
            let weight = (rarity.get_weight(level, self.registry) * 100.0) as i32;
            picker.add(id, weight);
        }
        picker.pick(&mut self.rng).unwrap_or(PrototypeId::INVALID)
    }

    fn push_item(
        &mut self,
        mut spec: ItemSpec,
        flags: RestrictionTestFlags,
        mutations: &[LootMutation],
    ) -> LootRollResult {
        if !self.check_item(&mut spec, flags, false) {
            return LootRollResult::NO_ROLL;
        }
        spec.seed = mutation::roll_seed(&mut self.rng);
        spec.restriction_flags = flags;
        self.pending.push(PendingLoot::Item {
            spec,
            mutations: mutations.to_vec(),
            roll_affixes: true,
        });
        LootRollResult::SUCCESS
    }

    fn push_clone(&mut self, spec: ItemSpec) -> LootRollResult {
        self.pending.push(PendingLoot::Item {
            spec,
            mutations: Vec::new(),
            roll_affixes: false,
        });
        LootRollResult::SUCCESS
    }

    fn push_result(&mut self, result: LootResult) -> LootRollResult {
        self.pending.push(PendingLoot::Other(result));
        LootRollResult::SUCCESS
    }

    fn push_effect(&mut self, effect: LootEffect) {
        self.results.effects.push(effect);
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn process_pending(&mut self, settings: &LootRollSettings) -> bool {
        let pending = std::mem::take(&mut self.pending);
        let mut ok = true;
        for entry in pending {
            match entry {
                PendingLoot::Other(result) => self.results.results.push(result),
                PendingLoot::Item {
                    spec,
                    mutations,
                    roll_affixes,
                } => {
                    ok &= self.finish_item(spec, &mutations, roll_affixes, settings);
                }
            }
        }
        ok
    }

    fn clone_source(&self, index: usize) -> Option<ItemSpec> {
        self.results.item_specs().nth(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::RarityPrototype;
    use crate::registry::{ContentDatabase, ContentRegistry, Curve, CurveId, NamedPrototype};

    const COMMON: PrototypeId = PrototypeId(10);
    const RARE: PrototypeId = PrototypeId(12);
    const SWORD: PrototypeId = PrototypeId(100);
    const HERO: PrototypeId = PrototypeId(300);

    fn registry() -> ContentRegistry {
        let mut db = ContentDatabase::default();
        db.curves = vec![Curve::new(CurveId(1), 1, vec![1.0; 100])];
        db.rarities = vec![
            RarityPrototype {
                id: COMMON,
                name: String::new(),
                downgrade_to: PrototypeId::INVALID,
                weight_curve: CurveId(1),
            },
            RarityPrototype {
                id: RARE,
                name: String::new(),
                downgrade_to: COMMON,
                weight_curve: CurveId(1),
            },
        ];
        db.items = vec![ItemPrototype {
            id: SWORD,
            name: "sword".into(),
            parent: PrototypeId::INVALID,
            is_abstract: false,
            slot: Default::default(),
            usable_by: vec![],
            builtin_affixes: vec![],
            affix_limits: vec![],
            drop_restrictions: vec![crate::registry::DropRestriction::Rarity {
                allowed: vec![COMMON],
            }],
        }];
        db.prototypes = vec![NamedPrototype {
            id: HERO,
            kind: PrototypeKind::Avatar,
            name: "hero".into(),
            parent: PrototypeId::INVALID,
        }];
        ContentRegistry::new(db).unwrap()
    }

    #[test]
    fn test_resolve_level_clamps() {
        let reg = registry();
        let resolver = LootResolver::new(&reg, 1);
        assert_eq!(resolver.resolve_level(0, false), MIN_ITEM_LEVEL);
        assert_eq!(resolver.resolve_level(500, false), MAX_ITEM_LEVEL);
        assert_eq!(resolver.resolve_level(500, true), 500);
        assert_eq!(resolver.resolve_level(-4, true), MIN_ITEM_LEVEL);
    }

    #[test]
    fn test_resolve_rarity_honors_item_restrictions() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 5);
        let sword = reg.item(SWORD).unwrap();
        for _ in 0..20 {
            assert_eq!(resolver.resolve_rarity(&BTreeSet::new(), 10, Some(sword)), COMMON);
        }
        let only_rare: BTreeSet<_> = [RARE].into_iter().collect();
        assert_eq!(resolver.resolve_rarity(&only_rare, 10, None), RARE);
        assert_eq!(
            resolver.resolve_rarity(&only_rare, 10, Some(sword)),
            PrototypeId::INVALID
        );
    }

    #[test]
    fn test_resolve_avatar_forced_and_random() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 2);
        let mut settings = LootRollSettings::default();
        assert_eq!(resolver.resolve_avatar(&settings), HERO);

        settings.usable_avatar = PrototypeId(301);
        settings.force_usable = true;
        assert_eq!(resolver.resolve_avatar(&settings), PrototypeId(301));
    }

    #[test]
    fn test_drop_chance_restricted_and_scaled() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 3);
        let mut settings = LootRollSettings::default();
        assert!(resolver.check_drop_chance(&settings, 0.0));
        assert!(!resolver.check_drop_chance(&settings, 1.0));

        settings.drop_chance_modifiers |= LootDropChanceModifiers::DIFFICULTY_TIER_NO_DROP_MODIFIED;
        settings.no_drop_modifier = 0.0;
        assert!(!resolver.check_drop_chance(&settings, 0.0));

        settings.drop_chance_modifiers = LootDropChanceModifiers::LEVEL_RESTRICTED;
        assert!(!resolver.check_drop_chance(&settings, 0.0));

        let mut zero = LootResolver::new(&reg, 3).with_drop_rate_multiplier(0.0);
        assert!(!zero.check_drop_chance(&LootRollSettings::default(), 0.0));
    }

    #[test]
    fn test_push_item_checks_restrictions() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 4);
        let rare = ItemSpec {
            item: SWORD,
            rarity: RARE,
            level: 5,
            ..Default::default()
        };
        assert_eq!(
            resolver.push_item(rare, RestrictionTestFlags::ALL, &[]),
            LootRollResult::NO_ROLL
        );

        let common = ItemSpec {
            item: SWORD,
            rarity: COMMON,
            level: 5,
            ..Default::default()
        };
        assert_eq!(
            resolver.push_item(common, RestrictionTestFlags::ALL, &[]),
            LootRollResult::SUCCESS
        );
        assert_eq!(resolver.pending_len(), 1);
        assert!(resolver.process_pending(&LootRollSettings::default()));

        let results = resolver.into_results(LootRollResult::SUCCESS);
        assert_eq!(results.item_count(), 1);
        assert_ne!(results.item_specs().next().unwrap().seed, 0);
        assert_eq!(results.traces[0].current(), RollState::Finalized);
    }

    #[test]
    fn test_clone_source_indexes_finalized_items() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 4);
        resolver.push_result(LootResult::Credits(5));
        resolver.push_clone(ItemSpec {
            item: SWORD,
            level: 7,
            ..Default::default()
        });
        resolver.process_pending(&LootRollSettings::default());
        assert_eq!(resolver.clone_source(0).unwrap().level, 7);
        assert!(resolver.clone_source(1).is_none());
    }
}
