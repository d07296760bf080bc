//! Item mutations.
//!
//! A drafted `ItemSpec` runs through an ordered list of `LootMutation`s
//! before it is granted:
//! - `item_spec`: the draft record itself
//! - `affixes`: rolling, copying and dropping affixes
//!
//! The pipeline is atomic: when any mutation reports `ERROR`, the draft is
//! returned untouched together with the accumulated result bits.

pub mod affixes;
pub mod item_spec;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::affix::AffixPosition;
use crate::eval::{self, ContextSlot, EvalContext, EvalNode};
use crate::loot::node::pick_valid_item;
use crate::loot::{ItemResolver, LootRollSettings, RollState, RollTrace};
use crate::properties::{PropertyEnum, PropertyValue};
use crate::registry::{EquipmentSlot, ItemPrototype, PrototypeId, RestrictionTestFlags};

pub use affixes::{update_affixes, AffixBehavior, AffixFilter};
pub use item_spec::{roll_seed, AffixSpec, ItemBinding, ItemSpec};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MutationResults: u16 {
        const ERROR = 1 << 0;
        const CHANGED = 1 << 1;
        const ITEM_PROTOTYPE_CHANGE = 1 << 2;
        const AFFIX_CHANGE = 1 << 3;
        const EVAL_CHANGE = 1 << 4;
        const ERROR_REASON_AFFIX_STATS = 1 << 5;
        const ERROR_REASON_AFFIX_SCOPE_POWER = 1 << 6;
        const ERROR_REASON_AFFIX_SCOPE_POWER_GROUP = 1 << 7;
    }
}

impl MutationResults {
    pub fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LootBindingType {
    #[default]
    None,
    TradeRestricted,
    TradeRestrictedRemoveBinding,
    Avatar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LootMutation {
    AddAffixes {
        count: i16,
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
    },
    AddAffix {
        affix: PrototypeId,
    },
    ApplyNoVisualsOverride,
    ClampLevel {
        #[serde(default)]
        min_level: i32,
        #[serde(default)]
        max_level: i32,
    },
    CloneAffixes {
        source_index: i32,
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
        #[serde(default)]
        enforce_affix_limits: bool,
    },
    CloneBuiltinAffixes {
        source_index: i32,
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
        #[serde(default)]
        enforce_affix_limits: bool,
    },
    CloneLevel {
        source_index: i32,
    },
    CloneSeed {
        source_index: i32,
    },
    DropAffixes {
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
    },
    /// Formula over the item's properties; an `ITEM_LEVEL` write moves the level
    Eval(EvalNode),
    MutateBinding(LootBindingType),
    MutateLevel,
    MutateRank {
        rank: i32,
    },
    MutateRarity {
        #[serde(default)]
        reroll_affix_count: bool,
    },
    MutateSlot {
        slot: EquipmentSlot,
    },
    MutateAffixSeed {
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
    },
    MutateBuiltinSeed,
    OffsetLootLevel {
        offset: i32,
    },
    ReplaceAffixes {
        source_index: i32,
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        keywords: Vec<PrototypeId>,
        #[serde(default)]
        categories: Vec<PrototypeId>,
        #[serde(default)]
        enforce_affix_limits: bool,
    },
}

impl LootMutation {
    pub fn name(&self) -> &'static str {
        match self {
            LootMutation::AddAffixes { .. } => "AddAffixes",
            LootMutation::AddAffix { .. } => "AddAffix",
            LootMutation::ApplyNoVisualsOverride => "ApplyNoVisualsOverride",
            LootMutation::ClampLevel { .. } => "ClampLevel",
            LootMutation::CloneAffixes { .. } => "CloneAffixes",
            LootMutation::CloneBuiltinAffixes { .. } => "CloneBuiltinAffixes",
            LootMutation::CloneLevel { .. } => "CloneLevel",
            LootMutation::CloneSeed { .. } => "CloneSeed",
            LootMutation::DropAffixes { .. } => "DropAffixes",
            LootMutation::Eval(_) => "Eval",
            LootMutation::MutateBinding(_) => "MutateBinding",
            LootMutation::MutateLevel => "MutateLevel",
            LootMutation::MutateRank { .. } => "MutateRank",
            LootMutation::MutateRarity { .. } => "MutateRarity",
            LootMutation::MutateSlot { .. } => "MutateSlot",
            LootMutation::MutateAffixSeed { .. } => "MutateAffixSeed",
            LootMutation::MutateBuiltinSeed => "MutateBuiltinSeed",
            LootMutation::OffsetLootLevel { .. } => "OffsetLootLevel",
            LootMutation::ReplaceAffixes { .. } => "ReplaceAffixes",
        }
    }

    /// Load-time normalization
    pub fn post_process(&mut self) {
        if let LootMutation::ClampLevel { min_level, max_level } = self {
            *min_level = (*min_level).max(0);
            if *max_level != 0 {
                *max_level = (*max_level).max(*min_level);
            }
        }
    }

    pub fn mutate<'r>(
        &self,
        spec: &mut ItemSpec,
        settings: &LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> MutationResults {
        let registry = resolver.registry();
        match self {
            LootMutation::AddAffixes {
                count,
                position,
                keywords,
                categories,
            } => {
                let filter = AffixFilter::new(*position, keywords, categories);
                let result = affixes::add_affixes(spec, *count, filter, settings, resolver);
                with_validation(result, spec, resolver)
            }
            LootMutation::AddAffix { affix } => {
                let result = affixes::add_affix(spec, *affix, settings, resolver);
                with_validation(result, spec, resolver)
            }
            LootMutation::ApplyNoVisualsOverride => {
                if spec.disable_visuals(registry) {
                    MutationResults::CHANGED | MutationResults::AFFIX_CHANGE
                } else {
                    MutationResults::empty()
                }
            }
            LootMutation::ClampLevel { min_level, max_level } => {
                let level = if *max_level == 0 {
                    spec.level.max(*min_level)
                } else {
                    spec.level.clamp(*min_level, (*max_level).max(*min_level))
                };
                set_level(spec, level, resolver)
            }
            LootMutation::CloneAffixes {
                source_index,
                position,
                keywords,
                categories,
                enforce_affix_limits,
            } => {
                let Some(source) = clone_source(*source_index, resolver) else {
                    return MutationResults::ERROR;
                };
                let filter = AffixFilter::new(*position, keywords, categories);
                let result =
                    affixes::copy_affixes(
                        &source.affixes,
                        spec,
                        filter,
                        *enforce_affix_limits,
                        resolver,
                    );
                with_validation(result, spec, resolver)
            }
            LootMutation::CloneBuiltinAffixes {
                source_index,
                position,
                keywords,
                categories,
                enforce_affix_limits,
            } => {
                let Some(source) = clone_source(*source_index, resolver) else {
                    return MutationResults::ERROR;
                };
                let Some(proto) = registry.item(source.item) else {
                    return MutationResults::ERROR;
                };
                let builtins: Vec<AffixSpec> = proto
                    .builtin_affixes
                    .iter()
                    .map(|builtin| AffixSpec {
                        affix: builtin.affix,
                        scope: builtin.scope,
                        level_requirement: registry
                            .affix(builtin.affix)
                            .map_or(0, |a| a.level_requirement),
                        seed: builtin.seed,
                    })
                    .collect();
                let filter = AffixFilter::new(*position, keywords, categories);
                let result = affixes::copy_affixes(
                    &builtins,
                    spec,
                    filter,
                    *enforce_affix_limits,
                    resolver,
                );
                with_validation(result, spec, resolver)
            }
            LootMutation::CloneLevel { source_index } => {
                let Some(source) = clone_source(*source_index, resolver) else {
                    return MutationResults::ERROR;
                };
                set_level(spec, source.level, resolver)
            }
            LootMutation::CloneSeed { source_index } => {
                let Some(source) = clone_source(*source_index, resolver) else {
                    return MutationResults::ERROR;
                };
                spec.seed = source.seed;
                MutationResults::CHANGED
            }
            LootMutation::DropAffixes {
                position,
                keywords,
                categories,
            } => {
                let filter = AffixFilter::new(*position, keywords, categories);
                let result = affixes::drop_affixes(spec, filter, registry);
                with_validation(result, spec, resolver)
            }
            LootMutation::Eval(formula) => eval_mutation(formula, spec, resolver),
            LootMutation::MutateBinding(binding) => mutate_binding(*binding, spec),
            LootMutation::MutateLevel => {
                let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
                set_level(spec, level, resolver)
            }
            LootMutation::MutateRank { rank } => mutate_rank(*rank, spec, resolver),
            LootMutation::MutateRarity { reroll_affix_count } => {
                mutate_rarity(*reroll_affix_count, spec, settings, resolver)
            }
            LootMutation::MutateSlot { slot } => mutate_slot(*slot, spec, resolver),
            LootMutation::MutateAffixSeed {
                position,
                keywords,
                categories,
            } => {
                let filter = AffixFilter::new(*position, keywords, categories);
                let mut changed = false;
                for affix in &mut spec.affixes {
                    let Some(proto) = registry.affix(affix.affix) else {
                        return MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_STATS;
                    };
                    if proto.position == AffixPosition::Metadata || !filter.matches(proto) {
                        continue;
                    }
                    affix.seed = roll_seed(resolver.rng());
                    changed = true;
                }
                if changed {
                    MutationResults::CHANGED | MutationResults::AFFIX_CHANGE
                } else {
                    MutationResults::empty()
                }
            }
            LootMutation::MutateBuiltinSeed => {
                spec.seed = roll_seed(resolver.rng());
                MutationResults::CHANGED
            }
            LootMutation::OffsetLootLevel { offset } => {
                let level = resolver.resolve_level(spec.level.saturating_add(*offset), true);
                set_level(spec, level, resolver)
            }
            LootMutation::ReplaceAffixes {
                source_index,
                position,
                keywords,
                categories,
                enforce_affix_limits,
            } => {
                let Some(source) = clone_source(*source_index, resolver) else {
                    return MutationResults::ERROR;
                };
                let filter = AffixFilter::new(*position, keywords, categories);
                let mut result = affixes::drop_affixes(spec, filter, registry);
                result |= affixes::copy_affixes(
                    &source.affixes,
                    spec,
                    filter,
                    *enforce_affix_limits,
                    resolver,
                );
                with_validation(result, spec, resolver)
            }
        }
    }
}

// ============================================================
// Pipeline
// ============================================================

/// Run `mutations` in order on a copy of `spec`
///
/// Returns the mutated spec, or the original one when any mutation errors.
pub fn apply_mutations<'r>(
    spec: ItemSpec,
    mutations: &[LootMutation],
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> (ItemSpec, MutationResults) {
    let mut trace = RollTrace::new(spec.item);
    trace.advance(RollState::Drafting);
    apply_mutations_traced(spec, mutations, settings, resolver, &mut trace)
}

pub fn apply_mutations_traced<'r>(
    spec: ItemSpec,
    mutations: &[LootMutation],
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
    trace: &mut RollTrace,
) -> (ItemSpec, MutationResults) {
    if mutations.is_empty() {
        return (spec, MutationResults::empty());
    }
    let _span =
        tracing::debug_span!("mutations", item = ?spec.item, count = mutations.len()).entered();

    let mut working = spec.clone();
    let mut outcome = MutationResults::empty();
    for mutation in mutations {
        trace.advance(RollState::Mutating);
        outcome |= mutation.mutate(&mut working, settings, resolver);
        if outcome.is_error() {
            debug!(
                mutation = mutation.name(),
                result = ?outcome,
                "mutation failed, draft restored"
            );
            return (spec, outcome);
        }
    }
    (working, outcome)
}

// ============================================================
// Helpers
// ============================================================

fn clone_source<'r>(source_index: i32, resolver: &dyn ItemResolver<'r>) -> Option<ItemSpec> {
    let source = usize::try_from(source_index)
        .ok()
        .and_then(|index| resolver.clone_source(index));
    if source.is_none() {
        warn!(source_index, "mutation source item missing");
    }
    source
}

fn with_validation<'r>(
    result: MutationResults,
    spec: &mut ItemSpec,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if result.is_error() {
        return result;
    }
    result | update_affixes(spec, AffixBehavior::Keep, None, resolver)
}

/// Re-run the draft's restriction checks and validate its affixes
fn finalize<'r>(spec: &mut ItemSpec, resolver: &mut dyn ItemResolver<'r>) -> MutationResults {
    let flags = spec.restriction_flags;
    if !resolver.check_item(spec, flags, true) {
        return MutationResults::ERROR;
    }
    update_affixes(spec, AffixBehavior::Keep, None, resolver)
}

fn set_level<'r>(
    spec: &mut ItemSpec,
    level: i32,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if spec.level == level {
        return MutationResults::empty();
    }
    spec.level = level;
    spec.rank = 0;
    finalize(spec, resolver) | MutationResults::CHANGED
}

fn mutate_binding(binding: LootBindingType, spec: &mut ItemSpec) -> MutationResults {
    let changed = match binding {
        LootBindingType::None => {
            let changed = spec.set_binding_state(false, PrototypeId::INVALID);
            if changed {
                spec.restriction_flags -= RestrictionTestFlags::USABLE_BY;
            }
            changed
        }
        LootBindingType::TradeRestricted => spec.set_trade_restricted(true, false),
        LootBindingType::TradeRestrictedRemoveBinding => {
            let changed = spec.set_trade_restricted(true, true);
            if changed {
                spec.restriction_flags -= RestrictionTestFlags::USABLE_BY;
            }
            changed
        }
        LootBindingType::Avatar => {
            let avatar = if spec.equippable_by.is_valid() {
                spec.equippable_by
            } else {
                spec.roll_for
            };
            spec.set_binding_state(true, avatar)
        }
    };
    if changed {
        MutationResults::CHANGED
    } else {
        MutationResults::empty()
    }
}

fn eval_mutation<'r>(
    formula: &EvalNode,
    spec: &mut ItemSpec,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    spec.properties
        .set(PropertyEnum::ITEM_LEVEL, PropertyValue::Integer(i64::from(spec.level)));
    spec.properties
        .set(PropertyEnum::ITEM_RARITY, PropertyValue::Prototype(spec.rarity));
    spec.properties
        .set(PropertyEnum::ITEM_SEED, PropertyValue::Integer(i64::from(spec.seed)));

    let registry = resolver.registry();
    let value = {
        let mut ctx = EvalContext::new().with_registry(registry).with_rng(resolver.rng());
        ctx.set_properties_mut(ContextSlot::Default, &mut spec.properties);
        eval::run(formula, &mut ctx)
    };
    if value.is_error() {
        warn!(item = ?spec.item, %value, "item eval failed");
        return MutationResults::ERROR;
    }

    let level = spec
        .properties
        .get_int(PropertyEnum::ITEM_LEVEL)
        .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    if level == spec.level {
        return MutationResults::EVAL_CHANGE;
    }
    let level = resolver.resolve_level(level, true);
    set_level(spec, level, resolver) | MutationResults::EVAL_CHANGE
}

fn accept_item<'r>(
    spec: &mut ItemSpec,
    mut candidate: ItemSpec,
    item: &ItemPrototype,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    candidate.item = item.id;
    candidate.slot = item.slot;
    if !resolver.check_item(&mut candidate, RestrictionTestFlags::LEVEL, true) {
        return MutationResults::ERROR;
    }
    let prototype_changed = candidate.item != spec.item;
    *spec = candidate;
    let mut result = finalize(spec, resolver) | MutationResults::CHANGED;
    if prototype_changed {
        result |= MutationResults::ITEM_PROTOTYPE_CHANGE;
    }
    result
}

fn mutate_rank<'r>(
    rank: i32,
    spec: &mut ItemSpec,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if rank == 0 {
        warn!(item = ?spec.item, "rank mutation to rank 0");
        return MutationResults::ERROR;
    }
    if spec.rank == rank {
        return MutationResults::empty();
    }
    let registry = resolver.registry();
    let parent = registry.parent_of(spec.item);
    let candidates: Vec<&ItemPrototype> = if spec.slot.is_gear() {
        registry.concrete_items_for_slot(spec.slot, spec.roll_for)
    } else if parent.is_valid() {
        registry.concrete_items_under(parent)
    } else {
        registry.item(spec.item).into_iter().collect()
    };

    let candidate = ItemSpec {
        rank,
        ..spec.clone()
    };
    let flags = RestrictionTestFlags::ALL - RestrictionTestFlags::LEVEL;
    let Some(item) = pick_valid_item(&candidates, &candidate, spec.roll_for, flags, resolver) else {
        debug!(item = ?spec.item, rank, "no item fits the requested rank");
        return MutationResults::ERROR;
    };
    accept_item(spec, candidate, item, resolver)
}

fn mutate_rarity<'r>(
    reroll_affix_count: bool,
    spec: &mut ItemSpec,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    let registry = resolver.registry();
    let item = registry.item(spec.item);
    let rarity = resolver.resolve_rarity(&settings.rarities, spec.level, item);
    if !rarity.is_valid() {
        return MutationResults::ERROR;
    }
    if rarity == spec.rarity {
        return MutationResults::empty();
    }
    spec.rarity = rarity;
    let flags = spec.restriction_flags;
    if !resolver.check_item(spec, flags, true) {
        return MutationResults::ERROR;
    }

    let affixes = if reroll_affix_count {
        spec.affixes.retain(|affix| {
            registry
                .affix(affix.affix)
                .map_or(true, |proto| !proto.position.is_rolled_by_count())
        });
        update_affixes(spec, AffixBehavior::Roll, Some(settings), resolver)
    } else {
        update_affixes(spec, AffixBehavior::Keep, None, resolver)
    };
    affixes | MutationResults::CHANGED
}

fn mutate_slot<'r>(
    slot: EquipmentSlot,
    spec: &mut ItemSpec,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if spec.slot == slot {
        return MutationResults::empty();
    }
    let registry = resolver.registry();
    let parent = registry.parent_of(spec.item);
    let candidates: Vec<&ItemPrototype> = registry
        .concrete_items_for_slot(slot, spec.roll_for)
        .into_iter()
        .filter(|item| !parent.is_valid() || registry.is_child_of(item.id, parent))
        .collect();

    let candidate = ItemSpec {
        slot,
        ..spec.clone()
    };
    let flags = spec.restriction_flags - RestrictionTestFlags::LEVEL;
    let Some(item) = pick_valid_item(&candidates, &candidate, spec.roll_for, flags, resolver) else {
        debug!(item = ?spec.item, ?slot, "no item fits the requested slot");
        return MutationResults::ERROR;
    };
    accept_item(spec, candidate, item, resolver)
}
