//! Roll modifiers attached to loot nodes.
//!
//! Each modifier edits the branch's `LootRollSettings` before the node
//! rolls. Requirement modifiers never fail directly; they set a restriction
//! bit and the node refuses to roll when any restriction bit is present.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::affix::AffixPosition;
use crate::constants::DEFAULT_EVAL_EPSILON;
use crate::eval::{self, ContextSlot, EvalContext, EvalNode, EvalValue};
use crate::properties::{PropertyCollection, PropertyEnum, PropertyValue};
use crate::registry::{CurveId, PrototypeId};

use super::node::LootNodeKind;
use super::resolver::{ItemResolver, MissionState};
use super::settings::{
    CooldownGate, CooldownKind, LootDropChanceModifiers, LootRollSettings, Weekday,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LootRollModifier {
    /// A zero bound is ignored
    ClampLevel { min: i32, max: i32 },
    RequireLevel { min: i32, max: i32 },
    OffsetLevel(i32),
    MarkSpecial,
    UnmarkSpecial,
    MarkRare,
    UnmarkRare,
    OnceDaily {
        channel: PrototypeId,
        #[serde(default)]
        per_account: bool,
    },
    CooldownOncePerRollover {
        channel: PrototypeId,
        #[serde(default)]
        per_account: bool,
    },
    CooldownByChannel {
        channel: PrototypeId,
        #[serde(default)]
        per_account: bool,
    },
    SetAvatar(PrototypeId),
    SetItemLevel(i32),
    ModifyAffixLimits {
        #[serde(default)]
        position: AffixPosition,
        #[serde(default)]
        category: PrototypeId,
        #[serde(default)]
        modify_min_by: i16,
        #[serde(default)]
        modify_max_by: i16,
    },
    SetRarity(Vec<PrototypeId>),
    SetUsable(f32),
    UseLevelVerbatim(bool),
    RequireDifficultyTier(Vec<PrototypeId>),
    ModifyDropByDifficultyTier(CurveId),
    RequireConditionKeyword(Vec<PrototypeId>),
    ForbidConditionKeyword(Vec<PrototypeId>),
    RequireDropperKeyword(Vec<PrototypeId>),
    ForbidDropperKeyword(Vec<PrototypeId>),
    RequireRegionKeyword(Vec<PrototypeId>),
    ForbidRegionKeyword(Vec<PrototypeId>),
    RequireRegionScenarioRarity(Vec<PrototypeId>),
    RequireKillCount(i32),
    RequireWeekday(Vec<Weekday>),
    IgnoreCooldown,
    IgnoreVendorXpCap,
    IncludeCurrencyBonus,
    SetRegionAffixTable(PrototypeId),
    MissionStateRequired {
        missions: Vec<PrototypeId>,
        state: MissionState,
    },
    /// Bool result gates directly; a number is a drop chance in `[0,1]`
    EvalChance(EvalNode),
}

fn any_keyword(required: &[PrototypeId], present: &BTreeSet<PrototypeId>) -> bool {
    required.iter().any(|k| present.contains(k))
}

fn restrict_unless(settings: &mut LootRollSettings, passed: bool, flag: LootDropChanceModifiers) {
    if !passed {
        settings.drop_chance_modifiers |= flag;
    }
}

impl LootRollModifier {
    pub fn name(&self) -> &'static str {
        match self {
            LootRollModifier::ClampLevel { .. } => "ClampLevel",
            LootRollModifier::RequireLevel { .. } => "RequireLevel",
            LootRollModifier::OffsetLevel(_) => "OffsetLevel",
            LootRollModifier::MarkSpecial => "MarkSpecial",
            LootRollModifier::UnmarkSpecial => "UnmarkSpecial",
            LootRollModifier::MarkRare => "MarkRare",
            LootRollModifier::UnmarkRare => "UnmarkRare",
            LootRollModifier::OnceDaily { .. } => "OnceDaily",
            LootRollModifier::CooldownOncePerRollover { .. } => "CooldownOncePerRollover",
            LootRollModifier::CooldownByChannel { .. } => "CooldownByChannel",
            LootRollModifier::SetAvatar(_) => "SetAvatar",
            LootRollModifier::SetItemLevel(_) => "SetItemLevel",
            LootRollModifier::ModifyAffixLimits { .. } => "ModifyAffixLimits",
            LootRollModifier::SetRarity(_) => "SetRarity",
            LootRollModifier::SetUsable(_) => "SetUsable",
            LootRollModifier::UseLevelVerbatim(_) => "UseLevelVerbatim",
            LootRollModifier::RequireDifficultyTier(_) => "RequireDifficultyTier",
            LootRollModifier::ModifyDropByDifficultyTier(_) => "ModifyDropByDifficultyTier",
            LootRollModifier::RequireConditionKeyword(_) => "RequireConditionKeyword",
            LootRollModifier::ForbidConditionKeyword(_) => "ForbidConditionKeyword",
            LootRollModifier::RequireDropperKeyword(_) => "RequireDropperKeyword",
            LootRollModifier::ForbidDropperKeyword(_) => "ForbidDropperKeyword",
            LootRollModifier::RequireRegionKeyword(_) => "RequireRegionKeyword",
            LootRollModifier::ForbidRegionKeyword(_) => "ForbidRegionKeyword",
            LootRollModifier::RequireRegionScenarioRarity(_) => "RequireRegionScenarioRarity",
            LootRollModifier::RequireKillCount(_) => "RequireKillCount",
            LootRollModifier::RequireWeekday(_) => "RequireWeekday",
            LootRollModifier::IgnoreCooldown => "IgnoreCooldown",
            LootRollModifier::IgnoreVendorXpCap => "IgnoreVendorXpCap",
            LootRollModifier::IncludeCurrencyBonus => "IncludeCurrencyBonus",
            LootRollModifier::SetRegionAffixTable(_) => "SetRegionAffixTable",
            LootRollModifier::MissionStateRequired { .. } => "MissionStateRequired",
            LootRollModifier::EvalChance(_) => "EvalChance",
        }
    }

    pub fn post_process(&mut self) {
        if let LootRollModifier::SetUsable(usable) = self {
            *usable = if usable.is_nan() { 0.0 } else { usable.clamp(0.0, 1.0) };
        }
    }

    /// Table-only modifiers on other nodes are reported by content validation
    pub fn is_valid_for_node(&self, node: &LootNodeKind) -> bool {
        match self {
            LootRollModifier::MarkSpecial
            | LootRollModifier::UnmarkSpecial
            | LootRollModifier::MarkRare
            | LootRollModifier::UnmarkRare
            | LootRollModifier::OnceDaily { .. }
            | LootRollModifier::CooldownOncePerRollover { .. }
            | LootRollModifier::CooldownByChannel { .. }
            | LootRollModifier::RequireDifficultyTier(_)
            | LootRollModifier::ModifyDropByDifficultyTier(_)
            | LootRollModifier::RequireConditionKeyword(_)
            | LootRollModifier::ForbidConditionKeyword(_)
            | LootRollModifier::RequireDropperKeyword(_)
            | LootRollModifier::ForbidDropperKeyword(_)
            | LootRollModifier::RequireRegionKeyword(_)
            | LootRollModifier::ForbidRegionKeyword(_)
            | LootRollModifier::RequireRegionScenarioRarity(_)
            | LootRollModifier::RequireKillCount(_)
            | LootRollModifier::RequireWeekday(_) => node.is_table(),
            LootRollModifier::IncludeCurrencyBonus => node.is_table() || node.is_drop(),
            _ => true,
        }
    }

    pub fn apply<'r>(&self, settings: &mut LootRollSettings, resolver: &mut dyn ItemResolver<'r>) {
        type Flags = LootDropChanceModifiers;
        match self {
            LootRollModifier::ClampLevel { min, max } => {
                if *min > 0 && settings.level < *min {
                    settings.level = *min;
                } else if *max > 0 && settings.level > *max {
                    settings.level = *max;
                }
            }
            LootRollModifier::RequireLevel { min, max } => {
                let level = settings.level_for_requirement_check;
                let passed = (*min <= 0 || level >= *min) && (*max <= 0 || level <= *max);
                restrict_unless(settings, passed, Flags::LEVEL_RESTRICTED);
            }
            LootRollModifier::OffsetLevel(offset) => {
                settings.level = settings.level.saturating_add(*offset);
            }
            LootRollModifier::MarkSpecial => {
                settings.drop_chance_modifiers |= Flags::SPECIAL_ITEM_FIND
            }
            LootRollModifier::UnmarkSpecial => {
                settings.drop_chance_modifiers -= Flags::SPECIAL_ITEM_FIND
            }
            LootRollModifier::MarkRare => settings.drop_chance_modifiers |= Flags::RARE_ITEM_FIND,
            LootRollModifier::UnmarkRare => settings.drop_chance_modifiers -= Flags::RARE_ITEM_FIND,
            LootRollModifier::OnceDaily {
                channel,
                per_account,
            } => set_cooldown(settings, CooldownKind::OncePerXHours, *channel, *per_account),
            LootRollModifier::CooldownOncePerRollover {
                channel,
                per_account,
            } => set_cooldown(settings, CooldownKind::OncePerRollover, *channel, *per_account),
            LootRollModifier::CooldownByChannel {
                channel,
                per_account,
            } => set_cooldown(settings, CooldownKind::ByChannel, *channel, *per_account),
            LootRollModifier::SetAvatar(avatar) => {
                if avatar.is_valid() {
                    settings.usable_avatar = *avatar;
                    settings.force_usable = true;
                }
            }
            LootRollModifier::SetItemLevel(level) => {
                settings.level = *level;
                settings.use_level_verbatim = true;
            }
            LootRollModifier::ModifyAffixLimits {
                position,
                category,
                modify_min_by,
                modify_max_by,
            } => {
                if *position != AffixPosition::None {
                    let min = settings.affix_limit_min_by_position.entry(*position).or_insert(0);
                    *min = min.saturating_add(*modify_min_by);
                    let max = settings.affix_limit_max_by_position.entry(*position).or_insert(0);
                    *max = max.saturating_add(*modify_max_by);
                } else if category.is_valid() {
                    let delta = settings.affix_limit_by_category.entry(*category).or_insert(0);
                    *delta = delta.saturating_add(*modify_min_by);
                }
            }
            LootRollModifier::SetRarity(choices) => {
                if !choices.is_empty() {
                    settings.rarities = choices.iter().copied().collect();
                }
            }
            LootRollModifier::SetUsable(usable) => settings.usable_percent = *usable,
            LootRollModifier::UseLevelVerbatim(verbatim) => settings.use_level_verbatim = *verbatim,
            LootRollModifier::RequireDifficultyTier(choices) => {
                let tier = settings.difficulty_tier;
                let passed = choices.is_empty() || !tier.is_valid() || choices.contains(&tier);
                restrict_unless(settings, passed, Flags::DIFFICULTY_TIER_RESTRICTED);
            }
            LootRollModifier::ModifyDropByDifficultyTier(curve) => {
                modify_drop_by_difficulty_tier(settings, *curve, resolver);
            }
            LootRollModifier::RequireConditionKeyword(keywords) => {
                let passed = any_keyword(keywords, &settings.avatar_condition_keywords);
                restrict_unless(settings, passed, Flags::CONDITION_RESTRICTED);
            }
            LootRollModifier::ForbidConditionKeyword(keywords) => {
                let passed = !any_keyword(keywords, &settings.avatar_condition_keywords);
                restrict_unless(settings, passed, Flags::CONDITION_RESTRICTED);
            }
            LootRollModifier::RequireDropperKeyword(keywords) => {
                let passed = any_keyword(keywords, &settings.source_entity_keywords);
                restrict_unless(settings, passed, Flags::DROPPER_RESTRICTED);
            }
            LootRollModifier::ForbidDropperKeyword(keywords) => {
                let passed = !any_keyword(keywords, &settings.source_entity_keywords);
                restrict_unless(settings, passed, Flags::DROPPER_RESTRICTED);
            }
            LootRollModifier::RequireRegionKeyword(keywords) => {
                let passed = any_keyword(keywords, &settings.region_keywords);
                restrict_unless(settings, passed, Flags::REGION_RESTRICTED);
            }
            LootRollModifier::ForbidRegionKeyword(keywords) => {
                let passed = !any_keyword(keywords, &settings.region_keywords);
                restrict_unless(settings, passed, Flags::REGION_RESTRICTED);
            }
            LootRollModifier::RequireRegionScenarioRarity(choices) => {
                let passed = choices.contains(&settings.region_scenario_rarity);
                restrict_unless(settings, passed, Flags::REGION_RESTRICTED);
            }
            LootRollModifier::RequireKillCount(kills) => {
                if *kills <= 0 {
                    return;
                }
                if settings
                    .drop_chance_modifiers
                    .intersects(Flags::KILL_COUNT_REQUIREMENT_MET | Flags::KILL_COUNT_RESTRICTED)
                {
                    warn!(kills, "kill count requirement applied twice");
                }
                let flag = if settings.kill_count >= *kills {
                    Flags::KILL_COUNT_REQUIREMENT_MET
                } else {
                    Flags::KILL_COUNT_RESTRICTED
                };
                settings.drop_chance_modifiers |= flag;
            }
            LootRollModifier::RequireWeekday(days) => {
                if days.is_empty() {
                    return;
                }
                if settings.usable_weekday == Weekday::All {
                    warn!("weekday requirement without a current weekday");
                    return;
                }
                let passed = days.contains(&settings.usable_weekday);
                restrict_unless(settings, passed, Flags::WEEKDAY_RESTRICTED);
            }
            LootRollModifier::IgnoreCooldown => {
                settings.drop_chance_modifiers |= Flags::IGNORE_COOLDOWN
            }
            LootRollModifier::IgnoreVendorXpCap => {
                settings.drop_chance_modifiers |= Flags::IGNORE_CAP
            }
            LootRollModifier::IncludeCurrencyBonus => {
                settings.drop_chance_modifiers |= Flags::INCLUDE_CURRENCY_BONUS
            }
            LootRollModifier::SetRegionAffixTable(table) => {
                if table.is_valid() {
                    settings.region_affix_table = *table;
                }
            }
            LootRollModifier::MissionStateRequired { missions, state } => {
                let oracle = resolver.oracle();
                let passed = missions.iter().all(|m| oracle.mission_state(*m) == *state);
                restrict_unless(settings, passed, Flags::MISSION_RESTRICTED);
            }
            LootRollModifier::EvalChance(formula) => {
                let passed = eval_chance(formula, settings, resolver);
                restrict_unless(settings, passed, Flags::EVAL_RESTRICTED);
            }
        }
    }
}

fn set_cooldown(
    settings: &mut LootRollSettings,
    kind: CooldownKind,
    channel: PrototypeId,
    per_account: bool,
) {
    settings.drop_chance_modifiers |= match kind {
        CooldownKind::OncePerXHours => LootDropChanceModifiers::COOLDOWN_ONCE_PER_X_HOURS,
        CooldownKind::OncePerRollover => LootDropChanceModifiers::COOLDOWN_ONCE_PER_ROLLOVER,
        CooldownKind::ByChannel => LootDropChanceModifiers::COOLDOWN_BY_CHANNEL,
    };
    if per_account {
        settings.drop_chance_modifiers |= LootDropChanceModifiers::PER_ACCOUNT;
    }
    settings.cooldown = Some(CooldownGate {
        kind,
        channel,
        per_account,
    });
}

fn modify_drop_by_difficulty_tier<'r>(
    settings: &mut LootRollSettings,
    curve: CurveId,
    resolver: &mut dyn ItemResolver<'r>,
) {
    let registry = resolver.registry();
    let Some(tier) = registry.difficulty_tier(settings.difficulty_tier) else {
        return;
    };
    let Some(curve_data) = registry.curve(curve) else {
        warn!(curve = ?curve, "difficulty drop curve missing");
        return;
    };
    let modifier = curve_data.get_at(tier.tier);
    if (modifier - 1.0).abs() > DEFAULT_EVAL_EPSILON {
        settings.no_drop_modifier *= modifier;
        settings.drop_chance_modifiers |= LootDropChanceModifiers::DIFFICULTY_TIER_NO_DROP_MODIFIED;
    }
}

/// Formula sees the branch level and difficulty tier in its Default slot
fn eval_chance<'r>(
    formula: &EvalNode,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> bool {
    let mut props = PropertyCollection::new();
    props.set(PropertyEnum::ITEM_LEVEL, PropertyValue::Integer(i64::from(settings.level)));
    props.set(
        PropertyEnum::DIFFICULTY_TIER,
        PropertyValue::Prototype(settings.difficulty_tier),
    );

    let registry = resolver.registry();
    let value = {
        let mut ctx = EvalContext::new()
            .with_registry(registry)
            .with_rng(resolver.rng());
        ctx.set_owned_properties(ContextSlot::Default, props);
        eval::run(formula, &mut ctx)
    };

    match &value {
        EvalValue::Bool(passed) => *passed,
        EvalValue::Int(_) | EvalValue::Float(_) => {
            let chance = value.to_float().unwrap_or(0.0);
            resolver.rng().next_float() < chance
        }
        other => {
            warn!(result = %other, "drop chance formula did not produce a number");
            false
        }
    }
}
