//! Per-branch roll settings.
//!
//! A node's roll modifiers are applied to a copy of its parent's settings,
//! so a restriction or level offset only affects that subtree.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::affix::AffixPosition;
use crate::constants::DEFAULT_LOOT_LEVEL;
use crate::registry::{PrototypeId, RestrictionTestFlags};

bitflags::bitflags! {
    /// State and restrictions collected while applying roll modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LootDropChanceModifiers: u32 {
        const COOLDOWN_ONCE_PER_X_HOURS = 1 << 0;
        const COOLDOWN_ONCE_PER_ROLLOVER = 1 << 1;
        const COOLDOWN_BY_CHANNEL = 1 << 2;
        const SPECIAL_ITEM_FIND = 1 << 3;
        const PER_ACCOUNT = 1 << 4;
        const DIFFICULTY_MODE_RESTRICTED = 1 << 5;
        const REGION_RESTRICTED = 1 << 6;
        const KILL_COUNT_RESTRICTED = 1 << 7;
        const KILL_COUNT_REQUIREMENT_MET = 1 << 8;
        const PREVIEW_ONLY = 1 << 9;
        const WEEKDAY_RESTRICTED = 1 << 10;
        const CONDITION_RESTRICTED = 1 << 11;
        const DIFFICULTY_TIER_NO_DROP_MODIFIED = 1 << 12;
        const DIFFICULTY_TIER_RESTRICTED = 1 << 13;
        const IGNORE_COOLDOWN = 1 << 14;
        const IGNORE_CAP = 1 << 15;
        const LEVEL_RESTRICTED = 1 << 16;
        const RARE_ITEM_FIND = 1 << 17;
        const DROPPER_RESTRICTED = 1 << 18;
        const INCLUDE_CURRENCY_BONUS = 1 << 19;
        const MISSION_RESTRICTED = 1 << 20;
        const EVAL_RESTRICTED = 1 << 21;

        const RESTRICTIONS = Self::DIFFICULTY_MODE_RESTRICTED.bits()
            | Self::REGION_RESTRICTED.bits()
            | Self::KILL_COUNT_RESTRICTED.bits()
            | Self::WEEKDAY_RESTRICTED.bits()
            | Self::CONDITION_RESTRICTED.bits()
            | Self::DIFFICULTY_TIER_RESTRICTED.bits()
            | Self::LEVEL_RESTRICTED.bits()
            | Self::DROPPER_RESTRICTED.bits()
            | Self::MISSION_RESTRICTED.bits()
            | Self::EVAL_RESTRICTED.bits();

        const COOLDOWNS = Self::COOLDOWN_ONCE_PER_X_HOURS.bits()
            | Self::COOLDOWN_ONCE_PER_ROLLOVER.bits()
            | Self::COOLDOWN_BY_CHANNEL.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooldownKind {
    OncePerXHours,
    OncePerRollover,
    ByChannel,
}

/// Cooldown channel a branch is gated on; state is owned by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CooldownGate {
    pub kind: CooldownKind,
    pub channel: PrototypeId,
    pub per_account: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootRollSettings {
    pub depth: u32,
    pub drop_chance_modifiers: LootDropChanceModifiers,
    pub no_drop_modifier: f32,

    pub usable_avatar: PrototypeId,
    pub usable_team_up: PrototypeId,
    pub force_usable: bool,
    pub usable_percent: f32,

    pub level: i32,
    pub use_level_verbatim: bool,
    pub level_for_requirement_check: i32,

    pub difficulty_tier: PrototypeId,
    pub region_scenario_rarity: PrototypeId,
    pub region_affix_table: PrototypeId,
    pub kill_count: i32,
    pub usable_weekday: Weekday,

    pub rarities: BTreeSet<PrototypeId>,
    pub source_entity_keywords: BTreeSet<PrototypeId>,
    pub avatar_condition_keywords: BTreeSet<PrototypeId>,
    pub region_keywords: BTreeSet<PrototypeId>,

    pub affix_limit_min_by_position: BTreeMap<AffixPosition, i16>,
    pub affix_limit_max_by_position: BTreeMap<AffixPosition, i16>,
    pub affix_limit_by_category: BTreeMap<PrototypeId, i16>,

    pub cooldown: Option<CooldownGate>,
}

impl Default for LootRollSettings {
    fn default() -> Self {
        Self {
            depth: 0,
            drop_chance_modifiers: LootDropChanceModifiers::empty(),
            no_drop_modifier: 1.0,
            usable_avatar: PrototypeId::INVALID,
            usable_team_up: PrototypeId::INVALID,
            force_usable: false,
            usable_percent: 0.0,
            level: DEFAULT_LOOT_LEVEL,
            use_level_verbatim: false,
            level_for_requirement_check: DEFAULT_LOOT_LEVEL,
            difficulty_tier: PrototypeId::INVALID,
            region_scenario_rarity: PrototypeId::INVALID,
            region_affix_table: PrototypeId::INVALID,
            kill_count: 0,
            usable_weekday: Weekday::All,
            rarities: BTreeSet::new(),
            source_entity_keywords: BTreeSet::new(),
            avatar_condition_keywords: BTreeSet::new(),
            region_keywords: BTreeSet::new(),
            affix_limit_min_by_position: BTreeMap::new(),
            affix_limit_max_by_position: BTreeMap::new(),
            affix_limit_by_category: BTreeMap::new(),
            cooldown: None,
        }
    }
}

impl LootRollSettings {
    /// Settings for an avatar at `level`
    pub fn for_level(level: i32) -> Self {
        Self {
            level,
            level_for_requirement_check: level,
            ..Default::default()
        }
    }

    pub fn is_restricted_by_loot_roll_modifier(&self) -> bool {
        self.drop_chance_modifiers
            .intersects(LootDropChanceModifiers::RESTRICTIONS)
    }

    pub fn has_cooldown_modifier(&self) -> bool {
        self.drop_chance_modifiers
            .intersects(LootDropChanceModifiers::COOLDOWNS)
    }

    /// True when the cooldown gate must be asked and consumed
    pub fn enforces_cooldown(&self) -> bool {
        self.cooldown.is_some()
            && !self.drop_chance_modifiers.intersects(
                LootDropChanceModifiers::IGNORE_COOLDOWN | LootDropChanceModifiers::PREVIEW_ONLY,
            )
    }

    /// Restriction checks for an item drafted under these settings
    pub fn restriction_flags(&self) -> RestrictionTestFlags {
        let mut flags = RestrictionTestFlags::ALL;
        if !self.has_cooldown_modifier() {
            flags.remove(RestrictionTestFlags::COOLDOWN);
        }
        flags
    }
}
