//! Item prototypes and their drop restrictions.
//!
//! A restriction either allows a draft as-is or (when enforcing) adjusts the
//! draft's level/rarity/rank/slot until it is allowed.

use serde::{Deserialize, Serialize};

use crate::affix::{AffixLimits, LootContext};
use crate::mutation::ItemSpec;

use super::{PrototypeId, PrototypeRegistry};

bitflags::bitflags! {
    /// Which restriction checks apply to a draft
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RestrictionTestFlags: u32 {
        const LEVEL = 1 << 0;
        const RARITY = 1 << 1;
        const RANK = 1 << 2;
        const SLOT = 1 << 3;
        const ITEM_TYPE = 1 << 4;
        const USABLE_BY = 1 << 5;
        const VISUAL_AFFIX = 1 << 6;
        const ITEM_PARENT = 1 << 7;
        const COOLDOWN = 1 << 8;
        const OUTPUT = 1 << 9;
        const OUTPUT_LEVEL = 1 << 10;
        const OUTPUT_RARITY = 1 << 11;
        const OUTPUT_RANK = 1 << 12;

        const ALL = Self::LEVEL.bits()
            | Self::RARITY.bits()
            | Self::RANK.bits()
            | Self::SLOT.bits()
            | Self::ITEM_TYPE.bits()
            | Self::USABLE_BY.bits()
            | Self::VISUAL_AFFIX.bits()
            | Self::ITEM_PARENT.bits()
            | Self::COOLDOWN.bits();
    }
}

impl Default for RestrictionTestFlags {
    fn default() -> Self {
        RestrictionTestFlags::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum EquipmentSlot {
    #[default]
    Invalid,
    Costume,
    Gear01,
    Gear02,
    Gear03,
    Gear04,
    Gear05,
    Artifact01,
    Artifact02,
    Artifact03,
    Artifact04,
    Legendary,
    Ring,
    Medal,
    Insignia,
    TeamUpGear,
}

impl EquipmentSlot {
    /// Slots that map to avatar gear inventories
    pub fn is_gear(&self) -> bool {
        !matches!(self, EquipmentSlot::Invalid | EquipmentSlot::Costume)
    }
}

fn default_level_range() -> i32 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropRestriction {
    /// Level in `[level_min, level_min + level_range]`, open-ended when range < 0
    Level {
        level_min: i32,
        #[serde(default = "default_level_range")]
        level_range: i32,
    },
    /// Allowed rarities, lowest tier first
    Rarity { allowed: Vec<PrototypeId> },
    Rank { allowed: Vec<i32> },
    Slot { allowed: Vec<EquipmentSlot> },
    UsableBy { avatars: Vec<PrototypeId> },
    ItemParent { allowed: Vec<PrototypeId> },
    Context { allowed: LootContext },
    OutputLevel { value: i32, use_as_filter: bool },
    OutputRarity { value: PrototypeId, use_as_filter: bool },
    OutputRank { value: i32, use_as_filter: bool },
    /// `apply` when the roll context is inside `contexts`, else `otherwise`
    Conditional {
        contexts: LootContext,
        #[serde(default)]
        apply: Vec<DropRestriction>,
        #[serde(default)]
        otherwise: Vec<DropRestriction>,
    },
}

impl DropRestriction {
    pub fn post_process(&mut self) {
        match self {
            DropRestriction::Level {
                level_min,
                level_range,
            } => {
                *level_min = (*level_min).max(1);
                *level_range = (*level_range).max(-1);
            }
            DropRestriction::Conditional {
                apply, otherwise, ..
            } => {
                apply.iter_mut().for_each(DropRestriction::post_process);
                otherwise.iter_mut().for_each(DropRestriction::post_process);
            }
            _ => {}
        }
    }

    pub fn allow(
        &self,
        spec: &ItemSpec,
        context: LootContext,
        flags: RestrictionTestFlags,
        registry: &dyn PrototypeRegistry,
    ) -> bool {
        match self {
            DropRestriction::Level {
                level_min,
                level_range,
            } => {
                if !flags.contains(RestrictionTestFlags::LEVEL) {
                    return true;
                }
                spec.level >= *level_min
                    && (*level_range < 0 || spec.level <= level_min + level_range)
            }
            DropRestriction::Rarity { allowed } => {
                !flags.contains(RestrictionTestFlags::RARITY) || allowed.contains(&spec.rarity)
            }
            DropRestriction::Rank { allowed } => {
                !flags.contains(RestrictionTestFlags::RANK) || allowed.contains(&spec.rank)
            }
            DropRestriction::Slot { allowed } => {
                if allowed.is_empty() {
                    return false;
                }
                !flags.contains(RestrictionTestFlags::SLOT) || allowed.contains(&spec.slot)
            }
            DropRestriction::UsableBy { avatars } => {
                if avatars.is_empty() {
                    return false;
                }
                if !flags.contains(RestrictionTestFlags::USABLE_BY) {
                    return true;
                }
                !spec.roll_for.is_valid() || avatars.contains(&spec.roll_for)
            }
            DropRestriction::ItemParent { allowed } => {
                if allowed.is_empty() {
                    return false;
                }
                if !flags.contains(RestrictionTestFlags::ITEM_PARENT) {
                    return true;
                }
                allowed
                    .iter()
                    .any(|parent| registry.is_child_of(spec.item, *parent))
            }
            DropRestriction::Context { allowed } => allowed.contains(context),
            DropRestriction::OutputLevel {
                value,
                use_as_filter,
            } => {
                !use_as_filter
                    || !flags.contains(RestrictionTestFlags::LEVEL)
                    || spec.level == *value
            }
            DropRestriction::OutputRarity {
                value,
                use_as_filter,
            } => {
                !use_as_filter
                    || !flags.contains(RestrictionTestFlags::RARITY)
                    || spec.rarity == *value
            }
            DropRestriction::OutputRank {
                value,
                use_as_filter,
            } => {
                !use_as_filter || !flags.contains(RestrictionTestFlags::RANK) || spec.rank == *value
            }
            DropRestriction::Conditional {
                contexts,
                apply,
                otherwise,
            } => {
                let branch = if contexts.contains(context) { apply } else { otherwise };
                branch
                    .iter()
                    .all(|r| r.allow(spec, context, flags, registry))
            }
        }
    }

    /// Make `spec` satisfy this restriction where `flags` permits it
    pub fn adjust(
        &self,
        spec: &mut ItemSpec,
        context: LootContext,
        adjusted: &mut RestrictionTestFlags,
        flags: RestrictionTestFlags,
        registry: &dyn PrototypeRegistry,
    ) -> bool {
        match self {
            DropRestriction::Level {
                level_min,
                level_range,
            } => {
                if self.allow(spec, context, flags, registry) {
                    return true;
                }
                if adjusted.contains(RestrictionTestFlags::OUTPUT_LEVEL)
                    || flags.contains(RestrictionTestFlags::OUTPUT)
                {
                    return true;
                }
                if !flags.contains(RestrictionTestFlags::LEVEL) {
                    return false;
                }
                spec.level = spec.level.max(*level_min);
                if *level_range >= 0 {
                    spec.level = spec.level.min(level_min + level_range);
                }
                *adjusted |= RestrictionTestFlags::LEVEL;
                true
            }
            DropRestriction::Rarity { allowed } => {
                if self.allow(spec, context, flags, registry) {
                    return true;
                }
                if adjusted.contains(RestrictionTestFlags::OUTPUT_RARITY)
                    || flags.contains(RestrictionTestFlags::OUTPUT)
                {
                    return true;
                }
                if !flags.contains(RestrictionTestFlags::RARITY) {
                    return false;
                }
                let (Some(lowest), Some(highest)) = (allowed.first(), allowed.last()) else {
                    return false;
                };
                *adjusted |= RestrictionTestFlags::RARITY;
                spec.rarity = clamp_rarity(spec.rarity, allowed, *lowest, *highest, registry);
                true
            }
            DropRestriction::Rank { allowed } => {
                if self.allow(spec, context, flags, registry) && spec.rank != 0 {
                    return true;
                }
                if adjusted.contains(RestrictionTestFlags::OUTPUT_RANK)
                    || flags.contains(RestrictionTestFlags::OUTPUT)
                {
                    return true;
                }
                if !flags.contains(RestrictionTestFlags::RANK) {
                    return false;
                }
                match allowed.iter().max() {
                    Some(rank) => {
                        spec.rank = *rank;
                        *adjusted |= RestrictionTestFlags::RANK;
                        true
                    }
                    None => false,
                }
            }
            DropRestriction::Slot { allowed } => {
                if self.allow(spec, context, flags, registry) {
                    return true;
                }
                if flags.contains(RestrictionTestFlags::OUTPUT) {
                    return true;
                }
                if !flags.contains(RestrictionTestFlags::SLOT) {
                    return false;
                }
                match allowed.first() {
                    Some(slot) => {
                        spec.slot = *slot;
                        *adjusted |= RestrictionTestFlags::SLOT;
                        true
                    }
                    None => false,
                }
            }
            DropRestriction::OutputLevel { value, .. } => {
                if flags.contains(RestrictionTestFlags::LEVEL) {
                    *adjusted |= RestrictionTestFlags::OUTPUT_LEVEL;
                    if spec.level != *value {
                        spec.level = *value;
                        *adjusted |= RestrictionTestFlags::LEVEL;
                    }
                }
                true
            }
            DropRestriction::OutputRarity { value, .. } => {
                if flags.contains(RestrictionTestFlags::RARITY) {
                    *adjusted |= RestrictionTestFlags::OUTPUT_RARITY;
                    if spec.rarity != *value {
                        spec.rarity = *value;
                        *adjusted |= RestrictionTestFlags::RARITY;
                    }
                }
                true
            }
            DropRestriction::OutputRank { value, .. } => {
                if flags.contains(RestrictionTestFlags::RANK) {
                    *adjusted |= RestrictionTestFlags::OUTPUT_RANK;
                    if spec.rank != *value {
                        spec.rank = *value;
                        *adjusted |= RestrictionTestFlags::RANK;
                    }
                }
                true
            }
            DropRestriction::Conditional {
                contexts,
                apply,
                otherwise,
            } => {
                let branch = if contexts.contains(context) { apply } else { otherwise };
                branch
                    .iter()
                    .all(|r| r.adjust(spec, context, adjusted, flags, registry))
            }
            DropRestriction::UsableBy { .. }
            | DropRestriction::ItemParent { .. }
            | DropRestriction::Context { .. } => {
                flags.contains(RestrictionTestFlags::OUTPUT)
                    || self.allow(spec, context, flags, registry)
            }
        }
    }
}

/// Move `rarity` into the allowed list: clamp by tier, else walk downgrades
fn clamp_rarity(
    rarity: PrototypeId,
    allowed: &[PrototypeId],
    lowest: PrototypeId,
    highest: PrototypeId,
    registry: &dyn PrototypeRegistry,
) -> PrototypeId {
    let Some(current) = registry.rarity(rarity) else {
        return lowest;
    };
    let tier = current.tier(registry);
    let lowest_tier = registry.rarity(lowest).map(|r| r.tier(registry)).unwrap_or(1);
    if tier < lowest_tier {
        return lowest;
    }
    let highest_tier = registry
        .rarity(highest)
        .map(|r| r.tier(registry))
        .unwrap_or(lowest_tier);
    if tier > highest_tier {
        return highest;
    }
    let mut steps = 0;
    let mut next = current.downgrade_to;
    while next.is_valid() && steps < allowed.len() + 16 {
        if allowed.contains(&next) {
            return next;
        }
        match registry.rarity(next) {
            Some(r) => next = r.downgrade_to,
            None => break,
        }
        steps += 1;
    }
    lowest
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinAffix {
    pub affix: PrototypeId,
    #[serde(default)]
    pub scope: PrototypeId,
    #[serde(default)]
    pub seed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: PrototypeId,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub slot: EquipmentSlot,
    /// Avatars that may equip the item. Empty allows everyone.
    #[serde(default)]
    pub usable_by: Vec<PrototypeId>,
    #[serde(default)]
    pub builtin_affixes: Vec<BuiltinAffix>,
    #[serde(default)]
    pub affix_limits: Vec<AffixLimits>,
    #[serde(default)]
    pub drop_restrictions: Vec<DropRestriction>,
}

impl ItemPrototype {
    pub fn post_process(&mut self) {
        self.affix_limits
            .iter_mut()
            .for_each(AffixLimits::post_process);
        self.drop_restrictions
            .iter_mut()
            .for_each(DropRestriction::post_process);
    }

    pub fn get_affix_limits(
        &self,
        rarity: PrototypeId,
        context: LootContext,
    ) -> Option<&AffixLimits> {
        self.affix_limits.iter().find(|l| l.matches(rarity, context))
    }

    pub fn is_usable_by(&self, avatar: PrototypeId) -> bool {
        self.usable_by.is_empty() || self.usable_by.contains(&avatar)
    }

    /// Avatar this item should be rolled for
    pub fn roll_for_avatar(&self, requested: PrototypeId) -> PrototypeId {
        if self.is_usable_by(requested) {
            requested
        } else {
            self.usable_by.first().copied().unwrap_or(requested)
        }
    }

    pub fn is_droppable_for_restrictions(
        &self,
        spec: &ItemSpec,
        context: LootContext,
        flags: RestrictionTestFlags,
        registry: &dyn PrototypeRegistry,
    ) -> bool {
        if self.is_abstract {
            return false;
        }
        if flags.contains(RestrictionTestFlags::USABLE_BY)
            && spec.roll_for.is_valid()
            && !self.is_usable_by(spec.roll_for)
        {
            return false;
        }
        if flags.contains(RestrictionTestFlags::SLOT)
            && spec.slot.is_gear()
            && self.slot.is_gear()
            && spec.slot != self.slot
        {
            return false;
        }
        self.drop_restrictions
            .iter()
            .all(|r| r.allow(spec, context, flags, registry))
    }

    /// Adjust `spec` until every restriction passes
    pub fn make_restrictions_droppable(
        &self,
        spec: &mut ItemSpec,
        context: LootContext,
        flags: RestrictionTestFlags,
        registry: &dyn PrototypeRegistry,
    ) -> Option<RestrictionTestFlags> {
        if self.is_abstract {
            return None;
        }
        let mut adjusted = RestrictionTestFlags::empty();
        for restriction in &self.drop_restrictions {
            if !restriction.adjust(spec, context, &mut adjusted, flags, registry) {
                return None;
            }
        }
        // Adjusting one field can invalidate another restriction
        self.is_droppable_for_restrictions(spec, context, flags, registry)
            .then_some(adjusted)
    }
}
