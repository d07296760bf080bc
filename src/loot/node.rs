//! Loot tree nodes and their roll semantics.
//!
//! - `LootNode::select` applies the node's modifiers to a copy of the
//!   branch settings, refuses restricted branches, then rolls
//! - tables pick children by weight, try them in turn, or take them all
//! - drop nodes queue results on the resolver and process them

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::affix::LootContext;
use crate::constants::MAX_RARITY_DOWNGRADE_ATTEMPTS;
use crate::mutation::{self, ItemSpec, LootMutation, MutationResults};
use crate::picker::Picker;
use crate::registry::{CurveId, EquipmentSlot, ItemPrototype, PrototypeId, RestrictionTestFlags};

use super::modifiers::LootRollModifier;
use super::resolver::ItemResolver;
use super::results::{LootCallback, LootEffect, LootResult};
use super::settings::{LootDropChanceModifiers, LootRollSettings};
use super::LootRollResult;

fn default_one() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PickMethod {
    /// Draw with replacement, `num` times
    #[default]
    PickWeight,
    /// Draw without replacement until one choice succeeds, `num` times
    PickWeightTryAll,
    /// Roll every choice in order, `num` times
    PickAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    #[serde(default)]
    pub pick_method: PickMethod,
    #[serde(default)]
    pub no_drop_percent: f32,
    #[serde(default)]
    pub choices: Vec<LootNode>,
    #[serde(default = "default_one")]
    pub num_min: i32,
    #[serde(default = "default_one")]
    pub num_max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootActionKind {
    FirstTime,
    LoopOverAvatars,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootAction {
    pub kind: LootActionKind,
    /// Key the first-time grant is recorded under
    #[serde(default)]
    pub key: PrototypeId,
    pub target: Box<LootNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CharacterFilter {
    #[default]
    None,
    DropCurrentAvatarOnly,
    DropUnownedAvatarOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LootNodeKind {
    Table(LootTable),
    TableRef {
        table: PrototypeId,
        #[serde(default = "default_one")]
        num_min: i32,
        #[serde(default = "default_one")]
        num_max: i32,
    },
    Action(LootAction),
    Item {
        item: PrototypeId,
        #[serde(default = "default_one")]
        num_min: i32,
        #[serde(default = "default_one")]
        num_max: i32,
        #[serde(default)]
        mutations: Vec<LootMutation>,
    },
    ItemFilter {
        slot: EquipmentSlot,
        #[serde(default)]
        rank: i32,
        #[serde(default = "default_one")]
        num_min: i32,
        #[serde(default = "default_one")]
        num_max: i32,
    },
    Agent {
        agent: PrototypeId,
        #[serde(default = "default_one")]
        num_min: i32,
        #[serde(default = "default_one")]
        num_max: i32,
    },
    Credits(CurveId),
    Experience(CurveId),
    PowerPoints(i32),
    HealthBonus(i32),
    EnduranceBonus(i32),
    RealMoney {
        coupon_code: String,
        #[serde(default)]
        transaction_context: String,
        #[serde(default = "default_one")]
        num: i32,
    },
    CharacterToken {
        token_parent: PrototypeId,
        #[serde(default)]
        filter: CharacterFilter,
        #[serde(default)]
        on_unavailable: Option<Box<LootNode>>,
    },
    VanityTitle(PrototypeId),
    VendorXp {
        vendor: PrototypeId,
        xp: i32,
    },
    Clone {
        source_index: i32,
        #[serde(default)]
        mutations: Vec<LootMutation>,
    },
    Callback(LootCallback),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootNode {
    #[serde(default = "default_one")]
    pub weight: i32,
    #[serde(default)]
    pub modifiers: Vec<LootRollModifier>,
    pub kind: LootNodeKind,
}

impl LootNode {
    pub fn new(kind: LootNodeKind) -> Self {
        Self {
            weight: 1,
            modifiers: Vec::new(),
            kind,
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_modifier(mut self, modifier: LootRollModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn table(pick_method: PickMethod, choices: Vec<LootNode>) -> Self {
        Self::new(LootNodeKind::Table(LootTable {
            pick_method,
            no_drop_percent: 0.0,
            choices,
            num_min: 1,
            num_max: 1,
        }))
    }

    pub fn item(item: PrototypeId) -> Self {
        Self::new(LootNodeKind::Item {
            item,
            num_min: 1,
            num_max: 1,
            mutations: Vec::new(),
        })
    }

    /// Load-time normalisation of the whole subtree
    pub fn post_process(&mut self) {
        self.modifiers
            .iter_mut()
            .for_each(LootRollModifier::post_process);
        match &mut self.kind {
            LootNodeKind::Table(table) => {
                table.no_drop_percent = if table.no_drop_percent.is_nan() {
                    0.0
                } else {
                    table.no_drop_percent.clamp(0.0, 1.0)
                };
                table.num_max = table.num_max.max(table.num_min);
                table.choices.iter_mut().for_each(LootNode::post_process);
            }
            LootNodeKind::TableRef { num_min, num_max, .. }
            | LootNodeKind::ItemFilter { num_min, num_max, .. }
            | LootNodeKind::Agent { num_min, num_max, .. } => {
                *num_max = (*num_max).max(*num_min);
            }
            LootNodeKind::Item {
                num_min,
                num_max,
                mutations,
                ..
            } => {
                *num_max = (*num_max).max(*num_min);
                mutations.iter_mut().for_each(LootMutation::post_process);
            }
            LootNodeKind::Clone { mutations, .. } => {
                mutations.iter_mut().for_each(LootMutation::post_process);
            }
            LootNodeKind::Action(action) => action.target.post_process(),
            LootNodeKind::CharacterToken {
                on_unavailable: Some(node),
                ..
            } => node.post_process(),
            _ => {}
        }
    }

    /// Depth-first walk over this node and every descendant
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a LootNode)) {
        f(self);
        for child in self.kind.children() {
            child.visit(f);
        }
    }

    pub fn referenced_tables(&self) -> Vec<PrototypeId> {
        let mut tables = Vec::new();
        self.visit(&mut |node| {
            if let LootNodeKind::TableRef { table, .. } = &node.kind {
                tables.push(*table);
            }
        });
        tables
    }

    pub fn referenced_items(&self) -> Vec<PrototypeId> {
        let mut items = Vec::new();
        self.visit(&mut |node| {
            if let LootNodeKind::Item { item, .. } = &node.kind {
                items.push(*item);
            }
        });
        items
    }

    pub fn select<'r>(
        &self,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        if self.modifiers.is_empty() {
            return self.kind.roll(settings, resolver);
        }

        let mut modified = settings.clone();
        for modifier in &self.modifiers {
            modifier.apply(&mut modified, resolver);
        }
        if modified.is_restricted_by_loot_roll_modifier() {
            debug!(
                node = self.kind.name(),
                flags = ?modified.drop_chance_modifiers,
                "branch restricted"
            );
            return LootRollResult::FAILURE;
        }

        // The gate belongs to this node; descendants only see it if they set their own
        let enforce = modified.enforces_cooldown();
        let gate = modified.cooldown.take().filter(|_| enforce);
        if let Some(gate) = &gate {
            if resolver.oracle().is_on_cooldown(gate) {
                debug!(channel = ?gate.channel, "branch on cooldown");
                return LootRollResult::NO_ROLL;
            }
        }

        let result = self.kind.roll(&mut modified, resolver);
        if let Some(gate) = gate {
            if result.contains(LootRollResult::SUCCESS) {
                resolver.push_effect(LootEffect::ConsumeCooldown(gate));
            }
        }
        result
    }
}

fn roll_count<'r>(resolver: &mut dyn ItemResolver<'r>, num_min: i32, num_max: i32) -> i32 {
    if num_min == num_max {
        num_min
    } else {
        resolver.rng().next_in_range(num_min, num_max.saturating_add(1))
    }
}

fn is_preview(settings: &LootRollSettings) -> bool {
    settings
        .drop_chance_modifiers
        .contains(LootDropChanceModifiers::PREVIEW_ONLY)
}

fn finish<'r>(
    result: LootRollResult,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    if resolver.process_pending(settings) {
        result
    } else {
        LootRollResult::FAILURE
    }
}

impl LootNodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            LootNodeKind::Table(_) => "Table",
            LootNodeKind::TableRef { .. } => "TableRef",
            LootNodeKind::Action(_) => "Action",
            LootNodeKind::Item { .. } => "Item",
            LootNodeKind::ItemFilter { .. } => "ItemFilter",
            LootNodeKind::Agent { .. } => "Agent",
            LootNodeKind::Credits(_) => "Credits",
            LootNodeKind::Experience(_) => "Experience",
            LootNodeKind::PowerPoints(_) => "PowerPoints",
            LootNodeKind::HealthBonus(_) => "HealthBonus",
            LootNodeKind::EnduranceBonus(_) => "EnduranceBonus",
            LootNodeKind::RealMoney { .. } => "RealMoney",
            LootNodeKind::CharacterToken { .. } => "CharacterToken",
            LootNodeKind::VanityTitle(_) => "VanityTitle",
            LootNodeKind::VendorXp { .. } => "VendorXp",
            LootNodeKind::Clone { .. } => "Clone",
            LootNodeKind::Callback(_) => "Callback",
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, LootNodeKind::Table(_) | LootNodeKind::TableRef { .. })
    }

    /// Nodes that grant a counted amount
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            LootNodeKind::TableRef { .. }
                | LootNodeKind::Item { .. }
                | LootNodeKind::ItemFilter { .. }
                | LootNodeKind::Agent { .. }
                | LootNodeKind::Credits(_)
                | LootNodeKind::Experience(_)
                | LootNodeKind::PowerPoints(_)
                | LootNodeKind::HealthBonus(_)
                | LootNodeKind::EnduranceBonus(_)
        )
    }

    pub fn children(&self) -> Vec<&LootNode> {
        match self {
            LootNodeKind::Table(table) => table.choices.iter().collect(),
            LootNodeKind::Action(action) => vec![action.target.as_ref()],
            LootNodeKind::CharacterToken {
                on_unavailable: Some(node),
                ..
            } => vec![node.as_ref()],
            _ => Vec::new(),
        }
    }

    pub fn roll<'r>(
        &self,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        match self {
            LootNodeKind::Table(table) => table.roll(settings, resolver),
            LootNodeKind::TableRef {
                table,
                num_min,
                num_max,
            } => roll_table_ref(*table, *num_min, *num_max, settings, resolver),
            LootNodeKind::Action(action) => action.roll(settings, resolver),
            LootNodeKind::Item {
                item,
                num_min,
                num_max,
                mutations,
            } => {
                let Some(proto) = resolver.registry().item(*item) else {
                    warn!(item = ?item, "loot item missing");
                    return LootRollResult::FAILURE;
                };
                let count = roll_count(resolver, *num_min, *num_max);
                let mut result = LootRollResult::NO_ROLL;
                for _ in 0..count {
                    result |= roll_item(proto, settings, resolver, mutations);
                }
                result
            }
            LootNodeKind::ItemFilter {
                slot,
                rank,
                num_min,
                num_max,
            } => roll_item_filter(*slot, *rank, *num_min, *num_max, settings, resolver),
            LootNodeKind::Agent {
                agent,
                num_min,
                num_max,
            } => {
                let allowed = LootContext::ACHIEVEMENT_REWARD
                    | LootContext::DROP
                    | LootContext::MISSION_REWARD;
                if !resolver.context().intersects(allowed) {
                    return LootRollResult::FAILURE;
                }
                let level = resolver.resolve_level(settings.level, true);
                let count = roll_count(resolver, *num_min, *num_max);
                let mut result = LootRollResult::NO_ROLL;
                for _ in 0..count {
                    result |= resolver.push_result(LootResult::Agent {
                        agent: *agent,
                        level,
                    });
                }
                finish(result, settings, resolver)
            }
            LootNodeKind::Credits(curve) => {
                let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
                let Some(curve_data) = resolver.registry().curve(*curve) else {
                    warn!(curve = ?curve, "credits curve missing");
                    return LootRollResult::NO_ROLL;
                };
                let base = curve_data.get_int_at(level);
                if base <= 0 {
                    return LootRollResult::NO_ROLL;
                }
                let max = base.saturating_mul(3) / 2 + 1;
                let amount = resolver.rng().next_in_range(base, max);
                let result = resolver.push_result(LootResult::Credits(amount));
                finish(result, settings, resolver)
            }
            LootNodeKind::Experience(curve) => {
                let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
                let Some(curve_data) = resolver.registry().curve(*curve) else {
                    warn!(curve = ?curve, "experience curve missing");
                    return LootRollResult::NO_ROLL;
                };
                let amount = curve_data.get_at(level).ceil() as i32;
                if amount <= 0 {
                    return LootRollResult::NO_ROLL;
                }
                let result = resolver.push_result(LootResult::Experience {
                    curve: *curve,
                    amount,
                });
                finish(result, settings, resolver)
            }
            LootNodeKind::PowerPoints(amount) => {
                push_amount(*amount, LootResult::PowerPoints, settings, resolver)
            }
            LootNodeKind::HealthBonus(amount) => {
                push_amount(*amount, LootResult::HealthBonus, settings, resolver)
            }
            LootNodeKind::EnduranceBonus(amount) => {
                push_amount(*amount, LootResult::EnduranceBonus, settings, resolver)
            }
            LootNodeKind::RealMoney {
                coupon_code,
                transaction_context,
                num,
            } => {
                if *num <= 0 {
                    return LootRollResult::NO_ROLL;
                }
                let result = resolver.push_result(LootResult::RealMoney {
                    coupon_code: coupon_code.clone(),
                    transaction_context: transaction_context.clone(),
                    num: *num,
                });
                finish(result, settings, resolver)
            }
            LootNodeKind::CharacterToken {
                token_parent,
                filter,
                on_unavailable,
            } => roll_character_token(
                *token_parent,
                *filter,
                on_unavailable.as_deref(),
                settings,
                resolver,
            ),
            LootNodeKind::VanityTitle(title) => {
                if !title.is_valid() {
                    return LootRollResult::NO_ROLL;
                }
                let result = resolver.push_result(LootResult::VanityTitle(*title));
                finish(result, settings, resolver)
            }
            LootNodeKind::VendorXp { vendor, xp } => {
                let mut amount = *xp;
                if !settings
                    .drop_chance_modifiers
                    .contains(LootDropChanceModifiers::IGNORE_CAP)
                {
                    if let Some(remaining) = resolver.oracle().vendor_xp_remaining(*vendor) {
                        amount = amount.min(remaining.max(0));
                    }
                }
                if amount <= 0 {
                    return LootRollResult::NO_ROLL;
                }
                let result = resolver.push_result(LootResult::VendorXp {
                    vendor: *vendor,
                    amount,
                });
                finish(result, settings, resolver)
            }
            LootNodeKind::Clone {
                source_index,
                mutations,
            } => roll_clone(*source_index, mutations, settings, resolver),
            LootNodeKind::Callback(callback) => {
                if !is_preview(settings) {
                    resolver.push_effect(LootEffect::Callback(callback.clone()));
                }
                LootRollResult::SUCCESS
            }
        }
    }
}

// ============================================================
// Tables and actions
// ============================================================

impl LootTable {
    fn picker(&self) -> Picker<&LootNode> {
        let mut picker = Picker::new();
        for choice in &self.choices {
            picker.add(choice, choice.weight);
        }
        picker
    }

    /// Every choice at equal odds, so zero-weight entries are still tried
    fn uniform_picker(&self) -> Picker<&LootNode> {
        let mut picker = Picker::new();
        for choice in &self.choices {
            picker.add_one(choice);
        }
        picker
    }

    pub fn roll<'r>(
        &self,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        if self.num_min < 1 || self.choices.is_empty() {
            return LootRollResult::NO_ROLL;
        }
        if settings.depth > resolver.max_tree_depth() {
            warn!(depth = settings.depth, "loot tree too deep");
            return LootRollResult::FAILURE;
        }
        if !resolver.check_drop_chance(settings, self.no_drop_percent) {
            // Rolling "nothing" is a successful outcome
            return finish(LootRollResult::SUCCESS, settings, resolver);
        }

        settings.depth += 1;
        let count = roll_count(resolver, self.num_min, self.num_max);
        let result = match self.pick_method {
            PickMethod::PickWeight => self.pick_weight(count, settings, resolver),
            PickMethod::PickWeightTryAll => self.pick_weight_try_all(count, settings, resolver),
            PickMethod::PickAll => self.pick_all(count, settings, resolver),
        };
        settings.depth -= 1;
        result
    }

    fn pick_weight<'r>(
        &self,
        count: i32,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        let picker = self.picker();
        let mut result = LootRollResult::NO_ROLL;
        for _ in 0..count {
            let Some(choice) = picker.sample(resolver.rng()).copied() else {
                break;
            };
            result |= choice.select(settings, resolver);
        }
        result
    }

    fn pick_weight_try_all<'r>(
        &self,
        count: i32,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        let picker = self.uniform_picker();
        let mut result = LootRollResult::NO_ROLL;
        for _ in 0..count {
            let mut remaining = picker.clone();
            let mut failed = LootRollResult::NO_ROLL;
            let mut succeeded = false;
            while let Some(choice) = remaining.pick(resolver.rng()) {
                let attempt = choice.select(settings, resolver);
                if attempt.contains(LootRollResult::SUCCESS) {
                    result |= attempt;
                    succeeded = true;
                    break;
                }
                failed |= attempt;
            }
            if !succeeded {
                result |= failed;
            }
        }
        result
    }

    fn pick_all<'r>(
        &self,
        count: i32,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        let mut result = LootRollResult::NO_ROLL;
        for _ in 0..count {
            for choice in &self.choices {
                result |= choice.select(settings, resolver);
            }
        }
        result
    }
}

fn roll_table_ref<'r>(
    table: PrototypeId,
    num_min: i32,
    num_max: i32,
    settings: &mut LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    let Some(proto) = resolver.registry().loot_table(table) else {
        warn!(table = ?table, "referenced loot table missing");
        return LootRollResult::FAILURE;
    };
    if settings.depth > resolver.max_tree_depth() {
        warn!(depth = settings.depth, table = ?table, "loot tree too deep");
        return LootRollResult::FAILURE;
    }
    settings.depth += 1;
    let count = roll_count(resolver, num_min, num_max);
    let mut result = LootRollResult::NO_ROLL;
    for _ in 0..count {
        result |= proto.root.select(settings, resolver);
    }
    settings.depth -= 1;
    result
}

impl LootAction {
    pub fn roll<'r>(
        &self,
        settings: &mut LootRollSettings,
        resolver: &mut dyn ItemResolver<'r>,
    ) -> LootRollResult {
        match self.kind {
            LootActionKind::FirstTime => {
                if resolver.oracle().has_received_first_time(self.key) {
                    return LootRollResult::NO_ROLL;
                }
                let result = self.target.select(settings, resolver);
                if result.contains(LootRollResult::SUCCESS)
                    && self.key.is_valid()
                    && !is_preview(settings)
                {
                    resolver.push_effect(LootEffect::MarkFirstTime { node: self.key });
                }
                result
            }
            LootActionKind::LoopOverAvatars => {
                let mut avatars = resolver.oracle().party_avatars();
                if avatars.is_empty() && settings.usable_avatar.is_valid() {
                    avatars.push(settings.usable_avatar);
                }
                if avatars.is_empty() {
                    return self.target.select(settings, resolver);
                }
                let mut result = LootRollResult::NO_ROLL;
                for avatar in avatars {
                    let mut per_avatar = settings.clone();
                    per_avatar.usable_avatar = avatar;
                    per_avatar.force_usable = true;
                    result |= self.target.select(&mut per_avatar, resolver);
                }
                result
            }
        }
    }
}

// ============================================================
// Item drops
// ============================================================

/// Uniform pick among candidates whose restrictions pass for `spec`
pub fn pick_valid_item<'a, 'r>(
    candidates: &[&'a ItemPrototype],
    spec: &ItemSpec,
    avatar: PrototypeId,
    flags: RestrictionTestFlags,
    resolver: &mut dyn ItemResolver<'r>,
) -> Option<&'a ItemPrototype> {
    let mut picker = Picker::new();
    for candidate in candidates {
        let mut draft = ItemSpec {
            item: candidate.id,
            slot: candidate.slot,
            roll_for: candidate.roll_for_avatar(avatar),
            ..spec.clone()
        };
        if resolver.check_item(&mut draft, flags, false) {
            picker.add_one(*candidate);
        }
    }
    picker.pick(resolver.rng())
}

pub fn roll_item<'r>(
    proto: &ItemPrototype,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
    mutations: &[LootMutation],
) -> LootRollResult {
    let registry = resolver.registry();
    let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
    let avatar = resolver.resolve_avatar(settings);
    let rarity_item = (!proto.is_abstract).then_some(proto);
    let mut rarity = resolver.resolve_rarity(&settings.rarities, level, rarity_item);
    if !rarity.is_valid() {
        debug!(item = ?proto.id, "no rarity available");
        resolver.clear_pending();
        return LootRollResult::FAILURE;
    }

    let flags = settings.restriction_flags();
    let mut spec = ItemSpec {
        item: proto.id,
        rarity,
        level,
        slot: proto.slot,
        roll_for: proto.roll_for_avatar(avatar),
        ..Default::default()
    };

    if proto.is_abstract {
        let candidates = registry.concrete_items_under(proto.id);
        let mut chosen = None;
        for _ in 0..MAX_RARITY_DOWNGRADE_ATTEMPTS {
            spec.rarity = rarity;
            if let Some(item) = pick_valid_item(&candidates, &spec, avatar, flags, resolver) {
                chosen = Some(item);
                break;
            }
            match registry.rarity(rarity).map(|r| r.downgrade_to) {
                Some(next) if next.is_valid() => rarity = next,
                _ => break,
            }
        }
        let Some(item) = chosen else {
            debug!(item = ?proto.id, "no concrete item passes restrictions");
            return LootRollResult::FAILURE;
        };
        spec.item = item.id;
        spec.slot = item.slot;
        spec.roll_for = item.roll_for_avatar(avatar);
    }

    let result = resolver.push_item(spec, flags, mutations);
    finish(result, settings, resolver)
}

fn roll_item_filter<'r>(
    slot: EquipmentSlot,
    rank: i32,
    num_min: i32,
    num_max: i32,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    if num_min < 1 || rank < 0 || slot == EquipmentSlot::Invalid {
        return LootRollResult::NO_ROLL;
    }
    let registry = resolver.registry();
    let flags = settings.restriction_flags();
    let count = roll_count(resolver, num_min, num_max);
    let mut result = LootRollResult::NO_ROLL;
    for _ in 0..count {
        let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
        let avatar = resolver.resolve_avatar(settings);
        let candidates = registry.concrete_items_for_slot(slot, avatar);
        if candidates.is_empty() {
            debug!(slot = ?slot, "no items for slot");
            resolver.clear_pending();
            return LootRollResult::FAILURE;
        }
        let rarity = resolver.resolve_rarity(&settings.rarities, level, None);
        if !rarity.is_valid() {
            resolver.clear_pending();
            return LootRollResult::FAILURE;
        }
        let spec = ItemSpec {
            rarity,
            level,
            rank,
            slot,
            roll_for: avatar,
            ..Default::default()
        };
        let Some(item) = pick_valid_item(&candidates, &spec, avatar, flags, resolver) else {
            continue;
        };
        let spec = ItemSpec {
            item: item.id,
            roll_for: item.roll_for_avatar(avatar),
            ..spec
        };
        result |= resolver.push_item(spec, flags, &[]);
    }
    finish(result, settings, resolver)
}

fn roll_character_token<'r>(
    token_parent: PrototypeId,
    filter: CharacterFilter,
    on_unavailable: Option<&LootNode>,
    settings: &mut LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    let registry = resolver.registry();
    let oracle = resolver.oracle();
    // A token unlocks the first avatar it is usable by
    let tokens: Vec<&ItemPrototype> = registry
        .concrete_items_under(token_parent)
        .into_iter()
        .filter(|token| {
            let character = token.usable_by.first().copied().unwrap_or(PrototypeId::INVALID);
            match filter {
                CharacterFilter::None => true,
                CharacterFilter::DropCurrentAvatarOnly => character == settings.usable_avatar,
                CharacterFilter::DropUnownedAvatarOnly => !oracle.has_unlocked_character(character),
            }
        })
        .collect();

    if tokens.is_empty() {
        return match on_unavailable {
            Some(node) => node.select(settings, resolver),
            None => LootRollResult::FAILURE,
        };
    }

    let level = resolver.resolve_level(settings.level, settings.use_level_verbatim);
    let avatar = resolver.resolve_avatar(settings);
    let rarity = resolver.resolve_rarity(&settings.rarities, level, None);
    if !rarity.is_valid() {
        resolver.clear_pending();
        return LootRollResult::FAILURE;
    }
    let flags = settings.restriction_flags() - RestrictionTestFlags::USABLE_BY;
    let spec = ItemSpec {
        rarity,
        level,
        ..Default::default()
    };
    let Some(token) = pick_valid_item(&tokens, &spec, avatar, flags, resolver) else {
        return LootRollResult::FAILURE;
    };
    let spec = ItemSpec {
        item: token.id,
        slot: token.slot,
        roll_for: token.roll_for_avatar(avatar),
        ..spec
    };
    let result = resolver.push_item(spec, flags, &[]);
    finish(result, settings, resolver)
}

fn push_amount<'r>(
    amount: i32,
    make: fn(i32) -> LootResult,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    if amount <= 0 {
        return LootRollResult::NO_ROLL;
    }
    let result = resolver.push_result(make(amount));
    finish(result, settings, resolver)
}

fn roll_clone<'r>(
    source_index: i32,
    mutations: &[LootMutation],
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> LootRollResult {
    let source = usize::try_from(source_index)
        .ok()
        .and_then(|index| resolver.clone_source(index));
    let Some(mut spec) = source else {
        warn!(source_index, "clone source missing");
        return LootRollResult::FAILURE;
    };
    if !spec.roll_for.is_valid() {
        spec.restriction_flags -= RestrictionTestFlags::USABLE_BY;
    }
    spec.restriction_flags -= RestrictionTestFlags::RARITY;

    let (spec, outcome) = mutation::apply_mutations(spec, mutations, settings, resolver);
    if outcome.contains(MutationResults::ERROR) {
        resolver.clear_pending();
        return LootRollResult::FAILURE;
    }
    let result = resolver.push_clone(spec);
    finish(result, settings, resolver)
}
