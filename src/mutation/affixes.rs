//! Affix rolling, copying and removal on draft items.

use std::collections::BTreeSet;

use tracing::{trace, warn};

use crate::affix::{AffixPosition, AffixPrototype, DuplicateHandling};
use crate::loot::{ItemResolver, LootRollSettings};
use crate::picker::Picker;
use crate::registry::{PrototypeId, PrototypeKind, PrototypeRegistry};
use crate::rng::RandomSource;

use super::item_spec::{roll_seed, AffixSpec, ItemSpec};
use super::MutationResults;

/// What `update_affixes` does beyond validating the current set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffixBehavior {
    /// Fill positions and categories up to their rolled counts
    Roll,
    /// Validate only
    Keep,
}

type ScopedAffix = (PrototypeId, PrototypeId);

/// Position, keyword and category filter shared by the affix mutations
#[derive(Debug, Clone, Copy)]
pub struct AffixFilter<'a> {
    pub position: AffixPosition,
    pub keywords: &'a [PrototypeId],
    pub categories: &'a [PrototypeId],
}

impl<'a> AffixFilter<'a> {
    pub fn new(
        position: AffixPosition,
        keywords: &'a [PrototypeId],
        categories: &'a [PrototypeId],
    ) -> Self {
        Self {
            position,
            keywords,
            categories,
        }
    }

    pub fn matches(&self, affix: &AffixPrototype) -> bool {
        (self.position == AffixPosition::None || affix.position == self.position)
            && affix.has_keywords(self.keywords, true)
            && affix.has_any_category(self.categories)
    }
}

/// Current (affix, scope) set; unknown affixes and a visual affix next to
/// the no-visuals affix are stat errors
fn current_affix_set(
    spec: &ItemSpec,
    registry: &dyn PrototypeRegistry,
) -> Result<BTreeSet<ScopedAffix>, MutationResults> {
    let no_visuals = registry.no_visuals_affix();
    let mut set = BTreeSet::new();
    let mut has_visual = false;
    let mut has_no_visuals = false;
    for affix in &spec.affixes {
        let Some(proto) = registry.affix(affix.affix) else {
            warn!(affix = ?affix.affix, item = ?spec.item, "affix prototype missing");
            return Err(MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_STATS);
        };
        has_visual |= proto.position == AffixPosition::Visual;
        has_no_visuals |= no_visuals.is_valid() && affix.affix == no_visuals;
        set.insert(affix.key());
    }
    if has_visual && has_no_visuals {
        warn!(item = ?spec.item, "visual affix alongside the no-visuals override");
        return Err(MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_STATS);
    }
    Ok(set)
}

fn affix_picker<'a>(
    pool: impl IntoIterator<Item = &'a AffixPrototype>,
    spec: &ItemSpec,
    filter: AffixFilter<'_>,
    registry: &dyn PrototypeRegistry,
) -> Picker<&'a AffixPrototype> {
    let mut picker = Picker::new();
    for affix in pool {
        if affix.weight <= 0
            || !filter.matches(affix)
            || !affix.allow_attachment(spec.item, registry)
        {
            continue;
        }
        picker.add(affix, affix.weight);
    }
    picker
}

fn all_affixes(registry: &dyn PrototypeRegistry) -> Vec<&AffixPrototype> {
    registry
        .ids_of_kind(PrototypeKind::Affix)
        .into_iter()
        .filter_map(|id| registry.affix(id))
        .collect()
}

/// Uniform scope, preferring ones this affix does not carry yet
fn pick_scope(
    affix: &AffixPrototype,
    set: &BTreeSet<ScopedAffix>,
    rng: &mut dyn RandomSource,
) -> PrototypeId {
    if affix.scopes.is_empty() {
        return PrototypeId::INVALID;
    }
    let mut fresh = Picker::new();
    for scope in &affix.scopes {
        if !set.contains(&(affix.id, *scope)) {
            fresh.add_one(*scope);
        }
    }
    if let Some(scope) = fresh.pick(rng) {
        return scope;
    }
    let mut any = Picker::new();
    for scope in &affix.scopes {
        any.add_one(*scope);
    }
    any.pick(rng).unwrap_or(PrototypeId::INVALID)
}

/// Attach one affix from `picker`; false once the pool is exhausted
fn roll_one(
    spec: &mut ItemSpec,
    picker: &mut Picker<&AffixPrototype>,
    set: &mut BTreeSet<ScopedAffix>,
    rng: &mut dyn RandomSource,
) -> bool {
    while let Some(affix) = picker.pick(rng) {
        let scope = pick_scope(affix, set, rng);
        let key = (affix.id, scope);
        if set.contains(&key) {
            match affix.duplicate_handling {
                DuplicateHandling::Fail | DuplicateHandling::Ignore => continue,
                DuplicateHandling::Overwrite => {
                    let seed = roll_seed(rng);
                    if let Some(existing) = spec.affixes.iter_mut().find(|a| a.key() == key) {
                        existing.seed = seed;
                    }
                    return true;
                }
                DuplicateHandling::Append => {}
            }
        }
        set.insert(key);
        spec.affixes.push(AffixSpec {
            affix: affix.id,
            scope,
            level_requirement: affix.level_requirement,
            seed: roll_seed(rng),
        });
        return true;
    }
    false
}

fn roll_count(
    spec: &mut ItemSpec,
    count: i16,
    picker: &mut Picker<&AffixPrototype>,
    set: &mut BTreeSet<ScopedAffix>,
    rng: &mut dyn RandomSource,
) -> MutationResults {
    let mut added = 0;
    while added < count && roll_one(spec, picker, set, rng) {
        added += 1;
    }
    if added < count {
        warn!(item = ?spec.item, wanted = count, added, "affix pool exhausted");
    }
    if added > 0 {
        MutationResults::AFFIX_CHANGE
    } else {
        MutationResults::empty()
    }
}

/// Validate the affix set and, with `Roll`, fill it up to the item's limits
///
/// Categories are filled first, then every position rolled by count gets a
/// uniform target in `[min, max]`.
pub fn update_affixes<'r>(
    spec: &mut ItemSpec,
    behavior: AffixBehavior,
    settings: Option<&LootRollSettings>,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if !spec.is_valid() {
        return MutationResults::ERROR;
    }
    let registry = resolver.registry();
    let mut set = match current_affix_set(spec, registry) {
        Ok(set) => set,
        Err(result) => return result,
    };
    if behavior == AffixBehavior::Keep {
        return MutationResults::empty();
    }

    let Some(item) = registry.item(spec.item) else {
        return MutationResults::ERROR;
    };
    let Some(limits) = item.get_affix_limits(spec.rarity, resolver.context()) else {
        return MutationResults::empty();
    };

    let mut result = MutationResults::empty();
    for entry in &limits.categorized {
        let delta = settings
            .and_then(|s| s.affix_limit_by_category.get(&entry.category))
            .copied()
            .unwrap_or(0);
        let target = entry.min_affixes.saturating_add(delta).max(0);
        let needed = target - spec.num_affixes_of_category(entry.category, registry);
        if needed <= 0 {
            continue;
        }
        let categories = [entry.category];
        let filter = AffixFilter::new(AffixPosition::None, &[], &categories);
        let mut picker = affix_picker(all_affixes(registry), spec, filter, registry);
        result |= roll_count(spec, needed, &mut picker, &mut set, resolver.rng());
    }

    for position in AffixPosition::all_positions() {
        if !position.is_rolled_by_count() {
            continue;
        }
        let max = limits.get_max(position, settings);
        if max <= 0 {
            continue;
        }
        let min = limits.get_min(position, settings).clamp(0, max);
        let target = resolver
            .rng()
            .next_in_range(i32::from(min), i32::from(max) + 1) as i16;
        let needed = target - spec.num_affixes_of_position(position, registry);
        if needed <= 0 {
            continue;
        }
        trace!(?position, needed, "rolling affixes");
        let filter = AffixFilter::new(position, &[], &[]);
        let mut picker = affix_picker(registry.affixes_at(position), spec, filter, registry);
        result |= roll_count(spec, needed, &mut picker, &mut set, resolver.rng());
    }
    result
}

/// Roll `count` new affixes chosen by position, else categories, else keywords
pub fn add_affixes<'r>(
    spec: &mut ItemSpec,
    count: i16,
    filter: AffixFilter<'_>,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    if count <= 0 {
        warn!(count, "affix add count must be positive");
        return MutationResults::ERROR;
    }
    if !spec.is_valid() {
        return MutationResults::ERROR;
    }
    let registry = resolver.registry();
    let Some(item) = registry.item(spec.item) else {
        return MutationResults::ERROR;
    };
    let mut set = match current_affix_set(spec, registry) {
        Ok(set) => set,
        Err(result) => return result,
    };
    let limits = item.get_affix_limits(spec.rarity, resolver.context());

    let mut picker = if filter.position != AffixPosition::None {
        if let Some(limits) = limits {
            let current = spec.num_affixes_of_position(filter.position, registry);
            if current.saturating_add(count) > limits.get_max(filter.position, Some(settings)) {
                warn!(
                    position = ?filter.position,
                    current,
                    count,
                    "affix add exceeds position limit"
                );
                return MutationResults::ERROR;
            }
        }
        affix_picker(registry.affixes_at(filter.position), spec, filter, registry)
    } else if !filter.categories.is_empty() {
        if let Some(limits) = limits {
            for category in filter.categories {
                let current = spec.num_affixes_of_category(*category, registry);
                let max = limits.get_category_max(*category, Some(settings));
                if current.saturating_add(count) > max {
                    warn!(?category, current, count, "affix add exceeds category limit");
                    return MutationResults::ERROR;
                }
            }
        }
        affix_picker(all_affixes(registry), spec, filter, registry)
    } else if !filter.keywords.is_empty() {
        affix_picker(all_affixes(registry), spec, filter, registry)
    } else {
        return MutationResults::empty();
    };

    roll_count(spec, count, &mut picker, &mut set, resolver.rng())
}

/// Attach one named affix, honoring its duplicate handling and the position limit
pub fn add_affix<'r>(
    spec: &mut ItemSpec,
    affix: PrototypeId,
    settings: &LootRollSettings,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    let registry = resolver.registry();
    let Some(proto) = registry.affix(affix) else {
        warn!(?affix, "affix prototype missing");
        return MutationResults::ERROR;
    };
    if !spec.is_valid() || !proto.allow_attachment(spec.item, registry) {
        return MutationResults::ERROR;
    }
    let mut set = match current_affix_set(spec, registry) {
        Ok(set) => set,
        Err(result) => return result,
    };
    let limits = registry
        .item(spec.item)
        .and_then(|item| item.get_affix_limits(spec.rarity, resolver.context()));
    if let Some(limits) = limits {
        if proto.position.is_rolled_by_count()
            && spec.num_affixes_of_position(proto.position, registry)
                >= limits.get_max(proto.position, Some(settings))
        {
            return MutationResults::ERROR;
        }
    }
    let mut picker = Picker::new();
    picker.add_one(proto);
    if roll_one(spec, &mut picker, &mut set, resolver.rng()) {
        MutationResults::AFFIX_CHANGE
    } else {
        MutationResults::ERROR
    }
}

fn check_scope(
    proto: &AffixPrototype,
    scope: PrototypeId,
    registry: &dyn PrototypeRegistry,
) -> MutationResults {
    if !scope.is_valid() || proto.scopes.is_empty() {
        return MutationResults::empty();
    }
    if registry.resolve(scope).is_none() {
        return MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_SCOPE_POWER;
    }
    if !proto.scopes.iter().any(|s| registry.is_child_of(scope, *s)) {
        return MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_SCOPE_POWER_GROUP;
    }
    MutationResults::empty()
}

/// Copy the affixes of `source` that pass `filter` onto `dest`
pub fn copy_affixes<'r>(
    source: &[AffixSpec],
    dest: &mut ItemSpec,
    filter: AffixFilter<'_>,
    enforce_limits: bool,
    resolver: &mut dyn ItemResolver<'r>,
) -> MutationResults {
    let registry = resolver.registry();
    let mut set = match current_affix_set(dest, registry) {
        Ok(set) => set,
        Err(result) => return result,
    };
    let limits = if enforce_limits {
        match registry
            .item(dest.item)
            .and_then(|item| item.get_affix_limits(dest.rarity, resolver.context()))
        {
            Some(limits) => Some(limits),
            None => return MutationResults::ERROR,
        }
    } else {
        None
    };

    let mut result = MutationResults::empty();
    for copy in source {
        let Some(proto) = registry.affix(copy.affix) else {
            return MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_STATS;
        };
        if !filter.matches(proto) {
            continue;
        }
        let scope_error = check_scope(proto, copy.scope, registry);
        if !scope_error.is_empty() {
            warn!(affix = ?copy.affix, scope = ?copy.scope, "copied affix scope rejected");
            return scope_error;
        }
        if set.contains(&copy.key()) {
            match proto.duplicate_handling {
                DuplicateHandling::Fail => return MutationResults::ERROR,
                DuplicateHandling::Ignore => continue,
                DuplicateHandling::Overwrite | DuplicateHandling::Append => {
                    warn!(affix = ?copy.affix, "copy cannot merge a duplicate affix");
                    return MutationResults::ERROR;
                }
            }
        }
        if let Some(limits) = limits {
            if proto.position.is_rolled_by_count()
                && dest.num_affixes_of_position(proto.position, registry)
                    >= limits.get_max(proto.position, None)
            {
                return MutationResults::ERROR;
            }
            for category in &proto.categories {
                let max = limits.get_category_max(*category, None);
                if dest.num_affixes_of_category(*category, registry) >= max {
                    return MutationResults::ERROR;
                }
            }
        }
        set.insert(copy.key());
        dest.affixes.push(*copy);
        result |= MutationResults::AFFIX_CHANGE;
    }
    result
}

/// Remove matching affixes; metadata affixes always stay
pub fn drop_affixes(
    spec: &mut ItemSpec,
    filter: AffixFilter<'_>,
    registry: &dyn PrototypeRegistry,
) -> MutationResults {
    let before = spec.affixes.len();
    spec.affixes.retain(|affix| {
        registry
            .affix(affix.affix)
            .map_or(true, |proto| {
                proto.position == AffixPosition::Metadata || !filter.matches(proto)
            })
    });
    if spec.affixes.len() != before {
        MutationResults::AFFIX_CHANGE
    } else {
        MutationResults::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::{
        AffixLimits, CategorizedAffixLimit, CountRange, LootContext, RarityPrototype,
    };
    use crate::loot::LootResolver;
    use crate::registry::{
        ContentDatabase, ContentRegistry, Curve, CurveId, EquipmentSlot, ItemPrototype,
    };

    const COMMON: PrototypeId = PrototypeId(10);
    const SWORD: PrototypeId = PrototypeId(100);
    const FIRE: PrototypeId = PrototypeId(60);
    const GEM: PrototypeId = PrototypeId(70);

    fn affix(id: u64, position: AffixPosition) -> AffixPrototype {
        AffixPrototype {
            id: PrototypeId(id),
            name: String::new(),
            position,
            weight: 1,
            keywords: vec![],
            categories: vec![],
            type_filters: vec![],
            scopes: vec![],
            duplicate_handling: DuplicateHandling::Fail,
            level_requirement: 0,
            is_gem: false,
        }
    }

    fn registry() -> ContentRegistry {
        let mut db = ContentDatabase::default();
        db.curves = vec![Curve::new(CurveId(1), 1, vec![1.0; 100])];
        db.rarities = vec![RarityPrototype {
            id: COMMON,
            name: String::new(),
            downgrade_to: PrototypeId::INVALID,
            weight_curve: CurveId(1),
        }];
        let mut fire = affix(5, AffixPosition::Suffix);
        fire.keywords = vec![FIRE];
        let mut gem = affix(6, AffixPosition::Socket1);
        gem.categories = vec![GEM];
        let mut zero = affix(7, AffixPosition::Prefix);
        zero.weight = 0;
        db.affixes = vec![
            affix(1, AffixPosition::Prefix),
            affix(2, AffixPosition::Prefix),
            affix(3, AffixPosition::Suffix),
            affix(4, AffixPosition::Metadata),
            fire,
            gem,
            zero,
            affix(8, AffixPosition::Visual),
        ];
        db.no_visuals_affix = PrototypeId(4);
        db.items = vec![ItemPrototype {
            id: SWORD,
            name: String::new(),
            parent: PrototypeId::INVALID,
            is_abstract: false,
            slot: EquipmentSlot::Gear01,
            usable_by: vec![],
            builtin_affixes: vec![],
            affix_limits: vec![AffixLimits {
                rarity: COMMON,
                allowed_contexts: LootContext::all(),
                prefixes: CountRange::new(2, 2),
                suffixes: CountRange::new(0, 1),
                max_sockets: [1, 0, 0],
                categorized: vec![CategorizedAffixLimit {
                    category: GEM,
                    min_affixes: 1,
                }],
                ..Default::default()
            }],
            drop_restrictions: vec![],
        }];
        ContentRegistry::new(db).unwrap()
    }

    fn sword() -> ItemSpec {
        ItemSpec {
            item: SWORD,
            rarity: COMMON,
            level: 10,
            ..Default::default()
        }
    }

    fn ids(spec: &ItemSpec) -> Vec<u64> {
        spec.affixes.iter().map(|a| a.affix.0).collect()
    }

    #[test]
    fn test_roll_fills_limits() {
        let reg = registry();
        let settings = LootRollSettings::default();
        for seed in 0..20 {
            let mut resolver = LootResolver::new(&reg, seed);
            let mut spec = sword();
            let result = update_affixes(
                &mut spec,
                AffixBehavior::Roll,
                Some(&settings),
                &mut resolver,
            );
            assert!(result.contains(MutationResults::AFFIX_CHANGE));
            assert_eq!(spec.num_affixes_of_position(AffixPosition::Prefix, &reg), 2);
            assert!(spec.num_affixes_of_position(AffixPosition::Suffix, &reg) <= 1);
            assert_eq!(spec.num_affixes_of_category(GEM, &reg), 1);
            assert!(!ids(&spec).contains(&7));
            assert!(spec.affixes.iter().all(|a| a.seed != 0));
        }
    }

    #[test]
    fn test_keep_rejects_unknown_affix() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 1);
        let mut spec = sword();
        spec.affixes.push(AffixSpec {
            affix: PrototypeId(999),
            ..Default::default()
        });
        let result = update_affixes(&mut spec, AffixBehavior::Keep, None, &mut resolver);
        assert!(
            result.contains(MutationResults::ERROR | MutationResults::ERROR_REASON_AFFIX_STATS)
        );
    }

    #[test]
    fn test_keep_rejects_visual_with_override() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 1);
        let mut spec = sword();
        for id in [8, 4] {
            spec.affixes.push(AffixSpec {
                affix: PrototypeId(id),
                ..Default::default()
            });
        }
        let result = update_affixes(&mut spec, AffixBehavior::Keep, None, &mut resolver);
        assert!(result.contains(MutationResults::ERROR_REASON_AFFIX_STATS));
    }

    #[test]
    fn test_add_affixes_position_limit() {
        let reg = registry();
        let settings = LootRollSettings::default();
        let mut resolver = LootResolver::new(&reg, 3);
        let mut spec = sword();
        let filter = AffixFilter::new(AffixPosition::Suffix, &[], &[]);
        assert_eq!(
            add_affixes(&mut spec, 2, filter, &settings, &mut resolver),
            MutationResults::ERROR
        );
        let added = add_affixes(&mut spec, 1, filter, &settings, &mut resolver);
        assert!(added.contains(MutationResults::AFFIX_CHANGE));
        assert_eq!(
            add_affixes(&mut spec, 0, filter, &settings, &mut resolver),
            MutationResults::ERROR
        );
    }

    #[test]
    fn test_add_affixes_by_keyword() {
        let reg = registry();
        let settings = LootRollSettings::default();
        let mut resolver = LootResolver::new(&reg, 3);
        let mut spec = sword();
        let keywords = [FIRE];
        let filter = AffixFilter::new(AffixPosition::None, &keywords, &[]);
        add_affixes(&mut spec, 1, filter, &settings, &mut resolver);
        assert_eq!(ids(&spec), vec![5]);
    }

    #[test]
    fn test_copy_duplicate_handling() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 3);
        let source = vec![AffixSpec {
            affix: PrototypeId(1),
            seed: 9,
            ..Default::default()
        }];
        let mut dest = sword();
        let filter = AffixFilter::new(AffixPosition::None, &[], &[]);
        assert_eq!(
            copy_affixes(&source, &mut dest, filter, false, &mut resolver),
            MutationResults::AFFIX_CHANGE
        );
        assert_eq!(dest.affixes[0].seed, 9);
        // affix 1 fails on duplicates
        assert_eq!(
            copy_affixes(&source, &mut dest, filter, false, &mut resolver),
            MutationResults::ERROR
        );
    }

    #[test]
    fn test_copy_enforces_limits() {
        let reg = registry();
        let mut resolver = LootResolver::new(&reg, 3);
        let source: Vec<AffixSpec> = [3, 5]
            .iter()
            .map(|id| AffixSpec {
                affix: PrototypeId(*id),
                ..Default::default()
            })
            .collect();
        let filter = AffixFilter::new(AffixPosition::None, &[], &[]);
        let mut dest = sword();
        let copied = copy_affixes(&source, &mut dest, filter, true, &mut resolver);
        assert!(copied.contains(MutationResults::ERROR));
        let mut dest = sword();
        assert_eq!(
            copy_affixes(&source, &mut dest, filter, false, &mut resolver),
            MutationResults::AFFIX_CHANGE
        );
    }

    #[test]
    fn test_drop_keeps_metadata() {
        let reg = registry();
        let mut spec = sword();
        for id in [1, 3, 4] {
            spec.affixes.push(AffixSpec {
                affix: PrototypeId(id),
                ..Default::default()
            });
        }
        let all = AffixFilter::new(AffixPosition::None, &[], &[]);
        assert_eq!(drop_affixes(&mut spec, all, &reg), MutationResults::AFFIX_CHANGE);
        assert_eq!(ids(&spec), vec![4]);
        assert_eq!(drop_affixes(&mut spec, all, &reg), MutationResults::empty());
    }
}
