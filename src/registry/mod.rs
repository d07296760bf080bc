//! Prototype registry - read-only content database consulted by every roll.
//!
//! - `PrototypeRegistry` is the seam the engine consumes; it is passed in explicitly
//! - `ContentRegistry` is the in-memory implementation built from a `ContentDatabase`
//! - Content files are RON or JSON, selected by extension

pub mod curve;
pub mod item;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::affix::{AffixPosition, AffixPrototype, RarityPrototype};
use crate::error::{ContentError, ContentResult};
use crate::loot::LootTablePrototype;
use crate::properties::{PropertyCollection, PropertyEnum, PropertyInfo};
use crate::rank_roll::RankAffixTable;

pub use curve::Curve;
pub use item::{BuiltinAffix, DropRestriction, EquipmentSlot, ItemPrototype, RestrictionTestFlags};

// ============================================================
// Ids
// ============================================================

macro_rules! content_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const INVALID: Self = Self(0);

            pub fn is_valid(&self) -> bool {
                self.0 != 0
            }
        }
    };
}

content_id!(
    /// Opaque prototype reference. 0 is invalid.
    PrototypeId
);
content_id!(
    /// Asset reference (names, art). Maps to a prototype through the registry.
    AssetId
);
content_id!(CurveId);

// ============================================================
// Prototype data
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrototypeKind {
    Rarity,
    Affix,
    Item,
    AffixTable,
    LootTable,
    DifficultyTier,
    Keyword,
    Avatar,
    Agent,
    AffixCategory,
    Mission,
    Power,
    Other,
}

impl PrototypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrototypeKind::Rarity => "rarity",
            PrototypeKind::Affix => "affix",
            PrototypeKind::Item => "item",
            PrototypeKind::AffixTable => "affix table",
            PrototypeKind::LootTable => "loot table",
            PrototypeKind::DifficultyTier => "difficulty tier",
            PrototypeKind::Keyword => "keyword",
            PrototypeKind::Avatar => "avatar",
            PrototypeKind::Agent => "agent",
            PrototypeKind::AffixCategory => "affix category",
            PrototypeKind::Mission => "mission",
            PrototypeKind::Power => "power",
            PrototypeKind::Other => "other",
        }
    }
}

/// Weighted list of affixes rolled by rank-affix slots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffixTablePrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    pub affixes: Vec<PrototypeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyTierPrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    /// Ordering value, higher is harder
    pub tier: i32,
}

impl DifficultyTierPrototype {
    /// True when `value` sits between `min` and `max`; an invalid bound is open
    pub fn in_range(
        value: PrototypeId,
        min: PrototypeId,
        max: PrototypeId,
        registry: &dyn PrototypeRegistry,
    ) -> bool {
        let Some(value) = registry.difficulty_tier(value) else {
            return false;
        };
        if let Some(min) = registry.difficulty_tier(min) {
            if value.tier < min.tier {
                return false;
            }
        }
        if let Some(max) = registry.difficulty_tier(max) {
            if value.tier > max.tier {
                return false;
            }
        }
        true
    }
}

/// Keyword, avatar, agent, mission and other plain reference prototypes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPrototype {
    pub id: PrototypeId,
    pub kind: PrototypeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: PrototypeId,
}

#[derive(Debug, Clone, Copy)]
pub enum PrototypeData<'a> {
    Rarity(&'a RarityPrototype),
    Affix(&'a AffixPrototype),
    Item(&'a ItemPrototype),
    AffixTable(&'a AffixTablePrototype),
    LootTable(&'a LootTablePrototype),
    DifficultyTier(&'a DifficultyTierPrototype),
    Named(&'a NamedPrototype),
}

impl PrototypeData<'_> {
    pub fn kind(&self) -> PrototypeKind {
        match self {
            PrototypeData::Rarity(_) => PrototypeKind::Rarity,
            PrototypeData::Affix(_) => PrototypeKind::Affix,
            PrototypeData::Item(_) => PrototypeKind::Item,
            PrototypeData::AffixTable(_) => PrototypeKind::AffixTable,
            PrototypeData::LootTable(_) => PrototypeKind::LootTable,
            PrototypeData::DifficultyTier(_) => PrototypeKind::DifficultyTier,
            PrototypeData::Named(p) => p.kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PrototypeData::Rarity(p) => &p.name,
            PrototypeData::Affix(p) => &p.name,
            PrototypeData::Item(p) => &p.name,
            PrototypeData::AffixTable(p) => &p.name,
            PrototypeData::LootTable(p) => &p.name,
            PrototypeData::DifficultyTier(p) => &p.name,
            PrototypeData::Named(p) => &p.name,
        }
    }
}

// ============================================================
// Registry trait
// ============================================================

/// Read-only content lookups. Shared freely between concurrent rolls.
pub trait PrototypeRegistry: Send + Sync {
    fn resolve(&self, id: PrototypeId) -> Option<PrototypeData<'_>>;

    /// Prototype bound to an asset, `INVALID` when unmapped
    fn resolve_by_asset(&self, asset: AssetId) -> PrototypeId;

    /// Direct parent, `INVALID` for roots and unknown ids
    fn parent_of(&self, id: PrototypeId) -> PrototypeId;

    fn curve(&self, id: CurveId) -> Option<&Curve>;

    fn property_info(&self, prop: PropertyEnum) -> Option<&PropertyInfo>;

    /// Ids of one kind in ascending order
    fn ids_of_kind(&self, kind: PrototypeKind) -> Vec<PrototypeId>;

    fn rank_affix_table(&self, difficulty_tier: PrototypeId) -> Option<&RankAffixTable>;

    fn globals(&self) -> &PropertyCollection;

    /// Affix that hides an item's visual affix
    fn no_visuals_affix(&self) -> PrototypeId {
        PrototypeId::INVALID
    }

    /// True when `parent` is `id` or one of its ancestors
    fn is_child_of(&self, id: PrototypeId, parent: PrototypeId) -> bool {
        if !id.is_valid() || !parent.is_valid() {
            return false;
        }
        let mut visited = BTreeSet::new();
        let mut current = id;
        while current.is_valid() && visited.insert(current) {
            if current == parent {
                return true;
            }
            current = self.parent_of(current);
        }
        false
    }

    fn rarity(&self, id: PrototypeId) -> Option<&RarityPrototype> {
        match self.resolve(id)? {
            PrototypeData::Rarity(r) => Some(r),
            _ => None,
        }
    }

    fn affix(&self, id: PrototypeId) -> Option<&AffixPrototype> {
        match self.resolve(id)? {
            PrototypeData::Affix(a) => Some(a),
            _ => None,
        }
    }

    fn item(&self, id: PrototypeId) -> Option<&ItemPrototype> {
        match self.resolve(id)? {
            PrototypeData::Item(i) => Some(i),
            _ => None,
        }
    }

    fn affix_table(&self, id: PrototypeId) -> Option<&AffixTablePrototype> {
        match self.resolve(id)? {
            PrototypeData::AffixTable(t) => Some(t),
            _ => None,
        }
    }

    fn loot_table(&self, id: PrototypeId) -> Option<&LootTablePrototype> {
        match self.resolve(id)? {
            PrototypeData::LootTable(t) => Some(t),
            _ => None,
        }
    }

    fn difficulty_tier(&self, id: PrototypeId) -> Option<&DifficultyTierPrototype> {
        match self.resolve(id)? {
            PrototypeData::DifficultyTier(t) => Some(t),
            _ => None,
        }
    }

    /// Affixes rollable at `position`, id order
    fn affixes_at(&self, position: AffixPosition) -> Vec<&AffixPrototype> {
        self.ids_of_kind(PrototypeKind::Affix)
            .into_iter()
            .filter_map(|id| self.affix(id))
            .filter(|a| a.position == position)
            .collect()
    }

    /// Concrete (non-abstract) items descending from `parent`, id order
    fn concrete_items_under(&self, parent: PrototypeId) -> Vec<&ItemPrototype> {
        self.ids_of_kind(PrototypeKind::Item)
            .into_iter()
            .filter_map(|id| self.item(id))
            .filter(|i| !i.is_abstract && self.is_child_of(i.id, parent))
            .collect()
    }

    /// Concrete items equipped in `slot` that `avatar` may use, id order
    fn concrete_items_for_slot(
        &self,
        slot: EquipmentSlot,
        avatar: PrototypeId,
    ) -> Vec<&ItemPrototype> {
        self.ids_of_kind(PrototypeKind::Item)
            .into_iter()
            .filter_map(|id| self.item(id))
            .filter(|i| {
                !i.is_abstract && i.slot == slot && (!avatar.is_valid() || i.is_usable_by(avatar))
            })
            .collect()
    }
}

// ============================================================
// Content database
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBinding {
    pub asset: AssetId,
    pub prototype: PrototypeId,
}

/// Serialized form of all content. Every prototype id must be unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentDatabase {
    pub rarities: Vec<RarityPrototype>,
    pub affixes: Vec<AffixPrototype>,
    pub items: Vec<ItemPrototype>,
    pub affix_tables: Vec<AffixTablePrototype>,
    pub rank_affix_tables: Vec<RankAffixTable>,
    pub difficulty_tiers: Vec<DifficultyTierPrototype>,
    pub loot_tables: Vec<LootTablePrototype>,
    pub prototypes: Vec<NamedPrototype>,
    pub curves: Vec<Curve>,
    pub properties: Vec<PropertyInfo>,
    pub assets: Vec<AssetBinding>,
    pub globals: PropertyCollection,
    pub no_visuals_affix: PrototypeId,
}

// ============================================================
// In-memory registry
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct ContentRegistry {
    kinds: BTreeMap<PrototypeId, PrototypeKind>,
    rarities: BTreeMap<PrototypeId, RarityPrototype>,
    affixes: BTreeMap<PrototypeId, AffixPrototype>,
    items: BTreeMap<PrototypeId, ItemPrototype>,
    affix_tables: BTreeMap<PrototypeId, AffixTablePrototype>,
    difficulty_tiers: BTreeMap<PrototypeId, DifficultyTierPrototype>,
    loot_tables: BTreeMap<PrototypeId, LootTablePrototype>,
    named: BTreeMap<PrototypeId, NamedPrototype>,
    rank_affix_tables: BTreeMap<PrototypeId, RankAffixTable>,
    parents: BTreeMap<PrototypeId, PrototypeId>,
    curves: BTreeMap<CurveId, Curve>,
    properties: BTreeMap<PropertyEnum, PropertyInfo>,
    assets: BTreeMap<AssetId, PrototypeId>,
    globals: PropertyCollection,
    no_visuals_affix: PrototypeId,
}

fn insert_unique<T>(
    kinds: &mut BTreeMap<PrototypeId, PrototypeKind>,
    map: &mut BTreeMap<PrototypeId, T>,
    id: PrototypeId,
    kind: PrototypeKind,
    value: T,
) -> ContentResult<()> {
    if !id.is_valid() {
        return Err(ContentError::InvalidPrototypeId(kind.as_str()));
    }
    if kinds.insert(id, kind).is_some() {
        return Err(ContentError::DuplicatePrototype {
            id: id.0,
            kind: kind.as_str(),
        });
    }
    map.insert(id, value);
    Ok(())
}

impl ContentRegistry {
    /// Index `db`, post-processing limits, restrictions and loot tables
    pub fn new(db: ContentDatabase) -> ContentResult<Self> {
        let mut reg = ContentRegistry {
            globals: db.globals,
            no_visuals_affix: db.no_visuals_affix,
            ..Default::default()
        };

        for rarity in db.rarities {
            insert_unique(
                &mut reg.kinds,
                &mut reg.rarities,
                rarity.id,
                PrototypeKind::Rarity,
                rarity,
            )?;
        }
        for affix in db.affixes {
            insert_unique(&mut reg.kinds, &mut reg.affixes, affix.id, PrototypeKind::Affix, affix)?;
        }
        for mut item in db.items {
            item.post_process();
            if item.parent.is_valid() {
                reg.parents.insert(item.id, item.parent);
            }
            insert_unique(&mut reg.kinds, &mut reg.items, item.id, PrototypeKind::Item, item)?;
        }
        for table in db.affix_tables {
            insert_unique(
                &mut reg.kinds,
                &mut reg.affix_tables,
                table.id,
                PrototypeKind::AffixTable,
                table,
            )?;
        }
        for tier in db.difficulty_tiers {
            insert_unique(
                &mut reg.kinds,
                &mut reg.difficulty_tiers,
                tier.id,
                PrototypeKind::DifficultyTier,
                tier,
            )?;
        }
        for mut table in db.loot_tables {
            table.root.post_process();
            insert_unique(
                &mut reg.kinds,
                &mut reg.loot_tables,
                table.id,
                PrototypeKind::LootTable,
                table,
            )?;
        }
        for proto in db.prototypes {
            if proto.parent.is_valid() {
                reg.parents.insert(proto.id, proto.parent);
            }
            let kind = proto.kind;
            insert_unique(&mut reg.kinds, &mut reg.named, proto.id, kind, proto)?;
        }

        for table in db.rank_affix_tables {
            if reg.rank_affix_tables.contains_key(&table.difficulty_tier) {
                return Err(ContentError::DuplicatePrototype {
                    id: table.difficulty_tier.0,
                    kind: "rank affix table",
                });
            }
            reg.rank_affix_tables.insert(table.difficulty_tier, table);
        }
        for curve in db.curves {
            if reg.curves.contains_key(&curve.id) {
                return Err(ContentError::DuplicatePrototype {
                    id: curve.id.0,
                    kind: "curve",
                });
            }
            reg.curves.insert(curve.id, curve);
        }

        for info in PropertyInfo::builtins() {
            reg.properties.insert(info.prop, info);
        }
        for info in db.properties {
            reg.properties.insert(info.prop, info);
        }
        for binding in db.assets {
            reg.assets.insert(binding.asset, binding.prototype);
        }

        tracing::debug!(
            prototypes = reg.kinds.len(),
            curves = reg.curves.len(),
            "content registry built"
        );
        Ok(reg)
    }

    pub fn from_ron_str(text: &str) -> ContentResult<Self> {
        let db: ContentDatabase = ron::from_str(text)?;
        Self::new(db)
    }

    pub fn from_json_str(text: &str) -> ContentResult<Self> {
        let db: ContentDatabase = serde_json::from_str(text)?;
        Self::new(db)
    }

    /// Load `.ron` or `.json` content
    pub fn load(path: &Path) -> ContentResult<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => Self::from_ron_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(ContentError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn rarities(&self) -> impl Iterator<Item = &RarityPrototype> {
        self.rarities.values()
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemPrototype> {
        self.items.values()
    }

    pub fn loot_tables(&self) -> impl Iterator<Item = &LootTablePrototype> {
        self.loot_tables.values()
    }

    pub fn affix_tables(&self) -> impl Iterator<Item = &AffixTablePrototype> {
        self.affix_tables.values()
    }

    pub fn rank_affix_tables(&self) -> impl Iterator<Item = &RankAffixTable> {
        self.rank_affix_tables.values()
    }

    pub fn contains(&self, id: PrototypeId) -> bool {
        self.kinds.contains_key(&id)
    }
}

impl PrototypeRegistry for ContentRegistry {
    fn resolve(&self, id: PrototypeId) -> Option<PrototypeData<'_>> {
        let data = match self.kinds.get(&id)? {
            PrototypeKind::Rarity => PrototypeData::Rarity(self.rarities.get(&id)?),
            PrototypeKind::Affix => PrototypeData::Affix(self.affixes.get(&id)?),
            PrototypeKind::Item => PrototypeData::Item(self.items.get(&id)?),
            PrototypeKind::AffixTable => PrototypeData::AffixTable(self.affix_tables.get(&id)?),
            PrototypeKind::LootTable => PrototypeData::LootTable(self.loot_tables.get(&id)?),
            PrototypeKind::DifficultyTier => {
                PrototypeData::DifficultyTier(self.difficulty_tiers.get(&id)?)
            }
            _ => PrototypeData::Named(self.named.get(&id)?),
        };
        Some(data)
    }

    fn resolve_by_asset(&self, asset: AssetId) -> PrototypeId {
        self.assets
            .get(&asset)
            .copied()
            .unwrap_or(PrototypeId::INVALID)
    }

    fn parent_of(&self, id: PrototypeId) -> PrototypeId {
        self.parents.get(&id).copied().unwrap_or(PrototypeId::INVALID)
    }

    fn curve(&self, id: CurveId) -> Option<&Curve> {
        self.curves.get(&id)
    }

    fn property_info(&self, prop: PropertyEnum) -> Option<&PropertyInfo> {
        self.properties.get(&prop)
    }

    fn ids_of_kind(&self, kind: PrototypeKind) -> Vec<PrototypeId> {
        self.kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    fn rank_affix_table(&self, difficulty_tier: PrototypeId) -> Option<&RankAffixTable> {
        self.rank_affix_tables.get(&difficulty_tier)
    }

    fn globals(&self) -> &PropertyCollection {
        &self.globals
    }

    fn no_visuals_affix(&self) -> PrototypeId {
        self.no_visuals_affix
    }

    fn affixes_at(&self, position: AffixPosition) -> Vec<&AffixPrototype> {
        self.affixes
            .values()
            .filter(|a| a.position == position)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: u64, kind: PrototypeKind, parent: u64) -> NamedPrototype {
        NamedPrototype {
            id: PrototypeId(id),
            kind,
            name: format!("proto{id}"),
            parent: PrototypeId(parent),
        }
    }

    fn rarity(id: u64, down: u64) -> RarityPrototype {
        RarityPrototype {
            id: PrototypeId(id),
            name: String::new(),
            downgrade_to: PrototypeId(down),
            weight_curve: CurveId::INVALID,
        }
    }

    #[test]
    fn test_ids_invalid_default() {
        assert!(!PrototypeId::default().is_valid());
        assert!(PrototypeId(3).is_valid());
        assert_eq!(serde_json::to_string(&AssetId(9)).unwrap(), "9");
    }

    #[test]
    fn test_resolve_by_kind() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 0)];
        db.prototypes = vec![named(2, PrototypeKind::Keyword, 0)];
        let reg = ContentRegistry::new(db).unwrap();
        assert_eq!(reg.resolve(PrototypeId(1)).unwrap().kind(), PrototypeKind::Rarity);
        assert_eq!(reg.resolve(PrototypeId(2)).unwrap().kind(), PrototypeKind::Keyword);
        assert!(reg.resolve(PrototypeId(3)).is_none());
        assert!(reg.rarity(PrototypeId(2)).is_none());
        assert_eq!(reg.ids_of_kind(PrototypeKind::Keyword), vec![PrototypeId(2)]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 0)];
        db.prototypes = vec![named(1, PrototypeKind::Avatar, 0)];
        let err = ContentRegistry::new(db).unwrap_err();
        assert!(matches!(err, ContentError::DuplicatePrototype { id: 1, .. }));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(0, 0)];
        assert!(matches!(
            ContentRegistry::new(db),
            Err(ContentError::InvalidPrototypeId("rarity"))
        ));
    }

    #[test]
    fn test_is_child_of_walks_parents() {
        let mut db = ContentDatabase::default();
        db.prototypes = vec![
            named(10, PrototypeKind::Other, 0),
            named(11, PrototypeKind::Other, 10),
            named(12, PrototypeKind::Other, 11),
        ];
        let reg = ContentRegistry::new(db).unwrap();
        assert!(reg.is_child_of(PrototypeId(12), PrototypeId(10)));
        assert!(reg.is_child_of(PrototypeId(12), PrototypeId(12)));
        assert!(!reg.is_child_of(PrototypeId(10), PrototypeId(12)));
        assert!(!reg.is_child_of(PrototypeId::INVALID, PrototypeId(10)));
    }

    #[test]
    fn test_is_child_of_survives_cycle() {
        let mut db = ContentDatabase::default();
        db.prototypes = vec![
            named(20, PrototypeKind::Other, 21),
            named(21, PrototypeKind::Other, 20),
        ];
        let reg = ContentRegistry::new(db).unwrap();
        assert!(!reg.is_child_of(PrototypeId(20), PrototypeId(99)));
        assert!(reg.is_child_of(PrototypeId(20), PrototypeId(21)));
    }

    #[test]
    fn test_asset_and_builtin_properties() {
        let mut db = ContentDatabase::default();
        db.prototypes = vec![named(5, PrototypeKind::Power, 0)];
        db.assets = vec![AssetBinding {
            asset: AssetId(77),
            prototype: PrototypeId(5),
        }];
        let reg = ContentRegistry::new(db).unwrap();
        assert_eq!(reg.resolve_by_asset(AssetId(77)), PrototypeId(5));
        assert_eq!(reg.resolve_by_asset(AssetId(78)), PrototypeId::INVALID);
        assert!(reg.property_info(PropertyEnum::ITEM_LEVEL).is_some());
    }

    #[test]
    fn test_difficulty_tier_in_range_open_bounds() {
        let mut db = ContentDatabase::default();
        db.difficulty_tiers = vec![
            DifficultyTierPrototype { id: PrototypeId(1), name: "Green".into(), tier: 1 },
            DifficultyTierPrototype { id: PrototypeId(2), name: "Red".into(), tier: 2 },
            DifficultyTierPrototype { id: PrototypeId(3), name: "Cosmic".into(), tier: 3 },
        ];
        let reg = ContentRegistry::new(db).unwrap();
        let (green, red, cosmic) = (PrototypeId(1), PrototypeId(2), PrototypeId(3));
        assert!(DifficultyTierPrototype::in_range(red, green, cosmic, &reg));
        assert!(!DifficultyTierPrototype::in_range(green, red, cosmic, &reg));
        assert!(DifficultyTierPrototype::in_range(cosmic, red, PrototypeId::INVALID, &reg));
        assert!(DifficultyTierPrototype::in_range(
            green,
            PrototypeId::INVALID,
            PrototypeId::INVALID,
            &reg,
        ));
        assert!(!DifficultyTierPrototype::in_range(PrototypeId(9), green, cosmic, &reg));
    }

    #[test]
    fn test_content_ron_round_trip() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 0), rarity(2, 1)];
        db.curves = vec![Curve::new(CurveId(4), 1, vec![1.0, 2.0])];
        let text = ron::to_string(&db).unwrap();
        let reg = ContentRegistry::from_ron_str(&text).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.curve(CurveId(4)).unwrap().get_at(2), 2.0);
    }
}
