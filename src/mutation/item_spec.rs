//! Draft item records produced by loot rolls.

use serde::{Deserialize, Serialize};

use crate::affix::AffixPosition;
use crate::properties::PropertyCollection;
use crate::registry::{EquipmentSlot, PrototypeId, PrototypeRegistry, RestrictionTestFlags};
use crate::rng::RandomSource;

/// Non-zero seed for items and affixes
pub fn roll_seed<R: RandomSource + ?Sized>(rng: &mut R) -> u32 {
    rng.next_in_range(1, i32::MAX) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AffixSpec {
    pub affix: PrototypeId,
    #[serde(default)]
    pub scope: PrototypeId,
    #[serde(default)]
    pub level_requirement: i32,
    #[serde(default)]
    pub seed: u32,
}

impl AffixSpec {
    pub fn key(&self) -> (PrototypeId, PrototypeId) {
        (self.affix, self.scope)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ItemBinding: u8 {
        const BOUND = 1 << 0;
        const TRADE_RESTRICTED = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSpec {
    pub item: PrototypeId,
    pub rarity: PrototypeId,
    pub level: i32,
    pub rank: i32,
    pub seed: u32,
    pub slot: EquipmentSlot,
    /// Avatar the item is bound to, `INVALID` when unbound
    pub equippable_by: PrototypeId,
    /// Avatar the item was rolled for
    pub roll_for: PrototypeId,
    pub binding: ItemBinding,
    /// Checks re-run whenever the draft is finalized
    #[serde(skip)]
    pub restriction_flags: RestrictionTestFlags,
    pub affixes: Vec<AffixSpec>,
    pub properties: PropertyCollection,
}

impl ItemSpec {
    pub fn is_valid(&self) -> bool {
        self.item.is_valid() && self.rarity.is_valid()
    }

    pub fn num_affixes_of_position(
        &self,
        position: AffixPosition,
        registry: &dyn PrototypeRegistry,
    ) -> i16 {
        self.affixes
            .iter()
            .filter(|a| registry.affix(a.affix).is_some_and(|p| p.position == position))
            .count() as i16
    }

    pub fn num_affixes_of_category(
        &self,
        category: PrototypeId,
        registry: &dyn PrototypeRegistry,
    ) -> i16 {
        self.affixes
            .iter()
            .filter(|a| registry.affix(a.affix).is_some_and(|p| p.has_category(category)))
            .count() as i16
    }

    /// Attach the registry's no-visuals affix in place of a visual one
    pub fn disable_visuals(&mut self, registry: &dyn PrototypeRegistry) -> bool {
        let no_visuals = registry.no_visuals_affix();
        if !no_visuals.is_valid() || self.affixes.iter().any(|a| a.affix == no_visuals) {
            return false;
        }
        self.affixes.retain(|a| {
            registry
                .affix(a.affix)
                .map_or(true, |p| p.position != AffixPosition::Visual)
        });
        self.affixes.push(AffixSpec {
            affix: no_visuals,
            ..Default::default()
        });
        true
    }

    /// Bind to `avatar` (or unbind); true when anything changed
    pub fn set_binding_state(&mut self, bound: bool, avatar: PrototypeId) -> bool {
        let avatar = if bound { avatar } else { PrototypeId::INVALID };
        let changed =
            self.binding.contains(ItemBinding::BOUND) != bound || self.equippable_by != avatar;
        self.binding.set(ItemBinding::BOUND, bound);
        self.equippable_by = avatar;
        changed
    }

    pub fn set_trade_restricted(&mut self, restricted: bool, remove_binding: bool) -> bool {
        let mut changed = self.binding.contains(ItemBinding::TRADE_RESTRICTED) != restricted;
        self.binding.set(ItemBinding::TRADE_RESTRICTED, restricted);
        if remove_binding {
            changed |= self.set_binding_state(false, PrototypeId::INVALID);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::AffixPrototype;
    use crate::registry::{ContentDatabase, ContentRegistry};

    fn affix(id: u64, position: AffixPosition, categories: Vec<PrototypeId>) -> AffixPrototype {
        AffixPrototype {
            id: PrototypeId(id),
            name: String::new(),
            position,
            weight: 1,
            keywords: vec![],
            categories,
            type_filters: vec![],
            scopes: vec![],
            duplicate_handling: Default::default(),
            level_requirement: 0,
            is_gem: false,
        }
    }

    fn registry() -> ContentRegistry {
        let mut db = ContentDatabase::default();
        db.affixes = vec![
            affix(1, AffixPosition::Prefix, vec![PrototypeId(50)]),
            affix(2, AffixPosition::Suffix, vec![PrototypeId(50)]),
            affix(3, AffixPosition::Visual, vec![]),
            affix(4, AffixPosition::Metadata, vec![]),
        ];
        db.no_visuals_affix = PrototypeId(4);
        ContentRegistry::new(db).unwrap()
    }

    fn spec_with(affixes: &[u64]) -> ItemSpec {
        ItemSpec {
            affixes: affixes
                .iter()
                .map(|id| AffixSpec {
                    affix: PrototypeId(*id),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_affix_counts() {
        let reg = registry();
        let spec = spec_with(&[1, 1, 2]);
        assert_eq!(spec.num_affixes_of_position(AffixPosition::Prefix, &reg), 2);
        assert_eq!(spec.num_affixes_of_position(AffixPosition::Visual, &reg), 0);
        assert_eq!(spec.num_affixes_of_category(PrototypeId(50), &reg), 3);
    }

    #[test]
    fn test_disable_visuals_once() {
        let reg = registry();
        let mut spec = spec_with(&[1, 3]);
        assert!(spec.disable_visuals(&reg));
        assert_eq!(
            spec.affixes.iter().map(|a| a.affix.0).collect::<Vec<_>>(),
            vec![1, 4]
        );
        assert!(!spec.disable_visuals(&reg));
    }

    #[test]
    fn test_binding_changes() {
        let mut spec = ItemSpec::default();
        assert!(spec.set_binding_state(true, PrototypeId(7)));
        assert!(!spec.set_binding_state(true, PrototypeId(7)));
        assert_eq!(spec.equippable_by, PrototypeId(7));

        assert!(spec.set_trade_restricted(true, true));
        assert!(spec.binding.contains(ItemBinding::TRADE_RESTRICTED));
        assert!(!spec.binding.contains(ItemBinding::BOUND));
        assert_eq!(spec.equippable_by, PrototypeId::INVALID);
        assert!(!spec.set_trade_restricted(true, true));
    }

    #[test]
    fn test_roll_seed_nonzero() {
        let mut rng = crate::rng::GRandom::new(3);
        for _ in 0..100 {
            assert_ne!(roll_seed(&mut rng), 0);
        }
    }
}
