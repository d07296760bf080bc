//! Loot generation.
//!
//! A loot table is a tree of `LootNode`s. Rolling walks the tree with one
//! RNG stream, drafts item specs at the leaves and runs them through the
//! mutation pipeline:
//! - `node`: node kinds, pick methods, drop leaves
//! - `modifiers`: per-node roll modifiers editing `LootRollSettings`
//! - `resolver`: the `ItemResolver` seam and its default implementation
//! - `results`: granted loot, effect instructions, roll-state traces

pub mod modifiers;
pub mod node;
pub mod resolver;
pub mod results;
pub mod settings;

use serde::{Deserialize, Serialize};

use crate::affix::LootContext;
use crate::config::LootEngineConfig;
use crate::constants::MAX_LOOT_TREE_DEPTH;
use crate::registry::{PrototypeId, PrototypeRegistry};

pub use modifiers::LootRollModifier;
pub use node::{
    CharacterFilter, LootAction, LootActionKind, LootNode, LootNodeKind, LootTable, PickMethod,
};
pub use resolver::{ItemResolver, LootOracle, LootResolver, MissionState, NoOracle};
pub use results::{LootCallback, LootEffect, LootResult, LootResults, RollState, RollTrace};
pub use settings::{CooldownGate, CooldownKind, LootDropChanceModifiers, LootRollSettings, Weekday};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LootRollResult: u8 {
        const NO_ROLL = 0;
        const SUCCESS = 1 << 0;
        const FAILURE = 1 << 1;
        const PARTIAL_SUCCESS = 1 << 2;
    }
}

impl LootRollResult {
    /// Success and failure together collapse to a partial success
    pub fn normalized(self) -> Self {
        if self.contains(Self::SUCCESS | Self::FAILURE) {
            Self::SUCCESS | Self::PARTIAL_SUCCESS
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootTablePrototype {
    pub id: PrototypeId,
    #[serde(default)]
    pub name: String,
    pub root: LootNode,
}

/// Everything one roll needs besides the table
pub struct LootRequest<'r> {
    pub registry: &'r dyn PrototypeRegistry,
    pub oracle: &'r dyn LootOracle,
    pub context: LootContext,
    pub settings: LootRollSettings,
    pub seed: u64,
    pub drop_rate_multiplier: f32,
    pub max_tree_depth: u32,
}

impl<'r> LootRequest<'r> {
    pub fn new(registry: &'r dyn PrototypeRegistry, seed: u64) -> Self {
        Self {
            registry,
            oracle: &resolver::NO_ORACLE,
            context: LootContext::default(),
            settings: LootRollSettings::default(),
            seed,
            drop_rate_multiplier: 1.0,
            max_tree_depth: MAX_LOOT_TREE_DEPTH,
        }
    }

    pub fn with_config(mut self, config: &LootEngineConfig) -> Self {
        self.drop_rate_multiplier = config.drop_rate_multiplier;
        self.max_tree_depth = config.max_loot_tree_depth;
        self
    }

    pub fn with_oracle(mut self, oracle: &'r dyn LootOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_context(mut self, context: LootContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_settings(mut self, settings: LootRollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.settings.level = level;
        self.settings.level_for_requirement_check = level;
        self
    }
}

/// Roll `table` once
///
/// Identical requests (seed, settings, oracle answers) produce identical
/// results.
pub fn roll_loot(table: &LootTablePrototype, request: LootRequest<'_>) -> LootResults {
    let _span = tracing::debug_span!("roll_loot", table = ?table.id, seed = request.seed).entered();

    let mut resolver = LootResolver::new(request.registry, request.seed)
        .with_oracle(request.oracle)
        .with_context(request.context)
        .with_drop_rate_multiplier(request.drop_rate_multiplier)
        .with_max_tree_depth(request.max_tree_depth);
    let mut settings = request.settings;

    let outcome = table.root.select(&mut settings, &mut resolver);
    let results = resolver.into_results(outcome.normalized());
    tracing::debug!(
        items = results.item_count(),
        results = results.results.len(),
        outcome = ?results.outcome,
        "loot rolled"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::RarityPrototype;
    use crate::registry::{
        ContentDatabase, ContentRegistry, Curve, CurveId, EquipmentSlot, ItemPrototype,
    };

    fn content() -> (ContentRegistry, LootTablePrototype) {
        let mut db = ContentDatabase::default();
        db.curves = vec![Curve::new(CurveId(1), 1, vec![1.0; 100])];
        db.rarities = vec![RarityPrototype {
            id: PrototypeId(10),
            name: "common".into(),
            downgrade_to: PrototypeId::INVALID,
            weight_curve: CurveId(1),
        }];
        db.items = (0..4)
            .map(|i| ItemPrototype {
                id: PrototypeId(100 + i),
                name: String::new(),
                parent: PrototypeId::INVALID,
                is_abstract: false,
                slot: EquipmentSlot::Gear02,
                usable_by: vec![],
                builtin_affixes: vec![],
                affix_limits: vec![],
                drop_restrictions: vec![],
            })
            .collect();
        let mut root = LootNode::table(
            PickMethod::PickWeight,
            (0..4).map(|i| LootNode::item(PrototypeId(100 + i))).collect(),
        );
        if let LootNodeKind::Table(table) = &mut root.kind {
            table.num_min = 1;
            table.num_max = 3;
            table.no_drop_percent = 0.3;
        }
        let table = LootTablePrototype {
            id: PrototypeId(900),
            name: "chest".into(),
            root,
        };
        (ContentRegistry::new(db).unwrap(), table)
    }

    #[test]
    fn test_roll_loot_deterministic() {
        let (reg, table) = content();
        for seed in 0..20 {
            let a = roll_loot(&table, LootRequest::new(&reg, seed).with_level(12));
            let b = roll_loot(&table, LootRequest::new(&reg, seed).with_level(12));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_roll_loot_zero_multiplier_never_drops() {
        let (reg, table) = content();
        let config = LootEngineConfig {
            drop_rate_multiplier: 0.0,
            ..Default::default()
        };
        for seed in 0..20 {
            let results = roll_loot(&table, LootRequest::new(&reg, seed).with_config(&config));
            assert!(results.is_empty());
        }
    }

    #[test]
    fn test_roll_loot_counts_in_range() {
        let (reg, table) = content();
        for seed in 0..50 {
            let results = roll_loot(&table, LootRequest::new(&reg, seed));
            assert!(results.item_count() <= 3);
            assert!(results.item_specs().all(|s| s.rarity == PrototypeId(10)));
        }
    }

    #[test]
    fn test_normalized_outcome() {
        let mixed = LootRollResult::SUCCESS | LootRollResult::FAILURE;
        assert_eq!(
            mixed.normalized(),
            LootRollResult::SUCCESS | LootRollResult::PARTIAL_SUCCESS
        );
        assert_eq!(LootRollResult::FAILURE.normalized(), LootRollResult::FAILURE);
    }

    #[test]
    fn test_table_from_ron() {
        let src = r#"(
            id: 77,
            name: "boss",
            root: (
                kind: Table((
                    pick_method: PickAll,
                    no_drop_percent: 1.5,
                    choices: [
                        (kind: Item(item: 100)),
                        (weight: 3, modifiers: [OffsetLevel(2)], kind: Credits(1)),
                    ],
                )),
            ),
        )"#;
        let mut table: LootTablePrototype = ron::from_str(src).unwrap();
        table.root.post_process();
        let LootNodeKind::Table(inner) = &table.root.kind else {
            panic!("expected table");
        };
        assert_eq!(inner.no_drop_percent, 1.0);
        assert_eq!(inner.choices[1].weight, 3);
        assert_eq!(inner.choices[0].weight, 1);
    }
}
