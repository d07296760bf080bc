//! Monte-Carlo Drop Audit
//!
//! Rolls one table many times with derived seeds and aggregates drop rates,
//! rarity spread and affix counts. Rolls run in parallel with rayon; results
//! are folded in seed order so the report is reproducible.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::LootEngineConfig;
use crate::loot::{roll_loot, LootRequest, LootResults, LootRollSettings, LootTablePrototype};
use crate::registry::{ContentRegistry, PrototypeId};
use crate::rng::derive_seed;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DropAudit {
    pub table: PrototypeId,
    pub rolls: u64,
    /// Rolls that granted nothing at all
    pub empty_rolls: u64,
    pub items_rolled: u64,
    pub item_counts: BTreeMap<PrototypeId, u64>,
    pub rarity_counts: BTreeMap<PrototypeId, u64>,
    pub total_affixes: u64,
    pub credits_total: i64,
}

impl DropAudit {
    pub fn empty_rate(&self) -> f64 {
        if self.rolls == 0 {
            return 0.0;
        }
        self.empty_rolls as f64 / self.rolls as f64
    }

    pub fn average_affix_count(&self) -> f64 {
        if self.items_rolled == 0 {
            return 0.0;
        }
        self.total_affixes as f64 / self.items_rolled as f64
    }

    /// Mean copies of `item` per roll
    pub fn drop_rate(&self, item: PrototypeId) -> f64 {
        if self.rolls == 0 {
            return 0.0;
        }
        self.item_counts.get(&item).copied().unwrap_or(0) as f64 / self.rolls as f64
    }

    fn record(&mut self, results: &LootResults) {
        self.rolls += 1;
        if results.is_empty() {
            self.empty_rolls += 1;
        }
        for spec in results.item_specs() {
            self.items_rolled += 1;
            *self.item_counts.entry(spec.item).or_default() += 1;
            *self.rarity_counts.entry(spec.rarity).or_default() += 1;
            self.total_affixes += spec.affixes.len() as u64;
        }
        self.credits_total += results.credits();
    }
}

pub fn run_drop_audit(
    registry: &ContentRegistry,
    table: &LootTablePrototype,
    config: &LootEngineConfig,
) -> DropAudit {
    run_drop_audit_with(registry, table, config, &LootRollSettings::default())
}

/// Audit with explicit roll settings (level, avatar, filters)
pub fn run_drop_audit_with(
    registry: &ContentRegistry,
    table: &LootTablePrototype,
    config: &LootEngineConfig,
    settings: &LootRollSettings,
) -> DropAudit {
    let _span =
        tracing::info_span!("drop_audit", table = ?table.id, rolls = config.audit_rolls).entered();

    let rolls: Vec<LootResults> = (0..u64::from(config.audit_rolls))
        .into_par_iter()
        .map(|i| {
            let request = LootRequest::new(registry, derive_seed(config.base_seed, i))
                .with_config(config)
                .with_settings(settings.clone());
            roll_loot(table, request)
        })
        .collect();

    let mut audit = DropAudit {
        table: table.id,
        ..Default::default()
    };
    for results in &rolls {
        audit.record(results);
    }
    tracing::info!(
        rolls = audit.rolls,
        items = audit.items_rolled,
        empty_rate = audit.empty_rate(),
        "drop audit finished"
    );
    audit
}
