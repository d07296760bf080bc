//! Loot Procedural Core Library
//!
//! Deterministic, data-driven loot generation:
//! - Prototype registry (rarities, affixes, items, curves, loot tables)
//! - Eval formula language over property collections
//! - Weighted loot trees with roll modifiers and drop restrictions
//! - Affix rolling under per-rarity limits, rank affixes
//! - Item mutation pipeline (atomic, traced)
//! - Content validation and Monte-Carlo drop audits

pub mod affix;
pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod eval;
pub mod logging;
pub mod loot;
pub mod mutation;
pub mod picker;
pub mod properties;
pub mod rank_roll;
pub mod registry;
pub mod rng;
