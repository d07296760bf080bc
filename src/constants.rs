//! Centralized constants for the loot procedural core.
//!
//! Limits and defaults shared by the loot tree, the affix model and Eval.
//! Per-module tuning (curve shapes, table weights) lives in content files.

// =====================================================
// Loot tree
// =====================================================

/// Deepest nesting of loot tables a single roll may traverse
pub const MAX_LOOT_TREE_DEPTH: u32 = 50;

/// Attempts made to downgrade rarity when an abstract item has no concrete match
pub const MAX_RARITY_DOWNGRADE_ATTEMPTS: u32 = 8;

/// Default player-facing level when a roll request does not carry one
pub const DEFAULT_LOOT_LEVEL: i32 = 1;

/// Lowest and highest level an item spec may carry
pub const MIN_ITEM_LEVEL: i32 = 1;
pub const MAX_ITEM_LEVEL: i32 = 100;

// =====================================================
// Affixes
// =====================================================

/// Upper bound reported for a category with no categorized limit entry
pub const UNLIMITED_AFFIX_COUNT: i16 = i16::MAX;

/// Number of parameters a property id can carry
pub const MAX_PROPERTY_PARAMS: usize = 4;

// =====================================================
// Eval
// =====================================================

/// Default tolerance for float `Equals`
pub const DEFAULT_EVAL_EPSILON: f32 = 0.00001;

/// Guard against content that builds a `For` loop with no exit
pub const MAX_EVAL_LOOP_ITERATIONS: u32 = 10_000;

// =====================================================
// Audit
// =====================================================

/// Default roll count for a drop-rate audit
pub const DEFAULT_AUDIT_ROLLS: u32 = 10_000;

/// Default base seed for audits and the CLI
pub const DEFAULT_BASE_SEED: u64 = 42;
