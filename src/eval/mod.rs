//! Eval: the data-driven formula language used by content.
//!
//! - `ast`: expression tree nodes and context slots
//! - `value`: dynamic values with numeric promotion
//! - `context`: bindings for entity/property/condition data, stack frames
//! - `interpreter`: recursive evaluation plus typed `run_*` wrappers
//!
//! Evaluation never fails outright. Malformed nodes log a warning and
//! produce `EvalValue::Error`, which the typed wrappers map to zero.

pub mod ast;
pub mod context;
pub mod interpreter;
pub mod value;

pub use ast::{ContextSlot, EvalNode};
pub use context::{ConditionData, ContextBinding, EvalContext, EvalHost, PropertyStore};
pub use interpreter::{evaluate, run_asset, run_bool, run_float, run_int, run_proto_ref};
pub use value::EvalValue;

/// Evaluate a whole formula under a debug span
pub fn run(node: &EvalNode, ctx: &mut EvalContext<'_>) -> EvalValue {
    let _span = tracing::debug_span!("eval", op = node.op_name()).entered();
    let value = evaluate(node, ctx);
    tracing::trace!(result = %value, "eval finished");
    value
}
