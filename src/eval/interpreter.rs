//! Recursive evaluator for `EvalNode` trees.
//!
//! Any malformed node logs a warning with its expression and yields
//! `EvalValue::Error`; the typed `run_*` wrappers turn that into a zero
//! value, so a formula always completes.

use crate::constants::{MAX_EVAL_LOOP_ITERATIONS, MAX_PROPERTY_PARAMS};
use crate::properties::{PropertyEnum, PropertyId, PropertyValue};
use crate::registry::{AssetId, DifficultyTierPrototype, PrototypeId};

use super::ast::{ContextSlot, EvalNode};
use super::context::{ContextBinding, EvalContext, PropertyStore};
use super::value::EvalValue;

fn fail(node: &EvalNode, reason: &str) -> EvalValue {
    tracing::warn!(op = node.op_name(), expr = %node, "eval: {reason}");
    EvalValue::Error
}

// ============================================================
// Typed entry points
// ============================================================

fn warn_return_type(node: &EvalNode, value: &EvalValue, expected: &str) {
    if !value.is_error() {
        tracing::warn!(
            op = node.op_name(),
            expr = %node,
            got = value.type_name(),
            expected,
            "eval: invalid return type"
        );
    }
}

pub fn run_int(node: &EvalNode, ctx: &mut EvalContext<'_>) -> i64 {
    let value = evaluate(node, ctx);
    value.to_int().unwrap_or_else(|| {
        warn_return_type(node, &value, "Int");
        0
    })
}

pub fn run_float(node: &EvalNode, ctx: &mut EvalContext<'_>) -> f32 {
    let value = evaluate(node, ctx);
    value.to_float().unwrap_or_else(|| {
        warn_return_type(node, &value, "Float");
        0.0
    })
}

pub fn run_bool(node: &EvalNode, ctx: &mut EvalContext<'_>) -> bool {
    let value = evaluate(node, ctx);
    value.to_bool().unwrap_or_else(|| {
        warn_return_type(node, &value, "Bool");
        false
    })
}

pub fn run_proto_ref(node: &EvalNode, ctx: &mut EvalContext<'_>) -> PrototypeId {
    let value = evaluate(node, ctx);
    value.to_proto_ref().unwrap_or_else(|| {
        warn_return_type(node, &value, "ProtoRef");
        PrototypeId::INVALID
    })
}

pub fn run_asset(node: &EvalNode, ctx: &mut EvalContext<'_>) -> AssetId {
    let value = evaluate(node, ctx);
    value.to_asset().unwrap_or_else(|| {
        warn_return_type(node, &value, "AssetRef");
        AssetId::INVALID
    })
}

// ============================================================
// Dispatch
// ============================================================

pub fn evaluate(node: &EvalNode, ctx: &mut EvalContext<'_>) -> EvalValue {
    match node {
        EvalNode::LoadBool(v) => EvalValue::Bool(*v),
        EvalNode::LoadInt(v) => EvalValue::Int(*v),
        EvalNode::LoadFloat(v) => EvalValue::Float(*v),
        EvalNode::LoadAssetRef(a) => EvalValue::AssetRef(*a),
        EvalNode::LoadProtoRef(p) => EvalValue::ProtoRef(*p),
        EvalNode::LoadCurve { curve, index } => {
            let Some(position) = evaluate(index, ctx).to_int() else {
                return fail(node, "non-numeric curve index");
            };
            let Some(registry) = ctx.registry() else {
                return fail(node, "no registry for curve lookup");
            };
            match registry.curve(*curve) {
                Some(c) => {
                    let position = position.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                    EvalValue::Float(c.get_at(position))
                }
                None => {
                    tracing::warn!(curve = ?curve, "eval: curve missing");
                    EvalValue::Error
                }
            }
        }

        EvalNode::LoadContextInt(slot) => match ctx.value(*slot) {
            Some(value) if value.is_numeric() => EvalValue::Int(value.to_int().unwrap_or(0)),
            _ => fail(node, "non-numeric value in context var"),
        },
        EvalNode::LoadContextProtoRef(slot) => {
            if slot.var_index().is_none() {
                return fail(node, "context out of the bounds of context vars");
            }
            let proto = ctx
                .value(*slot)
                .and_then(|v| v.to_proto_ref())
                .unwrap_or(PrototypeId::INVALID);
            EvalValue::ProtoRef(proto)
        }
        EvalNode::LoadProp { slot, prop } => read_property(node, ctx, *slot, *prop),
        EvalNode::LoadPropContextParams {
            slot,
            prop,
            param_slot,
        } => {
            let param = match ctx.binding(*param_slot) {
                Some(ContextBinding::Value(value)) => value.to_param(),
                Some(ContextBinding::Entity { id, .. }) => Some(*id),
                _ => None,
            };
            let Some(param) = param else {
                return fail(node, "param context var holds no usable value");
            };
            read_property(node, ctx, *slot, PropertyId::with_params(*prop, &[param]))
        }
        EvalNode::LoadPropEvalParams { slot, prop, params } => {
            let Some(id) = eval_property_id(node, ctx, *prop, params) else {
                return EvalValue::Error;
            };
            read_property(node, ctx, *slot, id)
        }
        EvalNode::AssignProp { slot, prop, value } => {
            let value = evaluate(value, ctx);
            write_property(node, ctx, *slot, *prop, value)
        }
        EvalNode::AssignPropEvalParams {
            slot,
            prop,
            params,
            value,
        } => {
            let Some(id) = eval_property_id(node, ctx, *prop, params) else {
                return EvalValue::Error;
            };
            let value = evaluate(value, ctx);
            write_property(node, ctx, *slot, id, value)
        }
        EvalNode::HasProp { slot, prop } => match ctx.properties(*slot) {
            Some(props) => EvalValue::Bool(props.has(*prop)),
            None => fail(node, "context has no property collection"),
        },
        EvalNode::SwapProp { left, right, prop } => swap_property(node, ctx, *left, *right, *prop),
        EvalNode::LoadEntityToContextVar { entity, slot } => {
            let Some(id) = evaluate(entity, ctx).to_entity_id() else {
                return fail(node, "entity expression is not an entity id");
            };
            ctx.set_entity(*slot, id);
            EvalValue::EntityId(id)
        }
        EvalNode::LoadConditionCollectionToContext { entity_slot, slot } => {
            let Some(id) = ctx.entity_id(*entity_slot) else {
                return fail(node, "context has no entity");
            };
            let Some(host) = ctx.host() else {
                return fail(node, "no host for condition lookup");
            };
            let conditions = host.entity_conditions(id);
            ctx.set_conditions(*slot, conditions);
            EvalValue::Undefined
        }
        EvalNode::IsContextDataNull(slot) => is_context_data_null(node, ctx, *slot),

        EvalNode::Add(a, b) => arithmetic(node, ctx, a, b, Arith::Add),
        EvalNode::Sub(a, b) => arithmetic(node, ctx, a, b, Arith::Sub),
        EvalNode::Mult(a, b) => arithmetic(node, ctx, a, b, Arith::Mult),
        EvalNode::Exponent(a, b) => arithmetic(node, ctx, a, b, Arith::Exponent),
        EvalNode::Modulus(a, b) => arithmetic(node, ctx, a, b, Arith::Modulus),
        EvalNode::Max(a, b) => arithmetic(node, ctx, a, b, Arith::Max),
        EvalNode::Min(a, b) => arithmetic(node, ctx, a, b, Arith::Min),
        EvalNode::Div(a, b) => {
            let (Some(lhs), Some(rhs)) = numeric_pair(node, ctx, a, b) else {
                return EvalValue::Error;
            };
            let divisor = rhs.to_float().unwrap_or(0.0);
            if divisor == 0.0 {
                return fail(node, "division by zero");
            }
            EvalValue::Float(lhs.to_float().unwrap_or(0.0) / divisor)
        }

        EvalNode::GreaterThan(a, b) => compare(node, ctx, a, b, |x, y| x > y, |x, y| x > y),
        EvalNode::LessThan(a, b) => compare(node, ctx, a, b, |x, y| x < y, |x, y| x < y),
        EvalNode::Equals { lhs, rhs, epsilon } => equals(node, ctx, lhs, rhs, *epsilon),

        EvalNode::And(a, b) => {
            let EvalValue::Bool(lhs) = evaluate(a, ctx) else {
                return fail(node, "non-bool field Arg1");
            };
            if !lhs {
                return EvalValue::Bool(false);
            }
            match evaluate(b, ctx) {
                EvalValue::Bool(rhs) => EvalValue::Bool(rhs),
                _ => fail(node, "non-bool field Arg2"),
            }
        }
        EvalNode::Or(a, b) => {
            let EvalValue::Bool(lhs) = evaluate(a, ctx) else {
                return fail(node, "non-bool field Arg1");
            };
            if lhs {
                return EvalValue::Bool(true);
            }
            match evaluate(b, ctx) {
                EvalValue::Bool(rhs) => EvalValue::Bool(rhs),
                _ => fail(node, "non-bool field Arg2"),
            }
        }
        EvalNode::Not(a) => match evaluate(a, ctx) {
            EvalValue::Bool(v) => EvalValue::Bool(!v),
            _ => fail(node, "non-bool field Arg"),
        },

        EvalNode::IfElse {
            condition,
            then,
            otherwise,
        } => match evaluate(condition, ctx).to_bool() {
            Some(true) => evaluate(then, ctx),
            Some(false) => match otherwise {
                Some(otherwise) => evaluate(otherwise, ctx),
                None => EvalValue::Undefined,
            },
            None => fail(node, "condition is not a bool"),
        },
        EvalNode::Scope(body) => {
            ctx.push_frame();
            let result = run_body(body, ctx);
            ctx.pop_frame();
            result
        }
        EvalNode::For {
            pre,
            condition,
            post,
            body,
        } => {
            ctx.push_frame();
            let result = run_for(node, ctx, pre.as_deref(), condition, post.as_deref(), body);
            ctx.pop_frame();
            result
        }
        EvalNode::ForEachConditionInContext {
            source,
            pre,
            post,
            body,
        } => for_each_condition(node, ctx, *source, pre.as_deref(), post.as_deref(), body),
        EvalNode::ForEachProtoRefInContextRefList {
            source,
            pre,
            post,
            body,
        } => for_each_proto_ref(node, ctx, *source, pre.as_deref(), post.as_deref(), body),

        EvalNode::RandomFloat { min, max } => match ctx.rng() {
            Some(rng) => EvalValue::Float(rng.next_float_range(*min, *max)),
            None => fail(node, "no random source in context"),
        },
        EvalNode::RandomInt { min, max } => match ctx.rng() {
            Some(rng) => {
                if max < min {
                    return EvalValue::Int(*min as i64);
                }
                EvalValue::Int(rng.next_in_range(*min, max.saturating_add(1)) as i64)
            }
            None => fail(node, "no random source in context"),
        },

        EvalNode::EntityHasKeyword { slot, keyword } => {
            with_host_entity(node, ctx, *slot, |host, id| {
                EvalValue::Bool(host.entity_has_keyword(id, *keyword))
            })
        }
        EvalNode::EntityHasTalent { slot, talent } => {
            with_host_entity(node, ctx, *slot, |host, id| {
                EvalValue::Bool(host.entity_has_talent(id, *talent))
            })
        }
        EvalNode::GetCombatLevel(slot) => with_host_entity(node, ctx, *slot, |host, id| {
            EvalValue::Int(host.combat_level(id))
        }),
        EvalNode::GetPowerRank { slot, power } => with_host_entity(node, ctx, *slot, |host, id| {
            EvalValue::Int(host.power_rank(id, *power))
        }),
        EvalNode::CalcPowerRank { slot, power } => with_host_entity(node, ctx, *slot, |host, id| {
            EvalValue::Int(host.calc_power_rank(id, *power))
        }),
        EvalNode::IsInParty(slot) => with_host_entity(node, ctx, *slot, |host, id| {
            EvalValue::Bool(host.is_in_party(id))
        }),
        EvalNode::GetDamageReductionPct {
            slot,
            damage_type,
            vs_level,
        } => {
            let vs_level = match vs_level {
                Some(level) => match evaluate(level, ctx).to_int() {
                    Some(level) => Some(level),
                    None => return fail(node, "non-numeric level"),
                },
                None => None,
            };
            with_host_entity(node, ctx, *slot, |host, id| {
                let level = vs_level.unwrap_or_else(|| host.combat_level(id));
                EvalValue::Float(host.damage_reduction_pct(id, *damage_type, level))
            })
        }
        EvalNode::GetDistanceToEntity {
            source,
            target,
            edge_to_edge,
        } => {
            let Some(target) = ctx.entity_id(*target) else {
                return fail(node, "target context has no entity");
            };
            with_host_entity(node, ctx, *source, |host, id| {
                match host.distance_to_entity(id, target, *edge_to_edge) {
                    Some(distance) => EvalValue::Float(distance),
                    None => fail(node, "entities are not in the same world"),
                }
            })
        }
        EvalNode::HasEntityInInventory {
            slot,
            entity,
            inventory,
        } => {
            if !inventory.is_valid() {
                return fail(node, "inventory is not valid");
            }
            with_host_entity(node, ctx, *slot, |host, id| {
                EvalValue::Bool(host.has_entity_in_inventory(id, *entity, *inventory))
            })
        }
        EvalNode::DifficultyTierRange { slot, min, max } => {
            difficulty_tier_range(node, ctx, *slot, *min, *max)
        }
        EvalNode::MissionIsActive { slot, mission }
        | EvalNode::MissionIsComplete { slot, mission } => {
            if !mission.is_valid() {
                return fail(node, "missing mission field");
            }
            let active = matches!(node, EvalNode::MissionIsActive { .. });
            with_host_entity(node, ctx, *slot, |host, id| {
                EvalValue::Bool(if active {
                    host.mission_is_active(id, *mission)
                } else {
                    host.mission_is_complete(id, *mission)
                })
            })
        }
        EvalNode::IsDynamicCombatLevelEnabled => EvalValue::Bool(true),
        EvalNode::ExportError => fail(node, "export error node reached"),
    }
}

// ============================================================
// Properties
// ============================================================

fn eval_property_id(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    prop: PropertyEnum,
    params: &[EvalNode],
) -> Option<PropertyId> {
    if params.len() > MAX_PROPERTY_PARAMS {
        tracing::warn!(expr = %node, count = params.len(), "eval: extra property params ignored");
    }
    let mut values = [0u64; MAX_PROPERTY_PARAMS];
    for (slot, param) in values.iter_mut().zip(params) {
        let value = evaluate(param, ctx);
        match value.to_param() {
            Some(v) => *slot = v,
            None => {
                fail(node, "property param is not an int or reference");
                return None;
            }
        }
    }
    Some(PropertyId::with_params(prop, &values))
}

fn read_property(
    node: &EvalNode,
    ctx: &EvalContext<'_>,
    slot: ContextSlot,
    id: PropertyId,
) -> EvalValue {
    let declared = match ctx.registry() {
        Some(registry) => match registry.property_info(id.prop) {
            Some(info) => Some(info.data_type),
            None => return fail(node, "property enum does not resolve"),
        },
        None => None,
    };
    let Some(props) = ctx.properties(slot) else {
        return fail(node, "context has no property collection");
    };
    match (props.get(id), declared) {
        (Some(value), _) => value.into(),
        (None, Some(data_type)) => PropertyValue::default_for(data_type).into(),
        (None, None) => EvalValue::Int(0),
    }
}

fn write_property(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    slot: ContextSlot,
    id: PropertyId,
    value: EvalValue,
) -> EvalValue {
    if value.is_error() {
        return EvalValue::Error;
    }
    let declared = match ctx.registry() {
        Some(registry) => match registry.property_info(id.prop) {
            Some(info) => Some(info.data_type),
            None => return fail(node, "property enum does not resolve"),
        },
        None => None,
    };
    let existing = ctx
        .properties(slot)
        .and_then(|props| props.get(id))
        .map(|v| v.data_type());
    let Some(data_type) = declared.or(existing).or_else(|| value.natural_data_type()) else {
        return fail(node, "value cannot be stored in a property");
    };
    let Some(stored) = value.to_property_value(data_type) else {
        return fail(node, "value type does not match property type");
    };
    match ctx.properties_mut(slot) {
        Some(props) => {
            props.set(id, stored);
            value
        }
        None => fail(node, "context has no writable property collection"),
    }
}

fn swap_property(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    left: ContextSlot,
    right: ContextSlot,
    prop: PropertyId,
) -> EvalValue {
    let (Some(left_value), Some(right_value)) = (
        ctx.properties(left).map(|p| p.get(prop)),
        ctx.properties(right).map(|p| p.get(prop)),
    ) else {
        return fail(node, "context has no property collection");
    };
    if ctx.properties_mut(left).is_none() || ctx.properties_mut(right).is_none() {
        return fail(node, "context has no writable property collection");
    }
    for (slot, value) in [(left, right_value), (right, left_value)] {
        if let Some(props) = ctx.properties_mut(slot) {
            match value {
                Some(value) => props.set(prop, value),
                None => {
                    props.remove(prop);
                }
            }
        }
    }
    EvalValue::Bool(true)
}

fn is_context_data_null(node: &EvalNode, ctx: &EvalContext<'_>, slot: ContextSlot) -> EvalValue {
    match slot {
        ContextSlot::LocalStack | ContextSlot::CallerStack | ContextSlot::Globals => {
            EvalValue::Bool(ctx.properties(slot).is_none())
        }
        _ => match ctx.binding(slot) {
            Some(ContextBinding::Unbound) if slot.is_user_var() => EvalValue::Bool(true),
            Some(ContextBinding::Properties(_))
            | Some(ContextBinding::Entity { .. })
            | Some(ContextBinding::Conditions(_))
            | Some(ContextBinding::ProtoRefList(_)) => EvalValue::Bool(false),
            _ => fail(node, "checked on a context var that is not a pointer"),
        },
    }
}

fn difficulty_tier_range(
    node: &EvalNode,
    ctx: &EvalContext<'_>,
    slot: ContextSlot,
    min: PrototypeId,
    max: PrototypeId,
) -> EvalValue {
    let mut tier = PrototypeId::INVALID;
    if let (Some(ContextBinding::Entity { id, .. }), Some(host)) = (ctx.binding(slot), ctx.host()) {
        tier = host.difficulty_tier(*id);
    }
    if !tier.is_valid() {
        if let Some(props) = ctx.properties(slot) {
            tier = props.get_prototype(PropertyEnum::DIFFICULTY_TIER);
        }
    }
    if !tier.is_valid() {
        return EvalValue::Bool(true);
    }
    match ctx.registry() {
        Some(registry) => {
            EvalValue::Bool(DifficultyTierPrototype::in_range(tier, min, max, registry))
        }
        None => fail(node, "no registry for difficulty tier lookup"),
    }
}

fn with_host_entity(
    node: &EvalNode,
    ctx: &EvalContext<'_>,
    slot: ContextSlot,
    query: impl FnOnce(&dyn super::context::EvalHost, u64) -> EvalValue,
) -> EvalValue {
    let Some(id) = ctx.entity_id(slot) else {
        return fail(node, "context has no entity");
    };
    match ctx.host() {
        Some(host) => query(host, id),
        None => fail(node, "no host for entity query"),
    }
}

// ============================================================
// Arithmetic and comparison
// ============================================================

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mult,
    Exponent,
    Modulus,
    Max,
    Min,
}

fn numeric_pair(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    a: &EvalNode,
    b: &EvalNode,
) -> (Option<EvalValue>, Option<EvalValue>) {
    let lhs = evaluate(a, ctx);
    if !lhs.is_numeric() {
        fail(node, "non-numeric field Arg1");
        return (None, None);
    }
    let rhs = evaluate(b, ctx);
    if !rhs.is_numeric() {
        fail(node, "non-numeric field Arg2");
        return (None, None);
    }
    (Some(lhs), Some(rhs))
}

fn arithmetic(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    a: &EvalNode,
    b: &EvalNode,
    op: Arith,
) -> EvalValue {
    let (Some(lhs), Some(rhs)) = numeric_pair(node, ctx, a, b) else {
        return EvalValue::Error;
    };

    if let (EvalValue::Int(x), EvalValue::Int(y)) = (lhs, rhs) {
        let result = match op {
            Arith::Add => x.checked_add(y),
            Arith::Sub => x.checked_sub(y),
            Arith::Mult => x.checked_mul(y),
            Arith::Modulus => x.checked_rem(y),
            Arith::Max => Some(x.max(y)),
            Arith::Min => Some(x.min(y)),
            Arith::Exponent => match u32::try_from(y) {
                Ok(exp) => x.checked_pow(exp),
                Err(_) => return EvalValue::Float((x as f32).powf(y as f32)),
            },
        };
        return match result {
            Some(v) => EvalValue::Int(v),
            None => fail(node, "integer overflow or zero divisor"),
        };
    }

    let x = lhs.to_float().unwrap_or(0.0);
    let y = rhs.to_float().unwrap_or(0.0);
    let result = match op {
        Arith::Add => x + y,
        Arith::Sub => x - y,
        Arith::Mult => x * y,
        Arith::Exponent => x.powf(y),
        Arith::Max => x.max(y),
        Arith::Min => x.min(y),
        Arith::Modulus => {
            if y == 0.0 {
                return fail(node, "modulus by zero");
            }
            x % y
        }
    };
    EvalValue::Float(result)
}

fn compare(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    a: &EvalNode,
    b: &EvalNode,
    int_cmp: fn(i64, i64) -> bool,
    float_cmp: fn(f32, f32) -> bool,
) -> EvalValue {
    let (Some(lhs), Some(rhs)) = numeric_pair(node, ctx, a, b) else {
        return EvalValue::Error;
    };
    match (lhs, rhs) {
        (EvalValue::Int(x), EvalValue::Int(y)) => EvalValue::Bool(int_cmp(x, y)),
        _ => EvalValue::Bool(float_cmp(
            lhs.to_float().unwrap_or(0.0),
            rhs.to_float().unwrap_or(0.0),
        )),
    }
}

fn equals(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    a: &EvalNode,
    b: &EvalNode,
    epsilon: f32,
) -> EvalValue {
    let lhs = evaluate(a, ctx);
    if lhs.is_error() {
        return fail(node, "error field Arg1");
    }
    let rhs = evaluate(b, ctx);
    if rhs.is_error() {
        return fail(node, "error field Arg2");
    }
    let result = match (lhs, rhs) {
        (EvalValue::Int(x), EvalValue::Int(y)) => x == y,
        (EvalValue::Int(_) | EvalValue::Float(_), EvalValue::Int(_) | EvalValue::Float(_)) => {
            let x = lhs.to_float().unwrap_or(0.0);
            let y = rhs.to_float().unwrap_or(0.0);
            (x - y).abs() <= epsilon
        }
        (EvalValue::ProtoRef(x), EvalValue::ProtoRef(y)) => x == y,
        (EvalValue::AssetRef(x), EvalValue::AssetRef(y)) => x == y,
        (EvalValue::Bool(x), EvalValue::Bool(y)) => x == y,
        (EvalValue::EntityId(x), EvalValue::EntityId(y)) => x == y,
        _ => return fail(node, "mismatched arg types"),
    };
    EvalValue::Bool(result)
}

// ============================================================
// Control flow
// ============================================================

/// Evaluate in order; the last value is the result, an error stops the block
fn run_body(body: &[EvalNode], ctx: &mut EvalContext<'_>) -> EvalValue {
    let mut last = EvalValue::Undefined;
    for statement in body {
        last = evaluate(statement, ctx);
        if last.is_error() {
            break;
        }
    }
    last
}

/// Guard result: `Some(true)` passes, `None` is an error
fn run_guard(guard: Option<&EvalNode>, ctx: &mut EvalContext<'_>, default: bool) -> Option<bool> {
    match guard {
        Some(guard) => evaluate(guard, ctx).to_bool(),
        None => Some(default),
    }
}

fn run_for(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    pre: Option<&EvalNode>,
    condition: &EvalNode,
    post: Option<&EvalNode>,
    body: &[EvalNode],
) -> EvalValue {
    if let Some(pre) = pre {
        if evaluate(pre, ctx).is_error() {
            return EvalValue::Error;
        }
    }
    let mut iterations = 0u32;
    loop {
        match evaluate(condition, ctx).to_bool() {
            Some(true) => {}
            Some(false) => return EvalValue::Undefined,
            None => return fail(node, "loop condition is not a bool"),
        }
        iterations += 1;
        if iterations > MAX_EVAL_LOOP_ITERATIONS {
            return fail(node, "loop iteration limit exceeded");
        }
        if run_body(body, ctx).is_error() {
            return EvalValue::Error;
        }
        if let Some(post) = post {
            if evaluate(post, ctx).is_error() {
                return EvalValue::Error;
            }
        }
    }
}

fn for_each_condition(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    source: ContextSlot,
    pre: Option<&EvalNode>,
    post: Option<&EvalNode>,
    body: &[EvalNode],
) -> EvalValue {
    let mut conditions = match ctx.replace_binding(source, ContextBinding::Unbound) {
        ContextBinding::Conditions(list) => list,
        other => {
            ctx.replace_binding(source, other);
            return fail(node, "context var is not a condition collection");
        }
    };

    ctx.push_frame();
    let mut result = EvalValue::Undefined;
    for condition in conditions.iter_mut() {
        let props = std::mem::take(&mut condition.properties);
        let saved_condition = ctx.replace_binding(
            ContextSlot::Condition,
            ContextBinding::Properties(PropertyStore::Owned(props)),
        );
        let saved_keywords = ctx.replace_binding(
            ContextSlot::ConditionKeywords,
            ContextBinding::ProtoRefList(condition.keywords.clone()),
        );

        let mut stop = false;
        match run_guard(pre, ctx, true) {
            Some(true) => {
                if run_body(body, ctx).is_error() {
                    result = EvalValue::Error;
                    stop = true;
                }
            }
            Some(false) => {}
            None => {
                result = fail(node, "pre guard is not a bool");
                stop = true;
            }
        }
        if !stop {
            match run_guard(post, ctx, false) {
                Some(brk) => stop = brk,
                None => {
                    result = fail(node, "post guard is not a bool");
                    stop = true;
                }
            }
        }

        if let Some(props) = ctx.take_owned_properties(ContextSlot::Condition) {
            condition.properties = props;
        }
        ctx.replace_binding(ContextSlot::Condition, saved_condition);
        ctx.replace_binding(ContextSlot::ConditionKeywords, saved_keywords);
        if stop {
            break;
        }
    }
    ctx.pop_frame();

    ctx.replace_binding(source, ContextBinding::Conditions(conditions));
    result
}

fn for_each_proto_ref(
    node: &EvalNode,
    ctx: &mut EvalContext<'_>,
    source: ContextSlot,
    pre: Option<&EvalNode>,
    post: Option<&EvalNode>,
    body: &[EvalNode],
) -> EvalValue {
    let list = match ctx.binding(source) {
        Some(ContextBinding::ProtoRefList(list)) => list.clone(),
        _ => return fail(node, "context var is not a prototype list"),
    };

    ctx.push_frame();
    let mut result = EvalValue::Undefined;
    for proto in list {
        if let Some(frame) = ctx.properties_mut(ContextSlot::LocalStack) {
            frame.set(PropertyEnum::EVAL_LOOP_VAR_PROTO_REF, PropertyValue::Prototype(proto));
        }
        match run_guard(pre, ctx, true) {
            Some(true) => {
                if run_body(body, ctx).is_error() {
                    result = EvalValue::Error;
                    break;
                }
            }
            Some(false) => {}
            None => {
                result = fail(node, "pre guard is not a bool");
                break;
            }
        }
        match run_guard(post, ctx, false) {
            Some(true) => break,
            Some(false) => {}
            None => {
                result = fail(node, "post guard is not a bool");
                break;
            }
        }
    }
    ctx.pop_frame();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::{ConditionData, EvalHost};
    use crate::properties::PropertyCollection;
    use crate::registry::{ContentDatabase, ContentRegistry, Curve, CurveId};
    use crate::rng::GRandom;

    fn int(v: i64) -> EvalNode {
        EvalNode::LoadInt(v)
    }

    fn float(v: f32) -> EvalNode {
        EvalNode::LoadFloat(v)
    }

    fn eval(node: &EvalNode) -> EvalValue {
        evaluate(node, &mut EvalContext::new())
    }

    #[test]
    fn test_add_ints() {
        assert_eq!(eval(&EvalNode::add(int(2), int(3))), EvalValue::Int(5));
    }

    #[test]
    fn test_if_else_greater_than() {
        let node = EvalNode::if_else(EvalNode::greater_than(int(3), int(2)), int(1), int(0));
        assert_eq!(eval(&node), EvalValue::Int(1));
        let node = EvalNode::if_else(EvalNode::greater_than(int(1), int(2)), int(1), int(0));
        assert_eq!(eval(&node), EvalValue::Int(0));
    }

    #[test]
    fn test_assign_then_get() {
        let mut props = PropertyCollection::new();
        {
            let mut ctx = EvalContext::new();
            ctx.set_properties_mut(ContextSlot::Default, &mut props);
            let node = EvalNode::assign(ContextSlot::Default, PropertyEnum::ITEM_LEVEL, int(7));
            assert_eq!(evaluate(&node, &mut ctx), EvalValue::Int(7));
        }
        assert_eq!(props.get(PropertyEnum::ITEM_LEVEL), Some(PropertyValue::Integer(7)));
    }

    #[test]
    fn test_float_promotion_and_div() {
        assert_eq!(eval(&EvalNode::add(int(1), float(0.5))), EvalValue::Float(1.5));
        assert_eq!(eval(&EvalNode::div(int(7), int(2))), EvalValue::Float(3.5));
        assert_eq!(eval(&EvalNode::div(int(1), int(0))), EvalValue::Error);
        assert_eq!(eval(&EvalNode::Modulus(Box::new(int(7)), Box::new(int(0)))), EvalValue::Error);
    }

    #[test]
    fn test_exponent_max_min_modulus() {
        assert_eq!(
            eval(&EvalNode::Exponent(Box::new(int(2)), Box::new(int(10)))),
            EvalValue::Int(1024)
        );
        assert_eq!(
            eval(&EvalNode::Exponent(Box::new(int(2)), Box::new(int(-1)))),
            EvalValue::Float(0.5)
        );
        assert_eq!(
            eval(&EvalNode::Max(Box::new(int(2)), Box::new(float(2.5)))),
            EvalValue::Float(2.5)
        );
        assert_eq!(eval(&EvalNode::Min(Box::new(int(2)), Box::new(int(-3)))), EvalValue::Int(-3));
        assert_eq!(eval(&EvalNode::Modulus(Box::new(int(7)), Box::new(int(3)))), EvalValue::Int(1));
    }

    #[test]
    fn test_overflow_is_error() {
        assert_eq!(eval(&EvalNode::mult(int(i64::MAX), int(2))), EvalValue::Error);
    }

    #[test]
    fn test_equals_epsilon_and_kinds() {
        assert_eq!(eval(&EvalNode::equals(int(1), float(1.000001))), EvalValue::Bool(true));
        assert_eq!(eval(&EvalNode::equals(int(1), float(1.1))), EvalValue::Bool(false));
        let wide = EvalNode::Equals {
            lhs: Box::new(int(1)),
            rhs: Box::new(float(1.1)),
            epsilon: 0.2,
        };
        assert_eq!(eval(&wide), EvalValue::Bool(true));
        let refs = EvalNode::equals(
            EvalNode::LoadProtoRef(PrototypeId(3)),
            EvalNode::LoadProtoRef(PrototypeId(3)),
        );
        assert_eq!(eval(&refs), EvalValue::Bool(true));
        let mixed = EvalNode::equals(EvalNode::LoadBool(true), int(1));
        assert_eq!(eval(&mixed), EvalValue::Error);
    }

    #[test]
    fn test_logic_short_circuit() {
        // Right side would be an error if evaluated
        let and = EvalNode::And(Box::new(EvalNode::LoadBool(false)), Box::new(int(1)));
        assert_eq!(eval(&and), EvalValue::Bool(false));
        let or = EvalNode::Or(Box::new(EvalNode::LoadBool(true)), Box::new(int(1)));
        assert_eq!(eval(&or), EvalValue::Bool(true));
        let or = EvalNode::Or(
            Box::new(EvalNode::LoadBool(false)),
            Box::new(EvalNode::LoadBool(true)),
        );
        assert_eq!(eval(&or), EvalValue::Bool(true));
        assert_eq!(
            eval(&EvalNode::Not(Box::new(EvalNode::LoadBool(true)))),
            EvalValue::Bool(false)
        );
        assert_eq!(eval(&EvalNode::Not(Box::new(int(1)))), EvalValue::Error);
    }

    #[test]
    fn test_typed_wrappers_default_on_error() {
        let mut ctx = EvalContext::new();
        let bad = EvalNode::div(int(1), int(0));
        assert_eq!(run_int(&bad, &mut ctx), 0);
        assert_eq!(run_float(&bad, &mut ctx), 0.0);
        assert!(!run_bool(&bad, &mut ctx));
        assert_eq!(run_proto_ref(&int(4), &mut ctx), PrototypeId::INVALID);
        assert_eq!(run_float(&EvalNode::add(int(1), int(1)), &mut ctx), 2.0);
    }

    #[test]
    fn test_for_loop_sums_in_local_frame() {
        // for (i = 0; i < 5; i = i + 1) { sum = sum + i } with sum in the caller frame
        let i = PropertyId::new(PropertyEnum(200));
        let sum = PropertyId::new(PropertyEnum(201));
        let node = EvalNode::Scope(vec![
            EvalNode::assign(ContextSlot::LocalStack, sum, int(0)),
            EvalNode::For {
                pre: Some(Box::new(EvalNode::assign(ContextSlot::LocalStack, i, int(0)))),
                condition: Box::new(EvalNode::less_than(
                    EvalNode::load_prop(ContextSlot::LocalStack, i),
                    int(5),
                )),
                post: Some(Box::new(EvalNode::assign(
                    ContextSlot::LocalStack,
                    i,
                    EvalNode::add(EvalNode::load_prop(ContextSlot::LocalStack, i), int(1)),
                ))),
                body: vec![EvalNode::assign(
                    ContextSlot::CallerStack,
                    sum,
                    EvalNode::add(
                        EvalNode::load_prop(ContextSlot::CallerStack, sum),
                        EvalNode::load_prop(ContextSlot::LocalStack, i),
                    ),
                )],
            },
            EvalNode::load_prop(ContextSlot::LocalStack, sum),
        ]);
        let mut ctx = EvalContext::new();
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Int(10));
        assert_eq!(ctx.frame_depth(), 1);
    }

    #[test]
    fn test_infinite_loop_is_bounded() {
        let node = EvalNode::For {
            pre: None,
            condition: Box::new(EvalNode::LoadBool(true)),
            post: None,
            body: vec![],
        };
        assert_eq!(eval(&node), EvalValue::Error);
    }

    #[test]
    fn test_foreach_proto_ref_with_break() {
        let count = PropertyId::new(PropertyEnum(210));
        let mut ctx = EvalContext::new();
        ctx.set_proto_ref_list(
            ContextSlot::Var1,
            vec![PrototypeId(1), PrototypeId(2), PrototypeId(3), PrototypeId(4)],
        );
        let loop_var = EvalNode::load_prop(
            ContextSlot::LocalStack,
            PropertyEnum::EVAL_LOOP_VAR_PROTO_REF,
        );
        let node = EvalNode::Scope(vec![
            EvalNode::assign(ContextSlot::LocalStack, count, int(0)),
            EvalNode::ForEachProtoRefInContextRefList {
                source: ContextSlot::Var1,
                pre: None,
                post: Some(Box::new(EvalNode::equals(
                    loop_var,
                    EvalNode::LoadProtoRef(PrototypeId(3)),
                ))),
                body: vec![EvalNode::assign(
                    ContextSlot::CallerStack,
                    count,
                    EvalNode::add(EvalNode::load_prop(ContextSlot::CallerStack, count), int(1)),
                )],
            },
            EvalNode::load_prop(ContextSlot::LocalStack, count),
        ]);
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Int(3));
    }

    #[test]
    fn test_foreach_condition_writes_back() {
        let stacks = PropertyId::new(PropertyEnum(220));
        let mut ctx = EvalContext::new();
        let mut first = ConditionData {
            id: 1,
            keywords: vec![PrototypeId(50)],
            properties: PropertyCollection::new(),
        };
        first.properties.set(stacks, PropertyValue::Integer(1));
        let second = ConditionData {
            id: 2,
            keywords: vec![],
            properties: PropertyCollection::new(),
        };
        ctx.set_conditions(ContextSlot::Var2, vec![first, second]);

        let node = EvalNode::ForEachConditionInContext {
            source: ContextSlot::Var2,
            pre: Some(Box::new(EvalNode::HasProp {
                slot: ContextSlot::Condition,
                prop: stacks,
            })),
            post: None,
            body: vec![EvalNode::assign(
                ContextSlot::Condition,
                stacks,
                EvalNode::mult(EvalNode::load_prop(ContextSlot::Condition, stacks), int(5)),
            )],
        };
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Undefined);
        match ctx.binding(ContextSlot::Var2) {
            Some(ContextBinding::Conditions(list)) => {
                assert_eq!(list[0].properties.get_int(stacks), 5);
                assert!(!list[1].properties.has(stacks));
            }
            _ => panic!("conditions not restored"),
        }
        assert!(matches!(ctx.binding(ContextSlot::Condition), Some(ContextBinding::Unbound)));
    }

    #[test]
    fn test_load_prop_missing_store_is_error() {
        let node = EvalNode::load_prop(ContextSlot::Entity, PropertyEnum::ITEM_LEVEL);
        assert_eq!(eval(&node), EvalValue::Error);
    }

    #[test]
    fn test_unknown_property_enum_with_registry() {
        let reg = ContentRegistry::new(ContentDatabase::default()).unwrap();
        let props = PropertyCollection::new();
        let mut ctx = EvalContext::new().with_registry(&reg);
        ctx.set_properties(ContextSlot::Default, &props);
        let known = EvalNode::load_prop(ContextSlot::Default, PropertyEnum::SHOW_NEXT_RANK);
        assert_eq!(evaluate(&known, &mut ctx), EvalValue::Bool(false));
        let unknown = EvalNode::load_prop(ContextSlot::Default, PropertyEnum(999));
        assert_eq!(evaluate(&unknown, &mut ctx), EvalValue::Error);
    }

    #[test]
    fn test_read_only_store_rejects_assign() {
        let props = PropertyCollection::new();
        let mut ctx = EvalContext::new();
        ctx.set_properties(ContextSlot::Default, &props);
        let node = EvalNode::assign(ContextSlot::Default, PropertyEnum::ITEM_LEVEL, int(1));
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Error);
        let globals = EvalNode::assign(ContextSlot::Globals, PropertyEnum::ITEM_LEVEL, int(1));
        assert_eq!(evaluate(&globals, &mut ctx), EvalValue::Error);
    }

    #[test]
    fn test_eval_params_and_swap() {
        let mut a = PropertyCollection::new();
        let mut b = PropertyCollection::new();
        let keyed = PropertyId::with_params(PropertyEnum(230), &[9]);
        a.set(keyed, PropertyValue::Integer(4));
        {
            let mut ctx = EvalContext::new();
            ctx.set_properties_mut(ContextSlot::Default, &mut a);
            ctx.set_properties_mut(ContextSlot::Other, &mut b);
            let load = EvalNode::LoadPropEvalParams {
                slot: ContextSlot::Default,
                prop: PropertyEnum(230),
                params: vec![EvalNode::add(int(4), int(5))],
            };
            assert_eq!(evaluate(&load, &mut ctx), EvalValue::Int(4));
            let swap = EvalNode::SwapProp {
                left: ContextSlot::Default,
                right: ContextSlot::Other,
                prop: keyed,
            };
            assert_eq!(evaluate(&swap, &mut ctx), EvalValue::Bool(true));
        }
        assert!(!a.has(keyed));
        assert_eq!(b.get_int(keyed), 4);
    }

    #[test]
    fn test_context_vars() {
        let mut ctx = EvalContext::new();
        ctx.set_int(ContextSlot::Var1, 12);
        ctx.set_proto_ref(ContextSlot::Var2, PrototypeId(8));
        assert_eq!(
            evaluate(&EvalNode::LoadContextInt(ContextSlot::Var1), &mut ctx),
            EvalValue::Int(12)
        );
        assert_eq!(
            evaluate(&EvalNode::LoadContextInt(ContextSlot::Var2), &mut ctx),
            EvalValue::Error
        );
        assert_eq!(
            evaluate(&EvalNode::LoadContextProtoRef(ContextSlot::Var2), &mut ctx),
            EvalValue::ProtoRef(PrototypeId(8))
        );
        assert_eq!(
            evaluate(&EvalNode::LoadContextProtoRef(ContextSlot::Var3), &mut ctx),
            EvalValue::ProtoRef(PrototypeId::INVALID)
        );
    }

    #[test]
    fn test_is_context_data_null() {
        let props = PropertyCollection::new();
        let mut ctx = EvalContext::new();
        ctx.set_properties(ContextSlot::Default, &props);
        assert_eq!(
            evaluate(&EvalNode::IsContextDataNull(ContextSlot::Default), &mut ctx),
            EvalValue::Bool(false)
        );
        assert_eq!(
            evaluate(&EvalNode::IsContextDataNull(ContextSlot::Var3), &mut ctx),
            EvalValue::Bool(true)
        );
        assert_eq!(
            evaluate(&EvalNode::IsContextDataNull(ContextSlot::Entity), &mut ctx),
            EvalValue::Error
        );
        assert_eq!(
            evaluate(&EvalNode::IsContextDataNull(ContextSlot::Globals), &mut ctx),
            EvalValue::Bool(true)
        );
    }

    #[test]
    fn test_load_curve_clamps_and_warns() {
        let mut db = ContentDatabase::default();
        db.curves = vec![Curve::new(CurveId(1), 1, vec![5.0, 10.0, 20.0])];
        let reg = ContentRegistry::new(db).unwrap();
        let mut ctx = EvalContext::new().with_registry(&reg);
        let node = EvalNode::LoadCurve {
            curve: CurveId(1),
            index: Box::new(int(2)),
        };
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Float(10.0));
        let below = EvalNode::LoadCurve {
            curve: CurveId(1),
            index: Box::new(int(-40)),
        };
        assert_eq!(evaluate(&below, &mut ctx), EvalValue::Float(5.0));
        let missing = EvalNode::LoadCurve {
            curve: CurveId(2),
            index: Box::new(int(1)),
        };
        assert_eq!(evaluate(&missing, &mut ctx), EvalValue::Error);
    }

    #[test]
    fn test_random_needs_rng_and_is_seeded() {
        let node = EvalNode::RandomInt { min: 1, max: 6 };
        assert_eq!(eval(&node), EvalValue::Error);

        let roll = |seed| {
            let mut rng = GRandom::new(seed);
            let mut ctx = EvalContext::new().with_rng(&mut rng);
            (0..20)
                .map(|_| run_int(&node, &mut ctx))
                .collect::<Vec<_>>()
        };
        let a = roll(11);
        assert_eq!(a, roll(11));
        assert!(a.iter().all(|v| (1..=6).contains(v)));

        let mut rng = GRandom::new(3);
        let mut ctx = EvalContext::new().with_rng(&mut rng);
        let f = run_float(&EvalNode::RandomFloat { min: 2.0, max: 3.0 }, &mut ctx);
        assert!((2.0..3.0).contains(&f));
    }

    struct TestHost;

    impl EvalHost for TestHost {
        fn entity_has_keyword(&self, entity: u64, keyword: PrototypeId) -> bool {
            entity == 1 && keyword == PrototypeId(70)
        }

        fn combat_level(&self, entity: u64) -> i64 {
            entity as i64 * 10
        }

        fn distance_to_entity(&self, source: u64, target: u64, _edge_to_edge: bool) -> Option<f32> {
            Some((target as f32 - source as f32).abs())
        }

        fn entity_conditions(&self, _entity: u64) -> Vec<ConditionData> {
            vec![ConditionData::default(), ConditionData::default()]
        }
    }

    #[test]
    fn test_domain_queries_through_host() {
        let host = TestHost;
        let mut ctx = EvalContext::new().with_host(&host);
        ctx.set_entity(ContextSlot::Entity, 1);
        ctx.set_entity(ContextSlot::Other, 4);
        let kw = EvalNode::EntityHasKeyword {
            slot: ContextSlot::Entity,
            keyword: PrototypeId(70),
        };
        assert_eq!(evaluate(&kw, &mut ctx), EvalValue::Bool(true));
        assert_eq!(
            evaluate(&EvalNode::GetCombatLevel(ContextSlot::Other), &mut ctx),
            EvalValue::Int(40)
        );
        let dist = EvalNode::GetDistanceToEntity {
            source: ContextSlot::Entity,
            target: ContextSlot::Other,
            edge_to_edge: false,
        };
        assert_eq!(evaluate(&dist, &mut ctx), EvalValue::Float(3.0));
        assert_eq!(
            evaluate(&EvalNode::GetCombatLevel(ContextSlot::Var1), &mut ctx),
            EvalValue::Error
        );
        assert_eq!(
            evaluate(&EvalNode::IsDynamicCombatLevelEnabled, &mut ctx),
            EvalValue::Bool(true)
        );

        let load = EvalNode::LoadConditionCollectionToContext {
            entity_slot: ContextSlot::Entity,
            slot: ContextSlot::Var4,
        };
        evaluate(&load, &mut ctx);
        assert!(matches!(
            ctx.binding(ContextSlot::Var4),
            Some(ContextBinding::Conditions(list)) if list.len() == 2
        ));
    }

    #[test]
    fn test_difficulty_tier_range_from_properties() {
        use crate::registry::DifficultyTierPrototype;
        let mut db = ContentDatabase::default();
        db.difficulty_tiers = vec![
            DifficultyTierPrototype { id: PrototypeId(1), name: String::new(), tier: 1 },
            DifficultyTierPrototype { id: PrototypeId(2), name: String::new(), tier: 2 },
        ];
        let reg = ContentRegistry::new(db).unwrap();
        let mut props = PropertyCollection::new();
        let node = EvalNode::DifficultyTierRange {
            slot: ContextSlot::Default,
            min: PrototypeId(2),
            max: PrototypeId::INVALID,
        };
        {
            let mut ctx = EvalContext::new().with_registry(&reg);
            ctx.set_properties(ContextSlot::Default, &props);
            // No tier set counts as in range
            assert_eq!(evaluate(&node, &mut ctx), EvalValue::Bool(true));
        }
        props.set(PropertyEnum::DIFFICULTY_TIER, PropertyValue::Prototype(PrototypeId(1)));
        let mut ctx = EvalContext::new().with_registry(&reg);
        ctx.set_properties(ContextSlot::Default, &props);
        assert_eq!(evaluate(&node, &mut ctx), EvalValue::Bool(false));
    }
}
