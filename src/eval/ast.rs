//! Eval formula tree.
//!
//! One tagged enum for every operator; the interpreter matches on it
//! exhaustively. Trees are plain owned data, so they are acyclic by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_EVAL_EPSILON;
use crate::properties::{PropertyEnum, PropertyId};
use crate::registry::{AssetId, CurveId, PrototypeId};

/// Named variable slots bound by the caller before evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextSlot {
    Default,
    Entity,
    EntityBehaviorBlackboard,
    Other,
    Condition,
    ConditionKeywords,
    TeamUp,
    Var1,
    Var2,
    Var3,
    Var4,
    Var5,
    /// Property frame of the innermost scope
    LocalStack,
    /// Property frame of the scope enclosing the innermost one
    CallerStack,
    /// Registry-provided globals, read-only
    Globals,
}

impl ContextSlot {
    /// Number of caller-bindable slots
    pub const VAR_COUNT: usize = 12;

    /// Index into the bindable slot array, `None` for stack and global slots
    pub fn var_index(self) -> Option<usize> {
        let index = self as usize;
        (index < Self::VAR_COUNT).then_some(index)
    }

    /// `Var1`..`Var5`: reading them unbound is legitimate
    pub fn is_user_var(self) -> bool {
        matches!(
            self,
            ContextSlot::Var1
                | ContextSlot::Var2
                | ContextSlot::Var3
                | ContextSlot::Var4
                | ContextSlot::Var5
        )
    }
}

fn default_epsilon() -> f32 {
    DEFAULT_EVAL_EPSILON
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalNode {
    // Literals
    LoadBool(bool),
    LoadInt(i64),
    LoadFloat(f32),
    LoadCurve {
        curve: CurveId,
        index: Box<EvalNode>,
    },
    LoadAssetRef(AssetId),
    LoadProtoRef(PrototypeId),

    // Context
    LoadContextInt(ContextSlot),
    LoadContextProtoRef(ContextSlot),
    LoadProp {
        slot: ContextSlot,
        prop: PropertyId,
    },
    /// Param 0 taken from the value bound in `param_slot`
    LoadPropContextParams {
        slot: ContextSlot,
        prop: PropertyEnum,
        param_slot: ContextSlot,
    },
    LoadPropEvalParams {
        slot: ContextSlot,
        prop: PropertyEnum,
        params: Vec<EvalNode>,
    },
    AssignProp {
        slot: ContextSlot,
        prop: PropertyId,
        value: Box<EvalNode>,
    },
    AssignPropEvalParams {
        slot: ContextSlot,
        prop: PropertyEnum,
        params: Vec<EvalNode>,
        value: Box<EvalNode>,
    },
    HasProp {
        slot: ContextSlot,
        prop: PropertyId,
    },
    SwapProp {
        left: ContextSlot,
        right: ContextSlot,
        prop: PropertyId,
    },
    /// Bind the entity whose id `entity` evaluates to into `slot`
    LoadEntityToContextVar {
        entity: Box<EvalNode>,
        slot: ContextSlot,
    },
    /// Bind the conditions of the entity in `entity_slot` into `slot`
    LoadConditionCollectionToContext {
        entity_slot: ContextSlot,
        slot: ContextSlot,
    },
    IsContextDataNull(ContextSlot),

    // Arithmetic
    Add(Box<EvalNode>, Box<EvalNode>),
    Sub(Box<EvalNode>, Box<EvalNode>),
    Mult(Box<EvalNode>, Box<EvalNode>),
    Div(Box<EvalNode>, Box<EvalNode>),
    Exponent(Box<EvalNode>, Box<EvalNode>),
    Modulus(Box<EvalNode>, Box<EvalNode>),
    Max(Box<EvalNode>, Box<EvalNode>),
    Min(Box<EvalNode>, Box<EvalNode>),

    // Comparison
    GreaterThan(Box<EvalNode>, Box<EvalNode>),
    LessThan(Box<EvalNode>, Box<EvalNode>),
    Equals {
        lhs: Box<EvalNode>,
        rhs: Box<EvalNode>,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },

    // Logic
    And(Box<EvalNode>, Box<EvalNode>),
    Or(Box<EvalNode>, Box<EvalNode>),
    Not(Box<EvalNode>),

    // Control
    IfElse {
        condition: Box<EvalNode>,
        then: Box<EvalNode>,
        #[serde(default)]
        otherwise: Option<Box<EvalNode>>,
    },
    Scope(Vec<EvalNode>),
    For {
        #[serde(default)]
        pre: Option<Box<EvalNode>>,
        condition: Box<EvalNode>,
        #[serde(default)]
        post: Option<Box<EvalNode>>,
        body: Vec<EvalNode>,
    },
    /// Each condition in `source` is bound to `Condition` (and its keywords
    /// to `ConditionKeywords`) while `body` runs
    ForEachConditionInContext {
        source: ContextSlot,
        #[serde(default)]
        pre: Option<Box<EvalNode>>,
        #[serde(default)]
        post: Option<Box<EvalNode>>,
        body: Vec<EvalNode>,
    },
    /// Each id in `source` is written to the local `EvalLoopVarProtoRef`
    ForEachProtoRefInContextRefList {
        source: ContextSlot,
        #[serde(default)]
        pre: Option<Box<EvalNode>>,
        #[serde(default)]
        post: Option<Box<EvalNode>>,
        body: Vec<EvalNode>,
    },

    // Random
    RandomFloat {
        min: f32,
        max: f32,
    },
    RandomInt {
        min: i32,
        max: i32,
    },

    // Domain queries
    EntityHasKeyword {
        slot: ContextSlot,
        keyword: PrototypeId,
    },
    EntityHasTalent {
        slot: ContextSlot,
        talent: PrototypeId,
    },
    GetCombatLevel(ContextSlot),
    GetPowerRank {
        slot: ContextSlot,
        power: PrototypeId,
    },
    CalcPowerRank {
        slot: ContextSlot,
        power: PrototypeId,
    },
    IsInParty(ContextSlot),
    GetDamageReductionPct {
        slot: ContextSlot,
        damage_type: i32,
        #[serde(default)]
        vs_level: Option<Box<EvalNode>>,
    },
    GetDistanceToEntity {
        source: ContextSlot,
        target: ContextSlot,
        #[serde(default)]
        edge_to_edge: bool,
    },
    HasEntityInInventory {
        slot: ContextSlot,
        #[serde(default)]
        entity: PrototypeId,
        inventory: PrototypeId,
    },
    DifficultyTierRange {
        slot: ContextSlot,
        #[serde(default)]
        min: PrototypeId,
        #[serde(default)]
        max: PrototypeId,
    },
    MissionIsActive {
        slot: ContextSlot,
        mission: PrototypeId,
    },
    MissionIsComplete {
        slot: ContextSlot,
        mission: PrototypeId,
    },
    IsDynamicCombatLevelEnabled,
    ExportError,
}

impl EvalNode {
    pub fn add(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::Add(Box::new(a), Box::new(b))
    }

    pub fn sub(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::Sub(Box::new(a), Box::new(b))
    }

    pub fn mult(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::Mult(Box::new(a), Box::new(b))
    }

    pub fn div(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::Div(Box::new(a), Box::new(b))
    }

    pub fn greater_than(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::GreaterThan(Box::new(a), Box::new(b))
    }

    pub fn less_than(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::LessThan(Box::new(a), Box::new(b))
    }

    pub fn equals(a: EvalNode, b: EvalNode) -> Self {
        EvalNode::Equals {
            lhs: Box::new(a),
            rhs: Box::new(b),
            epsilon: DEFAULT_EVAL_EPSILON,
        }
    }

    pub fn if_else(condition: EvalNode, then: EvalNode, otherwise: EvalNode) -> Self {
        EvalNode::IfElse {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        }
    }

    pub fn assign(slot: ContextSlot, prop: impl Into<PropertyId>, value: EvalNode) -> Self {
        EvalNode::AssignProp {
            slot,
            prop: prop.into(),
            value: Box::new(value),
        }
    }

    pub fn load_prop(slot: ContextSlot, prop: impl Into<PropertyId>) -> Self {
        EvalNode::LoadProp {
            slot,
            prop: prop.into(),
        }
    }

    /// Operator name used in warnings
    pub fn op_name(&self) -> &'static str {
        match self {
            EvalNode::LoadBool(_) => "LoadBool",
            EvalNode::LoadInt(_) => "LoadInt",
            EvalNode::LoadFloat(_) => "LoadFloat",
            EvalNode::LoadCurve { .. } => "LoadCurve",
            EvalNode::LoadAssetRef(_) => "LoadAssetRef",
            EvalNode::LoadProtoRef(_) => "LoadProtoRef",
            EvalNode::LoadContextInt(_) => "LoadContextInt",
            EvalNode::LoadContextProtoRef(_) => "LoadContextProtoRef",
            EvalNode::LoadProp { .. } => "LoadProp",
            EvalNode::LoadPropContextParams { .. } => "LoadPropContextParams",
            EvalNode::LoadPropEvalParams { .. } => "LoadPropEvalParams",
            EvalNode::AssignProp { .. } => "AssignProp",
            EvalNode::AssignPropEvalParams { .. } => "AssignPropEvalParams",
            EvalNode::HasProp { .. } => "HasProp",
            EvalNode::SwapProp { .. } => "SwapProp",
            EvalNode::LoadEntityToContextVar { .. } => "LoadEntityToContextVar",
            EvalNode::LoadConditionCollectionToContext { .. } => "LoadConditionCollectionToContext",
            EvalNode::IsContextDataNull(_) => "IsContextDataNull",
            EvalNode::Add(..) => "Add",
            EvalNode::Sub(..) => "Sub",
            EvalNode::Mult(..) => "Mult",
            EvalNode::Div(..) => "Div",
            EvalNode::Exponent(..) => "Exponent",
            EvalNode::Modulus(..) => "Modulus",
            EvalNode::Max(..) => "Max",
            EvalNode::Min(..) => "Min",
            EvalNode::GreaterThan(..) => "GreaterThan",
            EvalNode::LessThan(..) => "LessThan",
            EvalNode::Equals { .. } => "Equals",
            EvalNode::And(..) => "And",
            EvalNode::Or(..) => "Or",
            EvalNode::Not(_) => "Not",
            EvalNode::IfElse { .. } => "IfElse",
            EvalNode::Scope(_) => "Scope",
            EvalNode::For { .. } => "For",
            EvalNode::ForEachConditionInContext { .. } => "ForEachConditionInContext",
            EvalNode::ForEachProtoRefInContextRefList { .. } => "ForEachProtoRefInContextRefList",
            EvalNode::RandomFloat { .. } => "RandomFloat",
            EvalNode::RandomInt { .. } => "RandomInt",
            EvalNode::EntityHasKeyword { .. } => "EntityHasKeyword",
            EvalNode::EntityHasTalent { .. } => "EntityHasTalent",
            EvalNode::GetCombatLevel(_) => "GetCombatLevel",
            EvalNode::GetPowerRank { .. } => "GetPowerRank",
            EvalNode::CalcPowerRank { .. } => "CalcPowerRank",
            EvalNode::IsInParty(_) => "IsInParty",
            EvalNode::GetDamageReductionPct { .. } => "GetDamageReductionPct",
            EvalNode::GetDistanceToEntity { .. } => "GetDistanceToEntity",
            EvalNode::HasEntityInInventory { .. } => "HasEntityInInventory",
            EvalNode::DifficultyTierRange { .. } => "DifficultyTierRange",
            EvalNode::MissionIsActive { .. } => "MissionIsActive",
            EvalNode::MissionIsComplete { .. } => "MissionIsComplete",
            EvalNode::IsDynamicCombatLevelEnabled => "IsDynamicCombatLevelEnabled",
            EvalNode::ExportError => "ExportError",
        }
    }
}

fn write_scope(f: &mut fmt::Formatter<'_>, body: &[EvalNode]) -> fmt::Result {
    f.write_str("{ ")?;
    for (i, node) in body.iter().enumerate() {
        if i > 0 {
            f.write_str("; ")?;
        }
        write!(f, "{node}")?;
    }
    f.write_str(" }")
}

/// Human-readable expression, as shown in warnings
impl fmt::Display for EvalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalNode::LoadBool(v) => write!(f, "{v}"),
            EvalNode::LoadInt(v) => write!(f, "{v}"),
            EvalNode::LoadFloat(v) => write!(f, "{v}"),
            EvalNode::LoadCurve { curve, index } => write!(f, "curve{}[{index}]", curve.0),
            EvalNode::LoadAssetRef(a) => write!(f, "asset:{}", a.0),
            EvalNode::LoadProtoRef(p) => write!(f, "proto:{}", p.0),
            EvalNode::LoadContextInt(slot) | EvalNode::LoadContextProtoRef(slot) => {
                write!(f, "{slot:?}")
            }
            EvalNode::LoadProp { slot, prop } | EvalNode::HasProp { slot, prop } => {
                write!(f, "{slot:?}.prop{}", prop.prop.0)
            }
            EvalNode::LoadPropContextParams {
                slot,
                prop,
                param_slot,
            } => write!(f, "{slot:?}.prop{}[{param_slot:?}]", prop.0),
            EvalNode::LoadPropEvalParams { slot, prop, .. } => {
                write!(f, "{slot:?}.prop{}[..]", prop.0)
            }
            EvalNode::AssignProp { slot, prop, value } => {
                write!(f, "{slot:?}.prop{} = {value}", prop.prop.0)
            }
            EvalNode::AssignPropEvalParams {
                slot, prop, value, ..
            } => write!(f, "{slot:?}.prop{}[..] = {value}", prop.0),
            EvalNode::SwapProp { left, right, prop } => {
                write!(f, "swap({left:?}, {right:?}, prop{})", prop.prop.0)
            }
            EvalNode::Add(a, b) => write!(f, "({a} + {b})"),
            EvalNode::Sub(a, b) => write!(f, "({a} - {b})"),
            EvalNode::Mult(a, b) => write!(f, "({a} * {b})"),
            EvalNode::Div(a, b) => write!(f, "({a} / {b})"),
            EvalNode::Exponent(a, b) => write!(f, "({a} ^ {b})"),
            EvalNode::Modulus(a, b) => write!(f, "({a} % {b})"),
            EvalNode::Max(a, b) => write!(f, "max({a}, {b})"),
            EvalNode::Min(a, b) => write!(f, "min({a}, {b})"),
            EvalNode::GreaterThan(a, b) => write!(f, "({a} > {b})"),
            EvalNode::LessThan(a, b) => write!(f, "({a} < {b})"),
            EvalNode::Equals { lhs, rhs, .. } => write!(f, "({lhs} == {rhs})"),
            EvalNode::And(a, b) => write!(f, "({a} && {b})"),
            EvalNode::Or(a, b) => write!(f, "({a} || {b})"),
            EvalNode::Not(a) => write!(f, "!{a}"),
            EvalNode::IfElse {
                condition,
                then,
                otherwise,
            } => match otherwise {
                Some(otherwise) => write!(f, "if {condition} then {then} else {otherwise}"),
                None => write!(f, "if {condition} then {then}"),
            },
            EvalNode::Scope(body) => write_scope(f, body),
            EvalNode::For { condition, body, .. } => {
                write!(f, "for ({condition}) ")?;
                write_scope(f, body)
            }
            EvalNode::ForEachConditionInContext { source, body, .. }
            | EvalNode::ForEachProtoRefInContextRefList { source, body, .. } => {
                write!(f, "foreach {source:?} ")?;
                write_scope(f, body)
            }
            EvalNode::RandomFloat { min, max } => write!(f, "randf({min}, {max})"),
            EvalNode::RandomInt { min, max } => write!(f, "randi({min}, {max})"),
            other => f.write_str(other.op_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_index() {
        assert_eq!(ContextSlot::Default.var_index(), Some(0));
        assert_eq!(ContextSlot::Var5.var_index(), Some(11));
        assert_eq!(ContextSlot::LocalStack.var_index(), None);
        assert_eq!(ContextSlot::Globals.var_index(), None);
        assert!(ContextSlot::Var2.is_user_var());
        assert!(!ContextSlot::Entity.is_user_var());
    }

    #[test]
    fn test_expression_string() {
        let node = EvalNode::if_else(
            EvalNode::greater_than(EvalNode::LoadInt(3), EvalNode::LoadInt(2)),
            EvalNode::LoadInt(1),
            EvalNode::LoadInt(0),
        );
        assert_eq!(node.to_string(), "if (3 > 2) then 1 else 0");
        assert_eq!(
            EvalNode::add(EvalNode::LoadInt(2), EvalNode::LoadFloat(0.5)).to_string(),
            "(2 + 0.5)"
        );
    }

    #[test]
    fn test_ron_round_trip() {
        let node = EvalNode::assign(
            ContextSlot::Default,
            PropertyEnum::ITEM_LEVEL,
            EvalNode::mult(EvalNode::LoadInt(7), EvalNode::LoadInt(2)),
        );
        let text = ron::to_string(&node).unwrap();
        let back: EvalNode = ron::from_str(&text).unwrap();
        assert_eq!(node, back);
    }

    #[test]
    fn test_equals_default_epsilon() {
        let node: EvalNode = ron::from_str("Equals(lhs: LoadInt(1), rhs: LoadFloat(1.0))").unwrap();
        match node {
            EvalNode::Equals { epsilon, .. } => assert_eq!(epsilon, DEFAULT_EVAL_EPSILON),
            _ => panic!("expected Equals"),
        }
    }
}
