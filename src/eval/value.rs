//! Values produced by Eval nodes.

use serde::{Deserialize, Serialize};

use crate::properties::{PropertyDataType, PropertyId, PropertyValue};
use crate::registry::{AssetId, PrototypeId};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum EvalValue {
    /// Result of statements with no value (empty scope, finished loop)
    #[default]
    Undefined,
    /// A node failed; already logged where it happened
    Error,
    Bool(bool),
    Int(i64),
    Float(f32),
    ProtoRef(PrototypeId),
    AssetRef(AssetId),
    EntityId(u64),
    PropertyId(PropertyId),
}

impl EvalValue {
    pub fn is_error(&self) -> bool {
        matches!(self, EvalValue::Error)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, EvalValue::Int(_) | EvalValue::Float(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Undefined => "Undefined",
            EvalValue::Error => "Error",
            EvalValue::Bool(_) => "Bool",
            EvalValue::Int(_) => "Int",
            EvalValue::Float(_) => "Float",
            EvalValue::ProtoRef(_) => "ProtoRef",
            EvalValue::AssetRef(_) => "AssetRef",
            EvalValue::EntityId(_) => "EntityId",
            EvalValue::PropertyId(_) => "PropertyId",
        }
    }

    pub fn to_int(&self) -> Option<i64> {
        match self {
            EvalValue::Int(v) => Some(*v),
            EvalValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn to_float(&self) -> Option<f32> {
        match self {
            EvalValue::Int(v) => Some(*v as f32),
            EvalValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Numbers are true when positive; `Undefined` is false
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Bool(v) => Some(*v),
            EvalValue::Int(v) => Some(*v > 0),
            EvalValue::Float(v) => Some(*v > 0.0),
            EvalValue::Undefined => Some(false),
            _ => None,
        }
    }

    pub fn to_proto_ref(&self) -> Option<PrototypeId> {
        match self {
            EvalValue::ProtoRef(p) => Some(*p),
            _ => None,
        }
    }

    pub fn to_asset(&self) -> Option<AssetId> {
        match self {
            EvalValue::AssetRef(a) => Some(*a),
            _ => None,
        }
    }

    pub fn to_entity_id(&self) -> Option<u64> {
        match self {
            EvalValue::EntityId(e) => Some(*e),
            EvalValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Raw form used as a property parameter
    pub fn to_param(&self) -> Option<u64> {
        match self {
            EvalValue::Int(v) => Some(*v as u64),
            EvalValue::Bool(v) => Some(*v as u64),
            EvalValue::ProtoRef(p) => Some(p.0),
            EvalValue::AssetRef(a) => Some(a.0),
            EvalValue::EntityId(e) => Some(*e),
            _ => None,
        }
    }

    /// Convert for storage; `None` when the value cannot be stored as `data_type`
    pub fn to_property_value(&self, data_type: PropertyDataType) -> Option<PropertyValue> {
        let value = match data_type {
            PropertyDataType::Integer => PropertyValue::Integer(self.to_int()?),
            PropertyDataType::Real => PropertyValue::Real(self.to_float()?),
            PropertyDataType::Boolean => PropertyValue::Boolean(self.to_bool()?),
            PropertyDataType::EntityId => PropertyValue::EntityId(self.to_entity_id()?),
            PropertyDataType::Prototype => PropertyValue::Prototype(self.to_proto_ref()?),
            PropertyDataType::Asset => PropertyValue::Asset(self.to_asset()?),
            PropertyDataType::Curve => PropertyValue::Curve(crate::registry::CurveId(
                self.to_int()?.max(0) as u64,
            )),
            PropertyDataType::Time => PropertyValue::Time(self.to_int()?),
        };
        Some(value)
    }

    /// Storage type implied by the value itself
    pub fn natural_data_type(&self) -> Option<PropertyDataType> {
        match self {
            EvalValue::Bool(_) => Some(PropertyDataType::Boolean),
            EvalValue::Int(_) => Some(PropertyDataType::Integer),
            EvalValue::Float(_) => Some(PropertyDataType::Real),
            EvalValue::ProtoRef(_) => Some(PropertyDataType::Prototype),
            EvalValue::AssetRef(_) => Some(PropertyDataType::Asset),
            EvalValue::EntityId(_) => Some(PropertyDataType::EntityId),
            _ => None,
        }
    }
}

impl From<PropertyValue> for EvalValue {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Integer(v) | PropertyValue::Time(v) => EvalValue::Int(v),
            PropertyValue::Real(v) => EvalValue::Float(v),
            PropertyValue::Boolean(v) => EvalValue::Bool(v),
            PropertyValue::EntityId(v) => EvalValue::EntityId(v),
            PropertyValue::Prototype(p) => EvalValue::ProtoRef(p),
            PropertyValue::Asset(a) => EvalValue::AssetRef(a),
            PropertyValue::Curve(c) => EvalValue::Int(c.0 as i64),
        }
    }
}

impl std::fmt::Display for EvalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalValue::Bool(v) => write!(f, "{v}"),
            EvalValue::Int(v) => write!(f, "{v}"),
            EvalValue::Float(v) => write!(f, "{v}"),
            EvalValue::ProtoRef(p) => write!(f, "proto:{}", p.0),
            EvalValue::AssetRef(a) => write!(f, "asset:{}", a.0),
            EvalValue::EntityId(e) => write!(f, "entity:{e}"),
            EvalValue::PropertyId(p) => write!(f, "prop:{}", p.prop.0),
            other => f.write_str(other.type_name()),
        }
    }
}
