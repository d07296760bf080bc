//! Property collections: the key/value store Eval reads and writes.
//!
//! - Keys are a property enum plus up to four small parameters
//! - Ordered storage so `iterate_range` walks every key of one enum
//! - Missing values read back as the type's default

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_PROPERTY_PARAMS;
use crate::registry::{AssetId, CurveId, PrototypeId};

/// Property enum id. 0 is invalid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PropertyEnum(pub u32);

impl PropertyEnum {
    pub const INVALID: Self = Self(0);
    pub const DIFFICULTY_TIER: Self = Self(1);
    pub const EVAL_LOOP_VAR_PROTO_REF: Self = Self(2);
    pub const SHOW_NEXT_RANK: Self = Self(3);
    pub const ITEM_LEVEL: Self = Self(4);
    pub const ITEM_RARITY: Self = Self(5);
    pub const ITEM_SEED: Self = Self(6);
    pub const CHARACTER_LEVEL: Self = Self(7);
    /// First id available to content-defined properties
    pub const FIRST_CONTENT_ID: u32 = 100;

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Property enum plus parameters
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PropertyId {
    pub prop: PropertyEnum,
    #[serde(default)]
    pub params: [u64; MAX_PROPERTY_PARAMS],
}

impl PropertyId {
    pub fn new(prop: PropertyEnum) -> Self {
        Self {
            prop,
            params: [0; MAX_PROPERTY_PARAMS],
        }
    }

    /// Extra params beyond the fourth are ignored
    pub fn with_params(prop: PropertyEnum, params: &[u64]) -> Self {
        let mut id = Self::new(prop);
        for (slot, value) in id.params.iter_mut().zip(params) {
            *slot = *value;
        }
        id
    }

    pub fn is_valid(&self) -> bool {
        self.prop.is_valid()
    }
}

impl From<PropertyEnum> for PropertyId {
    fn from(prop: PropertyEnum) -> Self {
        Self::new(prop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDataType {
    Integer,
    Real,
    Boolean,
    EntityId,
    Prototype,
    Asset,
    Curve,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyParamType {
    #[default]
    Invalid,
    Integer,
    Asset,
    Prototype,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationMethod {
    #[default]
    None,
    Sum,
    Mul,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Integer(i64),
    Real(f32),
    Boolean(bool),
    EntityId(u64),
    Prototype(PrototypeId),
    Asset(AssetId),
    Curve(CurveId),
    Time(i64),
}

impl PropertyValue {
    pub fn default_for(data_type: PropertyDataType) -> Self {
        match data_type {
            PropertyDataType::Integer => PropertyValue::Integer(0),
            PropertyDataType::Real => PropertyValue::Real(0.0),
            PropertyDataType::Boolean => PropertyValue::Boolean(false),
            PropertyDataType::EntityId => PropertyValue::EntityId(0),
            PropertyDataType::Prototype => PropertyValue::Prototype(PrototypeId::INVALID),
            PropertyDataType::Asset => PropertyValue::Asset(AssetId::INVALID),
            PropertyDataType::Curve => PropertyValue::Curve(CurveId::INVALID),
            PropertyDataType::Time => PropertyValue::Time(0),
        }
    }

    pub fn data_type(&self) -> PropertyDataType {
        match self {
            PropertyValue::Integer(_) => PropertyDataType::Integer,
            PropertyValue::Real(_) => PropertyDataType::Real,
            PropertyValue::Boolean(_) => PropertyDataType::Boolean,
            PropertyValue::EntityId(_) => PropertyDataType::EntityId,
            PropertyValue::Prototype(_) => PropertyDataType::Prototype,
            PropertyValue::Asset(_) => PropertyDataType::Asset,
            PropertyValue::Curve(_) => PropertyDataType::Curve,
            PropertyValue::Time(_) => PropertyDataType::Time,
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            PropertyValue::Integer(v) | PropertyValue::Time(v) => *v,
            PropertyValue::Real(v) => *v as i64,
            PropertyValue::Boolean(v) => *v as i64,
            PropertyValue::EntityId(v) => *v as i64,
            PropertyValue::Prototype(p) => p.0 as i64,
            PropertyValue::Asset(a) => a.0 as i64,
            PropertyValue::Curve(c) => c.0 as i64,
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            PropertyValue::Real(v) => *v,
            other => other.as_int() as f32,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            PropertyValue::Boolean(v) => *v,
            PropertyValue::Real(v) => *v > 0.0,
            other => other.as_int() > 0,
        }
    }

    pub fn as_prototype(&self) -> PrototypeId {
        match self {
            PropertyValue::Prototype(p) => *p,
            _ => PrototypeId::INVALID,
        }
    }

    pub fn as_asset(&self) -> AssetId {
        match self {
            PropertyValue::Asset(a) => *a,
            _ => AssetId::INVALID,
        }
    }

    pub fn as_entity_id(&self) -> u64 {
        match self {
            PropertyValue::EntityId(e) => *e,
            _ => 0,
        }
    }
}

/// Static description of a property enum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub prop: PropertyEnum,
    pub name: String,
    pub data_type: PropertyDataType,
    #[serde(default)]
    pub param_count: usize,
    #[serde(default)]
    pub param_types: [PropertyParamType; MAX_PROPERTY_PARAMS],
    #[serde(default)]
    pub default_params: [u64; MAX_PROPERTY_PARAMS],
    #[serde(default)]
    pub agg_method: AggregationMethod,
}

impl PropertyInfo {
    pub fn new(prop: PropertyEnum, name: &str, data_type: PropertyDataType) -> Self {
        Self {
            prop,
            name: name.to_string(),
            data_type,
            param_count: 0,
            param_types: [PropertyParamType::Invalid; MAX_PROPERTY_PARAMS],
            default_params: [0; MAX_PROPERTY_PARAMS],
            agg_method: AggregationMethod::None,
        }
    }

    pub fn with_params(mut self, types: &[PropertyParamType]) -> Self {
        self.param_count = types.len().min(MAX_PROPERTY_PARAMS);
        for (slot, t) in self.param_types.iter_mut().zip(types) {
            *slot = *t;
        }
        self
    }

    pub fn with_aggregation(mut self, agg_method: AggregationMethod) -> Self {
        self.agg_method = agg_method;
        self
    }

    /// Property id populated with this property's default params
    pub fn default_id(&self) -> PropertyId {
        PropertyId {
            prop: self.prop,
            params: self.default_params,
        }
    }

    /// Infos for the properties the engine itself reads
    pub fn builtins() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::new(
                PropertyEnum::DIFFICULTY_TIER,
                "DifficultyTier",
                PropertyDataType::Prototype,
            ),
            PropertyInfo::new(
                PropertyEnum::EVAL_LOOP_VAR_PROTO_REF,
                "EvalLoopVarProtoRef",
                PropertyDataType::Prototype,
            )
            .with_params(&[PropertyParamType::Integer]),
            PropertyInfo::new(
                PropertyEnum::SHOW_NEXT_RANK,
                "ShowNextRank",
                PropertyDataType::Boolean,
            ),
            PropertyInfo::new(PropertyEnum::ITEM_LEVEL, "ItemLevel", PropertyDataType::Integer),
            PropertyInfo::new(
                PropertyEnum::ITEM_RARITY,
                "ItemRarity",
                PropertyDataType::Prototype,
            ),
            PropertyInfo::new(PropertyEnum::ITEM_SEED, "ItemSeed", PropertyDataType::Integer),
            PropertyInfo::new(
                PropertyEnum::CHARACTER_LEVEL,
                "CharacterLevel",
                PropertyDataType::Integer,
            )
            .with_aggregation(AggregationMethod::Max),
        ]
    }
}

// ============================================================
// Collection
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(PropertyId, PropertyValue)>",
    into = "Vec<(PropertyId, PropertyValue)>"
)]
pub struct PropertyCollection {
    values: BTreeMap<PropertyId, PropertyValue>,
}

impl From<Vec<(PropertyId, PropertyValue)>> for PropertyCollection {
    fn from(entries: Vec<(PropertyId, PropertyValue)>) -> Self {
        Self {
            values: entries.into_iter().collect(),
        }
    }
}

impl From<PropertyCollection> for Vec<(PropertyId, PropertyValue)> {
    fn from(collection: PropertyCollection) -> Self {
        collection.values.into_iter().collect()
    }
}

impl PropertyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: impl Into<PropertyId>) -> Option<PropertyValue> {
        self.values.get(&id.into()).copied()
    }

    pub fn set(&mut self, id: impl Into<PropertyId>, value: PropertyValue) {
        self.values.insert(id.into(), value);
    }

    pub fn has(&self, id: impl Into<PropertyId>) -> bool {
        self.values.contains_key(&id.into())
    }

    pub fn remove(&mut self, id: impl Into<PropertyId>) -> Option<PropertyValue> {
        self.values.remove(&id.into())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Every key/value of one property enum, ordered by params
    pub fn iterate_range(
        &self,
        prop: PropertyEnum,
    ) -> impl Iterator<Item = (&PropertyId, &PropertyValue)> {
        let start = PropertyId::with_params(prop, &[0; MAX_PROPERTY_PARAMS]);
        let end = PropertyId::with_params(prop, &[u64::MAX; MAX_PROPERTY_PARAMS]);
        self.values.range(start..=end)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyId, &PropertyValue)> {
        self.values.iter()
    }

    pub fn get_int(&self, id: impl Into<PropertyId>) -> i64 {
        self.get(id).map(|v| v.as_int()).unwrap_or(0)
    }

    pub fn get_float(&self, id: impl Into<PropertyId>) -> f32 {
        self.get(id).map(|v| v.as_float()).unwrap_or(0.0)
    }

    pub fn get_bool(&self, id: impl Into<PropertyId>) -> bool {
        self.get(id).map(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_prototype(&self, id: impl Into<PropertyId>) -> PrototypeId {
        self.get(id)
            .map(|v| v.as_prototype())
            .unwrap_or(PrototypeId::INVALID)
    }

    pub fn get_asset(&self, id: impl Into<PropertyId>) -> AssetId {
        self.get(id).map(|v| v.as_asset()).unwrap_or(AssetId::INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWER_RANK: PropertyEnum = PropertyEnum(120);

    #[test]
    fn test_get_set_has() {
        let mut props = PropertyCollection::new();
        assert!(!props.has(PropertyEnum::ITEM_LEVEL));
        props.set(PropertyEnum::ITEM_LEVEL, PropertyValue::Integer(12));
        assert!(props.has(PropertyEnum::ITEM_LEVEL));
        assert_eq!(props.get_int(PropertyEnum::ITEM_LEVEL), 12);
        assert_eq!(props.remove(PropertyEnum::ITEM_LEVEL), Some(PropertyValue::Integer(12)));
        assert!(props.is_empty());
    }

    #[test]
    fn test_missing_values_read_as_defaults() {
        let props = PropertyCollection::new();
        assert_eq!(props.get_int(PropertyEnum::ITEM_LEVEL), 0);
        assert_eq!(props.get_float(PropertyEnum::ITEM_LEVEL), 0.0);
        assert!(!props.get_bool(PropertyEnum::SHOW_NEXT_RANK));
        assert_eq!(
            props.get_prototype(PropertyEnum::DIFFICULTY_TIER),
            PrototypeId::INVALID
        );
    }

    #[test]
    fn test_params_distinguish_keys() {
        let mut props = PropertyCollection::new();
        let a = PropertyId::with_params(POWER_RANK, &[10]);
        let b = PropertyId::with_params(POWER_RANK, &[11]);
        props.set(a, PropertyValue::Integer(1));
        props.set(b, PropertyValue::Integer(2));
        assert_eq!(props.get_int(a), 1);
        assert_eq!(props.get_int(b), 2);
        assert!(!props.has(POWER_RANK));
    }

    #[test]
    fn test_iterate_range_only_one_enum() {
        let mut props = PropertyCollection::new();
        props.set(PropertyId::with_params(POWER_RANK, &[3]), PropertyValue::Integer(3));
        props.set(PropertyId::with_params(POWER_RANK, &[1]), PropertyValue::Integer(1));
        props.set(PropertyEnum(121), PropertyValue::Integer(99));
        props.set(PropertyEnum(119), PropertyValue::Integer(98));
        let values: Vec<i64> = props.iterate_range(POWER_RANK).map(|(_, v)| v.as_int()).collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(PropertyValue::Real(2.9).as_int(), 2);
        assert!(PropertyValue::Integer(1).as_bool());
        assert!(!PropertyValue::Real(0.0).as_bool());
        assert_eq!(PropertyValue::Boolean(true).as_float(), 1.0);
        assert_eq!(PropertyValue::Integer(4).as_prototype(), PrototypeId::INVALID);
    }

    #[test]
    fn test_with_params_truncates_extra() {
        let id = PropertyId::with_params(POWER_RANK, &[1, 2, 3, 4, 5]);
        assert_eq!(id.params, [1, 2, 3, 4]);
    }

    #[test]
    fn test_collection_serde_roundtrip() {
        let mut props = PropertyCollection::new();
        props.set(PropertyEnum::ITEM_LEVEL, PropertyValue::Integer(30));
        props.set(PropertyEnum::SHOW_NEXT_RANK, PropertyValue::Boolean(true));
        let json = serde_json::to_string(&props).unwrap();
        let restored: PropertyCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, props);
    }

    #[test]
    fn test_builtins_unique_ids() {
        let infos = PropertyInfo::builtins();
        let mut ids: Vec<u32> = infos.iter().map(|i| i.prop.0).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), infos.len());
        assert!(ids.iter().all(|id| *id < PropertyEnum::FIRST_CONTENT_ID));
    }
}
