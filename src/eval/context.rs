//! Per-evaluation variable bindings.
//!
//! - Bindable slots hold property stores, entities, condition lists or plain values
//! - Local/caller frames form a scratch stack owned by the context
//! - Domain queries (keywords, levels, missions) go through `EvalHost`

use crate::properties::PropertyCollection;
use crate::registry::{PrototypeId, PrototypeRegistry};
use crate::rng::RandomSource;

use super::ast::ContextSlot;
use super::value::EvalValue;

/// Property store bound to a slot
#[derive(Debug)]
pub enum PropertyStore<'a> {
    ReadOnly(&'a PropertyCollection),
    Mutable(&'a mut PropertyCollection),
    Owned(PropertyCollection),
}

impl PropertyStore<'_> {
    pub fn get(&self) -> &PropertyCollection {
        match self {
            PropertyStore::ReadOnly(p) => p,
            PropertyStore::Mutable(p) => p,
            PropertyStore::Owned(p) => p,
        }
    }

    /// `None` for read-only stores
    pub fn get_mut(&mut self) -> Option<&mut PropertyCollection> {
        match self {
            PropertyStore::ReadOnly(_) => None,
            PropertyStore::Mutable(p) => Some(p),
            PropertyStore::Owned(p) => Some(p),
        }
    }
}

/// One active condition on an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionData {
    pub id: u64,
    pub keywords: Vec<PrototypeId>,
    pub properties: PropertyCollection,
}

#[derive(Debug, Default)]
pub enum ContextBinding<'a> {
    #[default]
    Unbound,
    Value(EvalValue),
    Properties(PropertyStore<'a>),
    Entity {
        id: u64,
        properties: Option<PropertyStore<'a>>,
    },
    Conditions(Vec<ConditionData>),
    ProtoRefList(Vec<PrototypeId>),
}

/// Game-state queries Eval cannot answer from properties alone
///
/// Every method has a neutral default so hosts implement only what their
/// formulas use.
pub trait EvalHost {
    fn entity_properties(&self, _entity: u64) -> Option<&PropertyCollection> {
        None
    }

    fn entity_conditions(&self, _entity: u64) -> Vec<ConditionData> {
        Vec::new()
    }

    fn entity_has_keyword(&self, _entity: u64, _keyword: PrototypeId) -> bool {
        false
    }

    fn entity_has_talent(&self, _entity: u64, _talent: PrototypeId) -> bool {
        false
    }

    fn combat_level(&self, _entity: u64) -> i64 {
        0
    }

    fn power_rank(&self, _entity: u64, _power: PrototypeId) -> i64 {
        0
    }

    /// Rank the power would have after recalculation
    fn calc_power_rank(&self, entity: u64, power: PrototypeId) -> i64 {
        self.power_rank(entity, power)
    }

    fn is_in_party(&self, _entity: u64) -> bool {
        false
    }

    fn damage_reduction_pct(&self, _entity: u64, _damage_type: i32, _vs_level: i64) -> f32 {
        0.0
    }

    fn distance_to_entity(&self, _source: u64, _target: u64, _edge_to_edge: bool) -> Option<f32> {
        None
    }

    /// `entity` is invalid to match any entity in the inventory
    fn has_entity_in_inventory(
        &self,
        _owner: u64,
        _entity: PrototypeId,
        _inventory: PrototypeId,
    ) -> bool {
        false
    }

    fn difficulty_tier(&self, _entity: u64) -> PrototypeId {
        PrototypeId::INVALID
    }

    fn mission_is_active(&self, _entity: u64, _mission: PrototypeId) -> bool {
        false
    }

    fn mission_is_complete(&self, _entity: u64, _mission: PrototypeId) -> bool {
        false
    }
}

pub struct EvalContext<'a> {
    vars: [ContextBinding<'a>; ContextSlot::VAR_COUNT],
    frames: Vec<PropertyCollection>,
    registry: Option<&'a dyn PrototypeRegistry>,
    host: Option<&'a dyn EvalHost>,
    rng: Option<&'a mut (dyn RandomSource + 'a)>,
}

impl Default for EvalContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self {
            vars: std::array::from_fn(|_| ContextBinding::Unbound),
            frames: vec![PropertyCollection::new()],
            registry: None,
            host: None,
            rng: None,
        }
    }

    pub fn with_registry(mut self, registry: &'a dyn PrototypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_host(mut self, host: &'a dyn EvalHost) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_rng(mut self, rng: &'a mut (dyn RandomSource + 'a)) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn registry(&self) -> Option<&'a dyn PrototypeRegistry> {
        self.registry
    }

    pub fn host(&self) -> Option<&'a dyn EvalHost> {
        self.host
    }

    pub fn rng(&mut self) -> Option<&mut (dyn RandomSource + 'a)> {
        self.rng.as_deref_mut()
    }

    // ============================================================
    // Binding
    // ============================================================

    /// Replace the binding of a bindable slot. Stack and global slots are ignored.
    pub fn bind(&mut self, slot: ContextSlot, binding: ContextBinding<'a>) -> ContextBinding<'a> {
        match slot.var_index() {
            Some(index) => std::mem::replace(&mut self.vars[index], binding),
            None => {
                tracing::warn!(?slot, "cannot bind a stack or global slot");
                ContextBinding::Unbound
            }
        }
    }

    pub fn set_properties(&mut self, slot: ContextSlot, props: &'a PropertyCollection) {
        self.bind(slot, ContextBinding::Properties(PropertyStore::ReadOnly(props)));
    }

    pub fn set_properties_mut(&mut self, slot: ContextSlot, props: &'a mut PropertyCollection) {
        self.bind(slot, ContextBinding::Properties(PropertyStore::Mutable(props)));
    }

    pub fn set_owned_properties(&mut self, slot: ContextSlot, props: PropertyCollection) {
        self.bind(slot, ContextBinding::Properties(PropertyStore::Owned(props)));
    }

    pub fn set_value(&mut self, slot: ContextSlot, value: EvalValue) {
        self.bind(slot, ContextBinding::Value(value));
    }

    pub fn set_int(&mut self, slot: ContextSlot, value: i64) {
        self.set_value(slot, EvalValue::Int(value));
    }

    pub fn set_proto_ref(&mut self, slot: ContextSlot, value: PrototypeId) {
        self.set_value(slot, EvalValue::ProtoRef(value));
    }

    /// Bind an entity; its properties come from the host when one is set
    pub fn set_entity(&mut self, slot: ContextSlot, entity: u64) {
        let properties = self
            .host
            .and_then(|host| host.entity_properties(entity))
            .map(PropertyStore::ReadOnly);
        self.bind(
            slot,
            ContextBinding::Entity {
                id: entity,
                properties,
            },
        );
    }

    pub fn set_conditions(&mut self, slot: ContextSlot, conditions: Vec<ConditionData>) {
        self.bind(slot, ContextBinding::Conditions(conditions));
    }

    pub fn set_proto_ref_list(&mut self, slot: ContextSlot, list: Vec<PrototypeId>) {
        self.bind(slot, ContextBinding::ProtoRefList(list));
    }

    pub fn unbind(&mut self, slot: ContextSlot) -> ContextBinding<'a> {
        self.bind(slot, ContextBinding::Unbound)
    }

    pub fn binding(&self, slot: ContextSlot) -> Option<&ContextBinding<'a>> {
        slot.var_index().map(|index| &self.vars[index])
    }

    /// Take an owned property store back out of a slot
    pub fn take_owned_properties(&mut self, slot: ContextSlot) -> Option<PropertyCollection> {
        let index = slot.var_index()?;
        match std::mem::take(&mut self.vars[index]) {
            ContextBinding::Properties(PropertyStore::Owned(props)) => Some(props),
            other => {
                self.vars[index] = other;
                None
            }
        }
    }

    // ============================================================
    // Lookups used by the interpreter
    // ============================================================

    /// Property store visible through `slot`
    pub fn properties(&self, slot: ContextSlot) -> Option<&PropertyCollection> {
        match slot {
            ContextSlot::LocalStack => self.frames.last(),
            ContextSlot::CallerStack => {
                self.frames.len().checked_sub(2).and_then(|i| self.frames.get(i))
            }
            ContextSlot::Globals => self.registry.map(|r| r.globals()),
            _ => match self.binding(slot)? {
                ContextBinding::Properties(store) => Some(store.get()),
                ContextBinding::Entity {
                    properties: Some(store),
                    ..
                } => Some(store.get()),
                _ => None,
            },
        }
    }

    /// Writable property store behind `slot`; globals and read-only bindings give `None`
    pub fn properties_mut(&mut self, slot: ContextSlot) -> Option<&mut PropertyCollection> {
        match slot {
            ContextSlot::LocalStack => self.frames.last_mut(),
            ContextSlot::CallerStack => {
                let index = self.frames.len().checked_sub(2)?;
                self.frames.get_mut(index)
            }
            ContextSlot::Globals => None,
            _ => {
                let index = slot.var_index()?;
                match &mut self.vars[index] {
                    ContextBinding::Properties(store) => store.get_mut(),
                    ContextBinding::Entity {
                        properties: Some(store),
                        ..
                    } => store.get_mut(),
                    _ => None,
                }
            }
        }
    }

    /// Entity id bound to `slot`, directly or as a value
    pub fn entity_id(&self, slot: ContextSlot) -> Option<u64> {
        match self.binding(slot)? {
            ContextBinding::Entity { id, .. } => Some(*id),
            ContextBinding::Value(value) => value.to_entity_id(),
            _ => None,
        }
    }

    pub fn value(&self, slot: ContextSlot) -> Option<EvalValue> {
        match self.binding(slot)? {
            ContextBinding::Value(value) => Some(*value),
            _ => None,
        }
    }

    // ============================================================
    // Frames
    // ============================================================

    pub(crate) fn push_frame(&mut self) {
        self.frames.push(PropertyCollection::new());
    }

    pub(crate) fn pop_frame(&mut self) {
        // The root frame stays for the lifetime of the context
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Swap a slot's binding out, returning it for later restore
    pub(crate) fn replace_binding(
        &mut self,
        slot: ContextSlot,
        binding: ContextBinding<'a>,
    ) -> ContextBinding<'a> {
        match slot.var_index() {
            Some(index) => std::mem::replace(&mut self.vars[index], binding),
            None => ContextBinding::Unbound,
        }
    }
}
