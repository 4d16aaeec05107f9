use std::collections::HashMap;
use std::sync::Arc;

use super::{PartOfState, StatePolicy, StateTransferError, StateValue, TransferContext, TypeTag};

/// Carries one described field from the source value into the target value.
///
/// `old` is the target's current value and is mutated in place. Handlers must leave
/// `old` untouched when they return an error. The returned flag asks the engine to
/// descend into the described fields of an object value.
pub trait StateTransferHandler: Send + Sync {
    fn transfer(
        &self,
        ctx: &TransferContext,
        descriptor: &PartOfState,
        old: &mut StateValue,
        new: &StateValue,
    ) -> Result<bool, StateTransferError>;
}

fn replace(old: &mut StateValue, new: &StateValue) -> Result<bool, StateTransferError> {
    *old = new.clone();
    Ok(false)
}

/// Plain replacement, used for scalars and as the fallback of the container handlers.
#[derive(Debug, Default)]
pub struct ScalarHandler;

impl StateTransferHandler for ScalarHandler {
    fn transfer(
        &self,
        _ctx: &TransferContext,
        _descriptor: &PartOfState,
        old: &mut StateValue,
        new: &StateValue,
    ) -> Result<bool, StateTransferError> {
        replace(old, new)
    }
}

#[derive(Debug, Default)]
pub struct ListHandler;

impl StateTransferHandler for ListHandler {
    fn transfer(
        &self,
        _ctx: &TransferContext,
        descriptor: &PartOfState,
        old: &mut StateValue,
        new: &StateValue,
    ) -> Result<bool, StateTransferError> {
        if let (StateValue::List(old_items), StateValue::List(new_items)) = (&mut *old, new) {
            match descriptor.policy {
                StatePolicy::ClearAndFill => {
                    old_items.clear();
                    old_items.extend(new_items.iter().cloned());
                    return Ok(false);
                }
                StatePolicy::Merge => {
                    old_items.extend(new_items.iter().cloned());
                    return Ok(false);
                }
                StatePolicy::MergeAndKeepOld => {
                    for item in new_items {
                        if !old_items.contains(item) {
                            old_items.push(item.clone());
                        }
                    }
                    return Ok(false);
                }
                StatePolicy::Replace => {}
            }
        }
        replace(old, new)
    }
}

#[derive(Debug, Default)]
pub struct MapHandler;

impl StateTransferHandler for MapHandler {
    fn transfer(
        &self,
        _ctx: &TransferContext,
        descriptor: &PartOfState,
        old: &mut StateValue,
        new: &StateValue,
    ) -> Result<bool, StateTransferError> {
        if let (StateValue::Map(old_entries), StateValue::Map(new_entries)) = (&mut *old, new) {
            match descriptor.policy {
                StatePolicy::ClearAndFill => {
                    old_entries.clear();
                    old_entries.extend(new_entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                    return Ok(false);
                }
                StatePolicy::Merge => {
                    old_entries.extend(new_entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                    return Ok(false);
                }
                StatePolicy::MergeAndKeepOld => {
                    for (key, value) in new_entries {
                        old_entries
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                    return Ok(false);
                }
                StatePolicy::Replace => {}
            }
        }
        replace(old, new)
    }
}

/// Default handler for nested objects: descends when asked to, replaces otherwise.
#[derive(Debug, Default)]
pub struct ObjectHandler;

impl StateTransferHandler for ObjectHandler {
    fn transfer(
        &self,
        _ctx: &TransferContext,
        descriptor: &PartOfState,
        old: &mut StateValue,
        new: &StateValue,
    ) -> Result<bool, StateTransferError> {
        if let (StateValue::Object(old_object), StateValue::Object(new_object)) = (&*old, new) {
            if descriptor.recurse && old_object.type_name() == new_object.type_name() {
                return Ok(true);
            }
        }
        replace(old, new)
    }
}

/// Handlers by type tag. Object types without a registration of their own use the
/// object handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeTag, Arc<dyn StateTransferHandler>>,
    objects: Arc<dyn StateTransferHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut handlers: HashMap<TypeTag, Arc<dyn StateTransferHandler>> = HashMap::new();
        handlers.insert(TypeTag::Scalar, Arc::new(ScalarHandler));
        handlers.insert(TypeTag::List, Arc::new(ListHandler));
        handlers.insert(TypeTag::Map, Arc::new(MapHandler));
        Self {
            handlers,
            objects: Arc::new(ObjectHandler),
        }
    }
}

impl HandlerRegistry {
    /// Add or override the handler for a tag. Returns the handler it displaced.
    pub fn register(
        &mut self,
        tag: TypeTag,
        handler: Arc<dyn StateTransferHandler>,
    ) -> Option<Arc<dyn StateTransferHandler>> {
        self.handlers.insert(tag, handler)
    }

    pub fn handler_for(&self, tag: &TypeTag) -> &dyn StateTransferHandler {
        match self.handlers.get(tag) {
            Some(handler) => handler.as_ref(),
            None => self.objects.as_ref(),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tags", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
