use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a described field is carried from the source state into the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatePolicy {
    /// The source value wins outright.
    #[default]
    Replace,
    /// Empty the target container, then fill it with the source contents.
    ClearAndFill,
    /// Append or insert the source contents into the target container, duplicates allowed.
    Merge,
    /// Add only the source contents the target does not already hold.
    MergeAndKeepOld,
}

/// Declares a field as part of the transferable state of an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartOfState {
    pub policy: StatePolicy,
    /// Descend into the described fields of a nested object instead of replacing it.
    pub recurse: bool,
}

impl PartOfState {
    pub fn new(policy: StatePolicy) -> Self {
        Self {
            policy,
            recurse: false,
        }
    }

    pub fn recursive(policy: StatePolicy) -> Self {
        Self {
            policy,
            recurse: true,
        }
    }
}

/// Handler lookup key derived from a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Scalar,
    List,
    Map,
    Object(String),
}

/// A node of an algorithm's state tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
    Object(StateObject),
}

impl StateValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn tag(&self) -> TypeTag {
        match self {
            StateValue::List(_) => TypeTag::List,
            StateValue::Map(_) => TypeTag::Map,
            StateValue::Object(object) => TypeTag::Object(object.type_name.clone()),
            _ => TypeTag::Scalar,
        }
    }

    /// Human readable kind, used in error messages.
    pub fn kind(&self) -> String {
        match self {
            StateValue::Null => "null".to_owned(),
            StateValue::Bool(_) | StateValue::Int(_) | StateValue::Float(_) | StateValue::Str(_) => {
                "scalar".to_owned()
            }
            StateValue::List(_) => "list".to_owned(),
            StateValue::Map(_) => "map".to_owned(),
            StateValue::Object(object) => format!("object {}", object.type_name),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<StateValue>> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<StateValue>> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&StateObject> {
        match self {
            StateValue::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(i64::from(value))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Str(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Str(value.to_owned())
    }
}

impl From<StateObject> for StateValue {
    fn from(object: StateObject) -> Self {
        StateValue::Object(object)
    }
}

impl<V: Into<StateValue>> From<Vec<V>> for StateValue {
    fn from(items: Vec<V>) -> Self {
        StateValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// A named field of a `StateObject`. Only fields with a descriptor take part in transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    pub descriptor: Option<PartOfState>,
    pub value: StateValue,
}

/// A composite state value with ordered, named fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateObject {
    type_name: String,
    fields: Vec<StateField>,
}

impl StateObject {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            fields: Vec::new(),
        }
    }

    /// Add a field that takes part in state transfer.
    pub fn with_field(
        mut self,
        name: &str,
        descriptor: PartOfState,
        value: impl Into<StateValue>,
    ) -> Self {
        self.push(name, Some(descriptor), value.into());
        self
    }

    /// Add a field that is private to the instance and never transferred.
    pub fn with_plain_field(mut self, name: &str, value: impl Into<StateValue>) -> Self {
        self.push(name, None, value.into());
        self
    }

    fn push(&mut self, name: &str, descriptor: Option<PartOfState>, value: StateValue) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.descriptor = descriptor;
                field.value = value;
            }
            None => self.fields.push(StateField {
                name: name.to_owned(),
                descriptor,
                value,
            }),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut StateField> {
        self.fields.iter_mut()
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut StateValue> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| &mut f.value)
    }

    /// Overwrite the value of an existing field. Returns false if there is no such field.
    pub fn set(&mut self, name: &str, value: impl Into<StateValue>) -> bool {
        match self.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }
}
