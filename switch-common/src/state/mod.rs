//! Policy driven transfer of state between two algorithm instances.
//!
//! State is an owned tree of [`StateValue`]s. Fields of a [`StateObject`] that carry a
//! [`PartOfState`] descriptor are carried from a source object into a target object by
//! the handler registered for the value's [`TypeTag`]. Failures are per field: the
//! failed field keeps its initial value and the remaining fields are still transferred.

mod handlers;
mod value;

use thiserror::Error;

pub use handlers::{
    HandlerRegistry, ListHandler, MapHandler, ObjectHandler, ScalarHandler, StateTransferHandler,
};
pub use value::{PartOfState, StateField, StateObject, StatePolicy, StateValue, TypeTag};

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateTransferError {
    #[error("field is missing from the source state")]
    MissingField,
    #[error("target holds {expected} but source holds {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("nesting exceeds the maximum state depth of {0}")]
    DepthExceeded(usize),
    #[error("handler failed: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    /// Dotted path of the field, e.g. `window.samples`.
    pub field: String,
    pub error: StateTransferError,
}

impl std::fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub transferred: Vec<String>,
    pub failures: Vec<FieldFailure>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Where in the tree a handler is being invoked.
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub path: String,
    pub depth: usize,
}

impl TransferContext {
    fn child(&self, name: &str) -> Self {
        let path = if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.path, name)
        };
        Self {
            path,
            depth: self.depth,
        }
    }

    fn descend(&self) -> Self {
        Self {
            path: self.path.clone(),
            depth: self.depth + 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateTransfer {
    registry: HandlerRegistry,
    max_depth: usize,
}

impl Default for StateTransfer {
    fn default() -> Self {
        Self::new(HandlerRegistry::default(), DEFAULT_MAX_DEPTH)
    }
}

impl StateTransfer {
    pub fn new(registry: HandlerRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// Carry the described fields of `source` into `target`.
    pub fn transfer(&self, target: &mut StateObject, source: &StateObject) -> TransferReport {
        let mut report = TransferReport::default();
        let root = TransferContext {
            path: String::new(),
            depth: 0,
        };
        self.transfer_object(&root, target, source, &mut report);

        tracing::debug!(
            type_name = target.type_name(),
            transferred = report.transferred.len(),
            failed = report.failures.len(),
            "state transfer finished"
        );
        report
    }

    fn transfer_object(
        &self,
        ctx: &TransferContext,
        target: &mut StateObject,
        source: &StateObject,
        report: &mut TransferReport,
    ) {
        for field in target.fields_mut() {
            let Some(descriptor) = field.descriptor else {
                continue;
            };
            let field_ctx = ctx.child(&field.name);

            if let Err(error) = self.transfer_field(
                &field_ctx,
                &descriptor,
                &mut field.value,
                source.get(&field.name),
                report,
            ) {
                report.failures.push(FieldFailure {
                    field: field_ctx.path,
                    error,
                });
            }
        }
    }

    fn transfer_field(
        &self,
        ctx: &TransferContext,
        descriptor: &PartOfState,
        old: &mut StateValue,
        new: Option<&StateValue>,
        report: &mut TransferReport,
    ) -> Result<(), StateTransferError> {
        if ctx.depth >= self.max_depth {
            return Err(StateTransferError::DepthExceeded(self.max_depth));
        }
        let new = new.ok_or(StateTransferError::MissingField)?;

        // Objects of different types may still replace each other.
        let both_objects = matches!((&*old, new), (StateValue::Object(_), StateValue::Object(_)));
        if !old.is_null() && !new.is_null() && old.tag() != new.tag() && !both_objects {
            return Err(StateTransferError::TypeMismatch {
                expected: old.kind(),
                found: new.kind(),
            });
        }

        let tag = if old.is_null() { new.tag() } else { old.tag() };
        let handler = self.registry.handler_for(&tag);
        let recurse = handler.transfer(ctx, descriptor, old, new)?;

        if recurse {
            if let (StateValue::Object(target), StateValue::Object(source)) = (old, new) {
                self.transfer_object(&ctx.descend(), target, source, report);
                return Ok(());
            }
        }

        report.transferred.push(ctx.path.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;

    fn ints(values: &[i64]) -> StateValue {
        StateValue::List(values.iter().copied().map(StateValue::Int).collect())
    }

    fn map(entries: &[(&str, i64)]) -> StateValue {
        StateValue::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), StateValue::Int(*v)))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn single(policy: StatePolicy, value: StateValue) -> StateObject {
        StateObject::new("Holder").with_field("value", PartOfState::new(policy), value)
    }

    fn transfer_single(policy: StatePolicy, old: StateValue, new: StateValue) -> StateValue {
        let mut target = single(policy, old);
        let source = single(policy, new);
        let report = StateTransfer::default().transfer(&mut target, &source);
        assert!(report.is_complete(), "{:?}", report.failures);
        target.get("value").cloned().unwrap()
    }

    #[test]
    fn test_list_policies() {
        assert_eq!(
            transfer_single(StatePolicy::Merge, ints(&[1, 2]), ints(&[2, 3])),
            ints(&[1, 2, 2, 3])
        );
        assert_eq!(
            transfer_single(StatePolicy::MergeAndKeepOld, ints(&[1, 2]), ints(&[2, 3])),
            ints(&[1, 2, 3])
        );
        assert_eq!(
            transfer_single(StatePolicy::ClearAndFill, ints(&[1, 2]), ints(&[2, 3])),
            ints(&[2, 3])
        );
        assert_eq!(
            transfer_single(StatePolicy::Replace, ints(&[1, 2]), ints(&[7])),
            ints(&[7])
        );
    }

    #[test]
    fn test_map_policies() {
        assert_eq!(
            transfer_single(StatePolicy::ClearAndFill, map(&[("a", 1)]), map(&[("b", 2)])),
            map(&[("b", 2)])
        );
        assert_eq!(
            transfer_single(
                StatePolicy::MergeAndKeepOld,
                map(&[("a", 1), ("b", 1)]),
                map(&[("b", 2), ("c", 3)])
            ),
            map(&[("a", 1), ("b", 1), ("c", 3)])
        );
        assert_eq!(
            transfer_single(
                StatePolicy::Merge,
                map(&[("a", 1), ("b", 1)]),
                map(&[("b", 2), ("c", 3)])
            ),
            map(&[("a", 1), ("b", 2), ("c", 3)])
        );
    }

    #[test]
    fn test_clear_and_fill_keeps_the_target_container() {
        let mut items = Vec::with_capacity(8);
        items.extend([StateValue::Int(1), StateValue::Int(2)]);
        let before = items.as_ptr();

        let mut target = single(StatePolicy::ClearAndFill, StateValue::List(items));
        let source = single(StatePolicy::ClearAndFill, ints(&[5, 6, 7]));
        let report = StateTransfer::default().transfer(&mut target, &source);
        assert!(report.is_complete());

        let after = target.get("value").and_then(StateValue::as_list).unwrap();
        assert_eq!(after.as_ptr(), before);
        assert_eq!(StateValue::List(after.clone()), ints(&[5, 6, 7]));
    }

    #[test]
    fn test_null_on_either_side_replaces() {
        assert_eq!(
            transfer_single(StatePolicy::Merge, StateValue::Null, ints(&[1])),
            ints(&[1])
        );
        assert_eq!(
            transfer_single(StatePolicy::Merge, ints(&[1]), StateValue::Null),
            StateValue::Null
        );
    }

    #[test]
    fn test_undescribed_fields_are_left_alone() {
        let mut target = StateObject::new("Algo")
            .with_plain_field("scratch", 1)
            .with_field("count", PartOfState::default(), 0);
        let source = StateObject::new("Algo")
            .with_plain_field("scratch", 99)
            .with_field("count", PartOfState::default(), 42);

        let report = StateTransfer::default().transfer(&mut target, &source);

        assert_eq!(report.transferred, vec!["count".to_owned()]);
        assert_eq!(target.get("scratch"), Some(&StateValue::Int(1)));
        assert_eq!(target.get("count"), Some(&StateValue::Int(42)));
    }

    #[test]
    fn test_recurses_into_nested_objects() {
        let window = |samples: &[i64], label: &str| {
            StateObject::new("Window")
                .with_field("samples", PartOfState::new(StatePolicy::Merge), ints(samples))
                .with_plain_field("label", label)
        };
        let mut target = StateObject::new("Algo").with_field(
            "window",
            PartOfState::recursive(StatePolicy::Replace),
            window(&[1], "incoming"),
        );
        let source = StateObject::new("Algo").with_field(
            "window",
            PartOfState::recursive(StatePolicy::Replace),
            window(&[2, 3], "outgoing"),
        );

        let report = StateTransfer::default().transfer(&mut target, &source);

        assert_eq!(report.transferred, vec!["window.samples".to_owned()]);
        let nested = target.get("window").and_then(StateValue::as_object).unwrap();
        assert_eq!(nested.get("samples"), Some(&ints(&[1, 2, 3])));
        assert_eq!(nested.get("label"), Some(&StateValue::from("incoming")));
    }

    #[test]
    fn test_nested_object_without_recurse_is_replaced() {
        let inner = |n: i64| {
            StateObject::new("Inner").with_field("n", PartOfState::default(), n)
        };
        let mut target = StateObject::new("Algo").with_field(
            "inner",
            PartOfState::default(),
            inner(1).with_plain_field("extra", 5),
        );
        let source = StateObject::new("Algo").with_field("inner", PartOfState::default(), inner(2));

        let report = StateTransfer::default().transfer(&mut target, &source);

        assert!(report.is_complete());
        assert_eq!(target.get("inner"), Some(&StateValue::Object(inner(2))));
    }

    #[test]
    fn test_partial_failure_keeps_initial_value() {
        let mut target = StateObject::new("Algo")
            .with_field("history", PartOfState::new(StatePolicy::Merge), ints(&[1]))
            .with_field("totals", PartOfState::new(StatePolicy::Merge), map(&[("a", 1)]))
            .with_field("count", PartOfState::default(), 0);
        let source = StateObject::new("Algo")
            .with_field("history", PartOfState::new(StatePolicy::Merge), map(&[("x", 1)]))
            .with_field("count", PartOfState::default(), 3);

        let report = StateTransfer::default().transfer(&mut target, &source);

        assert_eq!(report.transferred, vec!["count".to_owned()]);
        assert_eq!(
            report.failures,
            vec![
                FieldFailure {
                    field: "history".to_owned(),
                    error: StateTransferError::TypeMismatch {
                        expected: "list".to_owned(),
                        found: "map".to_owned()
                    },
                },
                FieldFailure {
                    field: "totals".to_owned(),
                    error: StateTransferError::MissingField,
                },
            ]
        );
        assert_eq!(target.get("history"), Some(&ints(&[1])));
        assert_eq!(target.get("totals"), Some(&map(&[("a", 1)])));
        assert_eq!(target.get("count"), Some(&StateValue::Int(3)));
    }

    #[test]
    fn test_depth_guard() {
        fn nest(levels: usize, leaf: i64) -> StateObject {
            let mut object = StateObject::new("Node").with_field("leaf", PartOfState::default(), leaf);
            for _ in 0..levels {
                object = StateObject::new("Node").with_field(
                    "child",
                    PartOfState::recursive(StatePolicy::Replace),
                    object,
                );
            }
            object
        }

        let engine = StateTransfer::new(HandlerRegistry::default(), 2);
        let mut target = nest(3, 1);
        let source = nest(3, 2);

        let report = engine.transfer(&mut target, &source);

        assert!(report.transferred.is_empty());
        assert_eq!(
            report.failures,
            vec![FieldFailure {
                field: "child.child.child".to_owned(),
                error: StateTransferError::DepthExceeded(2),
            }]
        );

        let mut shallow = nest(1, 1);
        let report = engine.transfer(&mut shallow, &nest(1, 2));
        assert_eq!(report.transferred, vec!["child.leaf".to_owned()]);
    }

    struct KeepLast(usize);

    impl StateTransferHandler for KeepLast {
        fn transfer(
            &self,
            ctx: &TransferContext,
            _descriptor: &PartOfState,
            old: &mut StateValue,
            new: &StateValue,
        ) -> Result<bool, StateTransferError> {
            let (Some(old_items), Some(new_items)) = (old.as_list_mut(), new.as_list()) else {
                return Err(StateTransferError::Handler(format!(
                    "{} is not a list",
                    ctx.path
                )));
            };
            old_items.extend(new_items.iter().cloned());
            let excess = old_items.len().saturating_sub(self.0);
            old_items.drain(..excess);
            Ok(false)
        }
    }

    #[test]
    fn test_registered_handler_overrides_default() {
        let mut registry = HandlerRegistry::default();
        assert!(registry
            .register(TypeTag::List, Arc::new(KeepLast(2)))
            .is_some());
        let engine = StateTransfer::new(registry, DEFAULT_MAX_DEPTH);

        let mut target = single(StatePolicy::Merge, ints(&[1, 2]));
        let report = engine.transfer(&mut target, &single(StatePolicy::Merge, ints(&[3])));

        assert!(report.is_complete());
        assert_eq!(target.get("value"), Some(&ints(&[2, 3])));
    }
}
