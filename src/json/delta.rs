//! Structural deltas between JSON values.
//!
//! [`delta`] computes a compact patch that transforms one value into
//! another; [`apply`] replays it. Patches travel on the wire under an
//! `"update"` field, full values under `"data"`.
//!
//! A patch is a JSON array of operations, applied left to right. Each
//! operation is itself an array whose first element is the opcode:
//!
//! | Op | Shape | Meaning |
//! |----|-------|---------|
//! | 1 | `[1, index, value]` | array: replace the element at `index` |
//! | 2 | `[2, from, to]` | array: delete the range `[from, to)` |
//! | 3 | `[3, index, value]` | array: insert `value` before `index` |
//! | 4 | `[4, index, patch]` | array: patch the element at `index` |
//! | 5 | `[5, key, value]` | object: insert or replace `key` |
//! | 6 | `[6, key]` | object: remove `key` |
//! | 7 | `[7, key, patch]` | object: patch the value at `key` |
//!
//! Array indices refer to the array as it stands when the operation
//! executes. Scalars and values of different kinds have no useful
//! structural sharing; for those [`delta`] reports `None` and the caller
//! ships the full value instead.

use crate::error::{CometError, Result};
use crate::json::value::{Array, Object, Value};

const OP_REPLACE: i64 = 1;
const OP_DELETE: i64 = 2;
const OP_INSERT: i64 = 3;
const OP_EDIT: i64 = 4;
const OP_SET_KEY: i64 = 5;
const OP_REMOVE_KEY: i64 = 6;
const OP_EDIT_KEY: i64 = 7;

/// Compute a patch turning `old` into `new`.
///
/// Returns `None` when the patch would exceed `max_bytes` in serialized
/// form, or when it would not be smaller than shipping `new` outright.
#[must_use]
pub fn delta(old: &Value, new: &Value, max_bytes: usize) -> Option<Value> {
    if old == new {
        return Some(Value::array(Vec::new()));
    }

    let ops = match (old, new) {
        (Value::Array(a), Value::Array(b)) => array_ops(a, b),
        (Value::Object(a), Value::Object(b)) => object_ops(a, b),
        _ => return None,
    };

    let patch = Value::array(ops);
    let size = patch.serialized_size();
    if size <= max_bytes && size < new.serialized_size() {
        Some(patch)
    } else {
        None
    }
}

/// Apply a patch produced by [`delta`] to the value it was computed from.
pub fn apply(base: &Value, patch: &Value) -> Result<Value> {
    let ops = patch
        .as_array()
        .ok_or_else(|| CometError::Delta("patch is not an array".into()))?;

    let mut current = base.clone();
    for op in ops.iter() {
        current = apply_op(current, op)?;
    }
    Ok(current)
}

fn array_ops(old: &Array, new: &Array) -> Vec<Value> {
    let old_items: Vec<&Value> = old.iter().collect();
    let new_items: Vec<&Value> = new.iter().collect();

    let mut prefix = 0;
    while prefix < old_items.len()
        && prefix < new_items.len()
        && old_items[prefix] == new_items[prefix]
    {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < old_items.len() - prefix
        && suffix < new_items.len() - prefix
        && old_items[old_items.len() - 1 - suffix] == new_items[new_items.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let old_mid = &old_items[prefix..old_items.len() - suffix];
    let new_mid = &new_items[prefix..new_items.len() - suffix];

    let mut ops = Vec::new();
    if old_mid.len() == 1 && new_mid.len() == 1 {
        ops.push(change_element_op(prefix, old_mid[0], new_mid[0]));
        return ops;
    }

    if !old_mid.is_empty() {
        ops.push(Value::array(vec![
            Value::from(OP_DELETE),
            Value::from(prefix as i64),
            Value::from((prefix + old_mid.len()) as i64),
        ]));
    }
    for (offset, item) in new_mid.iter().enumerate() {
        ops.push(Value::array(vec![
            Value::from(OP_INSERT),
            Value::from((prefix + offset) as i64),
            (*item).clone(),
        ]));
    }
    ops
}

/// Prefer a nested patch over a plain replacement when it is smaller.
fn change_element_op(index: usize, old: &Value, new: &Value) -> Value {
    let replace = Value::array(vec![
        Value::from(OP_REPLACE),
        Value::from(index as i64),
        new.clone(),
    ]);

    let nested_ops = match (old, new) {
        (Value::Array(a), Value::Array(b)) => Some(array_ops(a, b)),
        (Value::Object(a), Value::Object(b)) => Some(object_ops(a, b)),
        _ => None,
    };
    if let Some(ops) = nested_ops {
        let edit = Value::array(vec![
            Value::from(OP_EDIT),
            Value::from(index as i64),
            Value::array(ops),
        ]);
        if edit.serialized_size() < replace.serialized_size() {
            return edit;
        }
    }
    replace
}

fn object_ops(old: &Object, new: &Object) -> Vec<Value> {
    let mut ops = Vec::new();

    for (key, _) in old.iter() {
        if !new.contains_key(key) {
            ops.push(Value::array(vec![
                Value::from(OP_REMOVE_KEY),
                Value::from(key),
            ]));
        }
    }

    for (key, new_value) in new.iter() {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => ops.push(change_key_op(key, old_value, new_value)),
            None => ops.push(Value::array(vec![
                Value::from(OP_SET_KEY),
                Value::from(key),
                new_value.clone(),
            ])),
        }
    }

    ops
}

fn change_key_op(key: &str, old: &Value, new: &Value) -> Value {
    let set = Value::array(vec![
        Value::from(OP_SET_KEY),
        Value::from(key),
        new.clone(),
    ]);

    let nested_ops = match (old, new) {
        (Value::Array(a), Value::Array(b)) => Some(array_ops(a, b)),
        (Value::Object(a), Value::Object(b)) => Some(object_ops(a, b)),
        _ => None,
    };
    if let Some(ops) = nested_ops {
        let edit = Value::array(vec![
            Value::from(OP_EDIT_KEY),
            Value::from(key),
            Value::array(ops),
        ]);
        if edit.serialized_size() < set.serialized_size() {
            return edit;
        }
    }
    set
}

fn apply_op(value: Value, op: &Value) -> Result<Value> {
    let parts = op
        .as_array()
        .ok_or_else(|| CometError::Delta("operation is not an array".into()))?;
    let opcode = parts
        .get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| CometError::Delta("missing opcode".into()))?;

    match opcode {
        OP_REPLACE | OP_DELETE | OP_INSERT | OP_EDIT => {
            let items: Vec<Value> = value
                .as_array()
                .ok_or_else(|| CometError::Delta("array op on non-array".into()))?
                .iter()
                .cloned()
                .collect();
            apply_array_op(items, opcode, parts)
        }
        OP_SET_KEY | OP_REMOVE_KEY | OP_EDIT_KEY => {
            let object = value
                .as_object()
                .ok_or_else(|| CometError::Delta("object op on non-object".into()))?
                .clone();
            apply_object_op(object, opcode, parts)
        }
        other => Err(CometError::Delta(format!("unknown opcode {other}"))),
    }
}

fn op_index(parts: &Array, at: usize) -> Result<usize> {
    parts
        .get(at)
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CometError::Delta("bad index".into()))
}

fn op_operand<'a>(parts: &'a Array, at: usize) -> Result<&'a Value> {
    parts
        .get(at)
        .ok_or_else(|| CometError::Delta("missing operand".into()))
}

fn apply_array_op(mut items: Vec<Value>, opcode: i64, parts: &Array) -> Result<Value> {
    match opcode {
        OP_REPLACE => {
            let index = op_index(parts, 1)?;
            let operand = op_operand(parts, 2)?;
            if index >= items.len() {
                return Err(CometError::Delta(format!("replace index {index} out of range")));
            }
            items[index] = operand.clone();
        }
        OP_DELETE => {
            let from = op_index(parts, 1)?;
            let to = op_index(parts, 2)?;
            if from > to || to > items.len() {
                return Err(CometError::Delta(format!("delete range {from}..{to} out of range")));
            }
            items.drain(from..to);
        }
        OP_INSERT => {
            let index = op_index(parts, 1)?;
            let operand = op_operand(parts, 2)?;
            if index > items.len() {
                return Err(CometError::Delta(format!("insert index {index} out of range")));
            }
            items.insert(index, operand.clone());
        }
        OP_EDIT => {
            let index = op_index(parts, 1)?;
            let operand = op_operand(parts, 2)?;
            if index >= items.len() {
                return Err(CometError::Delta(format!("edit index {index} out of range")));
            }
            items[index] = apply(&items[index], operand)?;
        }
        _ => unreachable!("array opcode checked by caller"),
    }
    Ok(Value::array(items))
}

fn apply_object_op(object: Object, opcode: i64, parts: &Array) -> Result<Value> {
    let key = op_operand(parts, 1)?
        .as_str()
        .ok_or_else(|| CometError::Delta("object op key is not a string".into()))?;

    let result = match opcode {
        OP_SET_KEY => object.with(key, op_operand(parts, 2)?.clone()),
        OP_REMOVE_KEY => {
            if !object.contains_key(key) {
                return Err(CometError::Delta(format!("remove of unknown key {key:?}")));
            }
            object.without(key)
        }
        OP_EDIT_KEY => {
            let current = object
                .get(key)
                .ok_or_else(|| CometError::Delta(format!("edit of unknown key {key:?}")))?;
            let patched = apply(current, op_operand(parts, 2)?)?;
            object.with(key, patched)
        }
        _ => unreachable!("object opcode checked by caller"),
    };
    Ok(Value::Object(result))
}
