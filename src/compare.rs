//! Equality and ordering across host values and lazy collections.
//!
//! Unlike `PartialEq for Value`, these functions read lazy collections, so
//! they can fail. Sequences (host lists and lazy lists, or tuples with
//! tuples) compare lexicographically: the first pair of elements that is not
//! equal decides, and a proper prefix sorts first. Ordering between kinds with
//! no defined order is `UnsupportedOperation`; equality between them is
//! simply false.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::collections::LazyList;
use crate::error::OocError;
use crate::store::{Store, Txn};
use crate::token::Token;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Elements of a list-like value. Lists of the comparison's own store are
/// read position by position through its transaction; host lists and lists
/// of other stores are copied out first.
enum Items<'t> {
    Host(Vec<Value>),
    Stored {
        txn: &'t Txn,
        list: LazyList,
        length: usize,
    },
}

impl Items<'_> {
    fn len(&self) -> usize {
        match self {
            Items::Host(values) => values.len(),
            Items::Stored { length, .. } => *length,
        }
    }

    fn get(&self, index: usize) -> Result<Value, OocError> {
        match self {
            Items::Host(values) => Ok(values[index].clone()),
            Items::Stored { txn, list, .. } => list.get_in(txn, index),
        }
    }
}

fn is_list_like(value: &Value) -> bool {
    matches!(value, Value::List(_) | Value::LazyList(_))
}

fn is_dict_like(value: &Value) -> bool {
    matches!(value, Value::Dict(_) | Value::LazyDict(_))
}

/// Same shared host collection, or same stored collection.
fn same_node(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::LazyList(x), Value::LazyList(y)) => x.same_collection(y),
        (Value::LazyDict(x), Value::LazyDict(y)) => x.same_collection(y),
        _ => false,
    }
}

fn unsupported(op: &'static str, a: &Value, b: &Value) -> OocError {
    OocError::UnsupportedOperation {
        operation: op,
        left: a.kind_name(),
        right: b.kind_name(),
    }
}

/// One comparison: the transaction it reads through and the pairs of
/// collections currently being compared. A pair met again while still open
/// is taken as equal, so cyclic structures compare without recursing forever.
struct Comparer<'t> {
    txn: Option<&'t Txn>,
    open: Vec<(Value, Value)>,
}

impl<'t> Comparer<'t> {
    fn new(txn: Option<&'t Txn>) -> Self {
        Comparer {
            txn,
            open: Vec::new(),
        }
    }

    fn txn_for(&self, store: &Store) -> Option<&'t Txn> {
        self.txn.filter(|txn| txn.store().same_store(store))
    }

    fn is_open(&self, a: &Value, b: &Value) -> bool {
        self.open.iter().any(|(x, y)| {
            (same_node(x, a) && same_node(y, b)) || (same_node(x, b) && same_node(y, a))
        })
    }

    fn items(&self, value: &Value) -> Result<Option<Items<'t>>, OocError> {
        match value {
            Value::List(list) => Ok(Some(Items::Host(list.borrow().clone()))),
            Value::LazyList(list) => match self.txn_for(list.store()) {
                Some(txn) => Ok(Some(Items::Stored {
                    txn,
                    list: list.clone(),
                    length: list.length_in(txn)? as usize,
                })),
                None => Ok(Some(Items::Host(list.to_vec()?))),
            },
            _ => Ok(None),
        }
    }

    fn equal(&mut self, a: &Value, b: &Value) -> Result<bool, OocError> {
        match (a, b) {
            (Value::Tuple(xs), Value::Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                for (x, y) in xs.iter().zip(ys) {
                    if !self.equal(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ if same_node(a, b) || self.is_open(a, b) => Ok(true),
            _ if is_list_like(a) && is_list_like(b) => {
                self.open.push((a.clone(), b.clone()));
                let result = self.sequence_order(a, b, None);
                self.open.pop();
                Ok(result? == Some(Ordering::Equal))
            }
            _ if is_dict_like(a) && is_dict_like(b) => {
                self.open.push((a.clone(), b.clone()));
                let result = self.dicts_equal(a, b);
                self.open.pop();
                result
            }
            _ => Ok(a == b),
        }
    }

    /// Lexicographic order of two list-like values. With `op` unset only
    /// equality is wanted: the first unequal pair yields `None` instead of
    /// being ordered.
    fn sequence_order(
        &mut self,
        a: &Value,
        b: &Value,
        op: Option<&'static str>,
    ) -> Result<Option<Ordering>, OocError> {
        let (Some(xs), Some(ys)) = (self.items(a)?, self.items(b)?) else {
            return Err(unsupported(op.unwrap_or("=="), a, b));
        };
        let mut index = 0;
        loop {
            match (index < xs.len(), index < ys.len()) {
                (false, false) => return Ok(Some(Ordering::Equal)),
                (false, true) => return Ok(Some(Ordering::Less)),
                (true, false) => return Ok(Some(Ordering::Greater)),
                (true, true) => {
                    let x = xs.get(index)?;
                    let y = ys.get(index)?;
                    if self.equal(&x, &y)? {
                        index += 1;
                        continue;
                    }
                    return match op {
                        Some(op) => self.order(&x, &y, op).map(Some),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn order(&mut self, a: &Value, b: &Value, op: &'static str) -> Result<Ordering, OocError> {
        match (a, b) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
            (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
            // Token order folds -0.0 into 0.0 and sorts NaN above everything.
            (Value::Float(x), Value::Float(y)) => Ok(Token::float(*x).cmp(&Token::float(*y))),
            (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
            (Value::Bytes(x), Value::Bytes(y)) => Ok(x.cmp(y)),
            (Value::Tuple(xs), Value::Tuple(ys)) => {
                for (x, y) in xs.iter().zip(ys) {
                    if !self.equal(x, y)? {
                        return self.order(x, y, op);
                    }
                }
                Ok(xs.len().cmp(&ys.len()))
            }
            _ if is_list_like(a) && is_list_like(b) => {
                if same_node(a, b) || self.is_open(a, b) {
                    return Ok(Ordering::Equal);
                }
                self.open.push((a.clone(), b.clone()));
                let result = self.sequence_order(a, b, Some(op));
                self.open.pop();
                result?.ok_or_else(|| unsupported(op, a, b))
            }
            _ => Err(unsupported(op, a, b)),
        }
    }

    fn dict_len(&self, value: &Value) -> Result<usize, OocError> {
        match value {
            Value::Dict(dict) => Ok(dict.borrow().len()),
            Value::LazyDict(dict) => match self.txn_for(dict.store()) {
                Some(txn) => dict.length_in(txn).map(|n| n as usize),
                None => dict.len(),
            },
            _ => Err(OocError::NotIterable {
                kind: value.kind_name(),
            }),
        }
    }

    fn dict_pairs(&self, value: &Value) -> Result<Vec<(Value, Value)>, OocError> {
        match value {
            Value::Dict(dict) => Ok(dict.borrow().clone()),
            Value::LazyDict(dict) => match self.txn_for(dict.store()) {
                Some(txn) => dict.to_vec_in(txn),
                None => dict.to_vec(),
            },
            _ => Err(OocError::NotIterable {
                kind: value.kind_name(),
            }),
        }
    }

    fn dict_lookup(&mut self, value: &Value, key: &Value) -> Result<Option<Value>, OocError> {
        match value {
            Value::Dict(dict) => {
                let pairs = dict.borrow().clone();
                for (candidate, found) in pairs {
                    if self.equal(&candidate, key)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            Value::LazyDict(dict) if key.is_hashable() => match self.txn_for(dict.store()) {
                Some(txn) => dict.get_in(txn, key),
                None => dict.get(key),
            },
            _ => Ok(None),
        }
    }

    fn dicts_equal(&mut self, a: &Value, b: &Value) -> Result<bool, OocError> {
        if self.dict_len(a)? != self.dict_len(b)? {
            return Ok(false);
        }
        for (key, value) in self.dict_pairs(a)? {
            match self.dict_lookup(b, &key)? {
                Some(other) if self.equal(&value, &other)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

fn lazy_store(value: &Value) -> Option<&Store> {
    match value {
        Value::LazyList(list) => Some(list.store()),
        Value::LazyDict(dict) => Some(dict.store()),
        _ => None,
    }
}

/// Run a comparison in one read transaction of whichever operand is stored.
fn detached<T>(
    a: &Value,
    b: &Value,
    compare: impl FnOnce(&mut Comparer<'_>) -> Result<T, OocError>,
) -> Result<T, OocError> {
    match lazy_store(a).or_else(|| lazy_store(b)) {
        Some(store) => store.read(|txn| compare(&mut Comparer::new(Some(txn)))),
        None => compare(&mut Comparer::new(None)),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> Result<bool, OocError> {
    detached(a, b, |comparer| comparer.equal(a, b))
}

/// Equality reading collections of `txn`'s store through `txn`, so a writer
/// sees its own uncommitted changes.
pub fn values_equal_in(txn: &Txn, a: &Value, b: &Value) -> Result<bool, OocError> {
    Comparer::new(Some(txn)).equal(a, b)
}

/// Total order between two values of the same orderable kind. `op` names the
/// operator in the error for anything else.
pub fn compare_values(a: &Value, b: &Value, op: &'static str) -> Result<Ordering, OocError> {
    detached(a, b, |comparer| comparer.order(a, b, op))
}

pub fn compare_values_in(
    txn: &Txn,
    a: &Value,
    b: &Value,
    op: &'static str,
) -> Result<Ordering, OocError> {
    Comparer::new(Some(txn)).order(a, b, op)
}

fn evaluate(
    comparer: &mut Comparer<'_>,
    a: &Value,
    b: &Value,
    op: CompareOp,
) -> Result<bool, OocError> {
    match op {
        CompareOp::Eq => comparer.equal(a, b),
        CompareOp::Ne => comparer.equal(a, b).map(|equal| !equal),
        _ => comparer.order(a, b, op.symbol()).map(|ordering| op.holds(ordering)),
    }
}

/// Evaluate `a op b`.
pub fn rich_compare(a: &Value, b: &Value, op: CompareOp) -> Result<bool, OocError> {
    detached(a, b, |comparer| evaluate(comparer, a, b, op))
}

pub fn rich_compare_in(txn: &Txn, a: &Value, b: &Value, op: CompareOp) -> Result<bool, OocError> {
    evaluate(&mut Comparer::new(Some(txn)), a, b, op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn test_lexicographic_lists() {
        assert!(rich_compare(&ints(&[1, 2, 3]), &ints(&[1, 2, 4]), CompareOp::Lt).unwrap());
        assert!(rich_compare(&ints(&[1, 2]), &ints(&[1, 2, 3]), CompareOp::Lt).unwrap());
        assert!(rich_compare(&ints(&[1, 2, 3]), &ints(&[1, 2, 3]), CompareOp::Ge).unwrap());
        assert!(rich_compare(&ints(&[2]), &ints(&[1, 9]), CompareOp::Gt).unwrap());
    }

    #[test]
    fn test_incompatible_kinds() {
        let list = ints(&[1]);
        assert!(!values_equal(&list, &Value::Int(1)).unwrap());
        assert!(rich_compare(&list, &Value::Int(1), CompareOp::Ne).unwrap());
        let error = rich_compare(&list, &Value::Int(1), CompareOp::Lt).unwrap_err();
        assert!(matches!(
            error,
            OocError::UnsupportedOperation {
                operation: "<",
                left: "list",
                right: "int"
            }
        ));
        let tuple = Value::Tuple(vec![Value::Int(1)]);
        assert!(!values_equal(&list, &tuple).unwrap());
    }

    #[test]
    fn test_equal_unorderable_elements_do_not_fail() {
        let a = Value::list(vec![Value::dict(vec![])]);
        let b = Value::list(vec![Value::dict(vec![])]);
        assert!(rich_compare(&a, &b, CompareOp::Le).unwrap());
        let c = Value::list(vec![Value::dict(vec![(Value::Int(1), Value::Null)])]);
        assert!(!values_equal(&a, &c).unwrap());
        assert!(rich_compare(&a, &c, CompareOp::Lt).is_err());
    }

    #[test]
    fn test_float_order_matches_equality() {
        let zero = Value::Float(0.0);
        let negative_zero = Value::Float(-0.0);
        assert_eq!(
            compare_values(&zero, &negative_zero, "<").unwrap(),
            Ordering::Equal
        );
        assert!(values_equal(&zero, &negative_zero).unwrap());
        let nan = Value::Float(f64::NAN);
        assert_eq!(
            compare_values(&nan, &Value::Float(f64::INFINITY), "<").unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_dict_equality_ignores_order() {
        let a = Value::dict(vec![
            (Value::str("x"), Value::Int(1)),
            (Value::str("y"), Value::Int(2)),
        ]);
        let b = Value::dict(vec![
            (Value::str("y"), Value::Int(2)),
            (Value::str("x"), Value::Int(1)),
        ]);
        assert!(values_equal(&a, &b).unwrap());
        assert!(rich_compare(&a, &b, CompareOp::Lt).is_err());
    }

    #[test]
    fn test_tuples() {
        let a = Value::Tuple(vec![Value::Int(1), Value::str("b")]);
        let b = Value::Tuple(vec![Value::Int(1), Value::str("c")]);
        assert!(rich_compare(&a, &b, CompareOp::Lt).unwrap());
        assert!(rich_compare(&a, &a, CompareOp::Eq).unwrap());
    }

    fn cyclic(head: i64) -> Value {
        let list = Value::list(vec![Value::Int(head)]);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        list
    }

    #[test]
    fn test_cyclic_lists_terminate() {
        assert!(values_equal(&cyclic(1), &cyclic(1)).unwrap());
        assert!(!values_equal(&cyclic(1), &cyclic(2)).unwrap());
        assert!(rich_compare(&cyclic(1), &cyclic(2), CompareOp::Lt).unwrap());
        assert_eq!(
            compare_values(&cyclic(3), &cyclic(3), "<").unwrap(),
            Ordering::Equal
        );
    }
}
