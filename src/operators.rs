// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Associative fold operators for aggregates and prefix passes.

use crate::{
    obliv::{ct_lt_i32, CtMove},
    tuple::Tuple,
    TableError, Value,
};
use std::{fmt, str::FromStr};
use subtle::{Choice, ConditionallySelectable};

/// The key and value columns of a folding operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    /// Rows fold into each other only when they agree on these columns.
    pub group_by: Vec<usize>,
    /// The column that accumulates.
    pub aggregate: usize,
}

/// A closed set of associative operators.
///
/// [`AssociateOperator::apply`] folds `a` into `b` without branching on the outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociateOperator {
    Add(Fold),
    Mul(Fold),
    Max(Fold),
    Min(Fold),
    /// Copies the whole of `a` into `b` when `b` is a dummy.
    Copy,
}

impl AssociateOperator {
    pub fn add(group_by: Vec<usize>, aggregate: usize) -> Self {
        Self::Add(Fold {
            group_by,
            aggregate,
        })
    }

    pub fn mul(group_by: Vec<usize>, aggregate: usize) -> Self {
        Self::Mul(Fold {
            group_by,
            aggregate,
        })
    }

    pub fn max(group_by: Vec<usize>, aggregate: usize) -> Self {
        Self::Max(Fold {
            group_by,
            aggregate,
        })
    }

    pub fn min(group_by: Vec<usize>, aggregate: usize) -> Self {
        Self::Min(Fold {
            group_by,
            aggregate,
        })
    }

    /// The identifier used on the wire.
    pub fn op_id(&self) -> u8 {
        match self {
            Self::Add(_) => 0,
            Self::Mul(_) => 1,
            Self::Max(_) => 2,
            Self::Min(_) => 3,
            Self::Copy => 4,
        }
    }

    /// The identity value of the fold.
    pub fn zero(&self) -> Value {
        match self {
            Self::Add(_) | Self::Copy => 0,
            Self::Mul(_) => 1,
            Self::Max(_) => Value::MIN,
            Self::Min(_) => Value::MAX,
        }
    }

    pub fn fold(&self) -> Option<&Fold> {
        match self {
            Self::Add(f) | Self::Mul(f) | Self::Max(f) | Self::Min(f) => Some(f),
            Self::Copy => None,
        }
    }

    /// The grouping columns, empty for `Copy`.
    pub fn group_by(&self) -> &[usize] {
        self.fold().map_or(&[], |f| f.group_by.as_slice())
    }

    /// Folds `a` into `b`. Returns whether the fold took effect, which for the keyed operators
    /// is whether `a` and `b` share a group.
    pub fn apply(&self, a: &Tuple, b: &mut Tuple) -> Choice {
        self.apply_if(a, b, Choice::from(1))
    }

    /// [`AssociateOperator::apply`], masked by `enable`.
    pub fn apply_if(&self, a: &Tuple, b: &mut Tuple, enable: Choice) -> Choice {
        let fold = match self {
            Self::Copy => {
                let cond = b.ct_is_dummy() & enable;
                b.cmove(a, cond);
                return cond;
            }
            Self::Add(f) | Self::Mul(f) | Self::Max(f) | Self::Min(f) => f,
        };
        let cond = a.ct_equal_in_cols(b, &fold.group_by) & enable;
        let x = a.data[fold.aggregate];
        let y = b.data[fold.aggregate];
        let folded = match self {
            Self::Add(_) => x.wrapping_add(y),
            Self::Mul(_) => x.wrapping_mul(y),
            Self::Max(_) => Value::conditional_select(&y, &x, ct_lt_i32(y, x)),
            Self::Min(_) => Value::conditional_select(&y, &x, ct_lt_i32(x, y)),
            Self::Copy => y,
        };
        b.data[fold.aggregate].conditional_assign(&folded, cond);
        cond
    }
}

impl fmt::Display for AssociateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fold() {
            None => write!(f, "({})", self.op_id()),
            Some(fold) => {
                write!(f, "({} {}", self.op_id(), fold.group_by.len())?;
                for col in &fold.group_by {
                    write!(f, " {}", col)?;
                }
                write!(f, " {})", fold.aggregate)
            }
        }
    }
}

impl FromStr for AssociateOperator {
    type Err = TableError;

    /// Parses `(opId numGroupBy col... aggregate)`, or `(4)` for `Copy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TableError::MalformedOperator(s.to_string());
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let numbers = inner
            .split_whitespace()
            .map(str::parse::<usize>)
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| malformed())?;

        let (&op_id, rest) = numbers.split_first().ok_or_else(malformed)?;
        if op_id == 4 {
            return if rest.is_empty() {
                Ok(Self::Copy)
            } else {
                Err(malformed())
            };
        }
        let (&num_group_by, rest) = rest.split_first().ok_or_else(malformed)?;
        if rest.len() != num_group_by + 1 {
            return Err(malformed());
        }
        let group_by = rest[..num_group_by].to_vec();
        let aggregate = rest[num_group_by];
        match op_id {
            0 => Ok(Self::add(group_by, aggregate)),
            1 => Ok(Self::mul(group_by, aggregate)),
            2 => Ok(Self::max(group_by, aggregate)),
            3 => Ok(Self::min(group_by, aggregate)),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_folds_only_matching_keys() {
        let op = AssociateOperator::add(vec![0], 1);
        let a = Tuple::new(vec![1, 10]);
        let mut b = Tuple::new(vec![1, 20]);
        let mut c = Tuple::new(vec![2, 30]);
        assert!(bool::from(op.apply(&a, &mut b)));
        assert!(!bool::from(op.apply(&b, &mut c)));
        assert_eq!(b.data, vec![1, 30]);
        assert_eq!(c.data, vec![2, 30]);
    }

    #[test]
    fn max_min_and_mul() {
        let a = Tuple::new(vec![5, -7]);
        let mut b = Tuple::new(vec![5, 3]);
        AssociateOperator::max(vec![0], 1).apply(&a, &mut b);
        assert_eq!(b.data[1], 3);
        AssociateOperator::min(vec![0], 1).apply(&a, &mut b);
        assert_eq!(b.data[1], -7);
        AssociateOperator::mul(vec![0], 1).apply(&a, &mut b);
        assert_eq!(b.data[1], 49);
    }

    #[test]
    fn empty_group_by_always_folds() {
        let op = AssociateOperator::add(vec![], 1);
        let a = Tuple::new(vec![1, 4]);
        let mut b = Tuple::new(vec![2, 5]);
        assert!(bool::from(op.apply(&a, &mut b)));
        assert_eq!(b.data[1], 9);
    }

    #[test]
    fn apply_if_respects_mask() {
        let op = AssociateOperator::add(vec![0], 1);
        let a = Tuple::new(vec![1, 4]);
        let mut b = Tuple::new(vec![1, 5]);
        assert!(!bool::from(op.apply_if(&a, &mut b, Choice::from(0))));
        assert_eq!(b.data[1], 5);
    }

    #[test]
    fn copy_fills_dummies_only() {
        let a = Tuple::new(vec![1, 2]);
        let mut real = Tuple::new(vec![3, 4]);
        let mut dummy = Tuple::dummy(2);
        assert!(!bool::from(AssociateOperator::Copy.apply(&a, &mut real)));
        assert!(bool::from(AssociateOperator::Copy.apply(&a, &mut dummy)));
        assert_eq!(real.data, vec![3, 4]);
        assert_eq!(dummy, a);
    }

    #[test]
    fn zero_values() {
        assert_eq!(AssociateOperator::add(vec![], 0).zero(), 0);
        assert_eq!(AssociateOperator::mul(vec![], 0).zero(), 1);
        assert_eq!(AssociateOperator::max(vec![], 0).zero(), i32::MIN);
        assert_eq!(AssociateOperator::min(vec![], 0).zero(), i32::MAX);
    }

    #[test]
    fn wire_format() {
        let op = AssociateOperator::max(vec![0, 2], 3);
        assert_eq!(op.to_string(), "(2 2 0 2 3)");
        assert_eq!("(2 2 0 2 3)".parse::<AssociateOperator>().unwrap(), op);
        assert_eq!(AssociateOperator::Copy.to_string(), "(4)");
        assert_eq!(
            " (4) ".parse::<AssociateOperator>().unwrap(),
            AssociateOperator::Copy
        );
        assert_eq!(
            "(0 0 5)".parse::<AssociateOperator>().unwrap(),
            AssociateOperator::add(vec![], 5)
        );
    }

    #[test]
    fn rejects_malformed_operators() {
        for bad in [
            "0 1 0 1", "(0 1 0 1", "0 1 0 1)", "()", "(9 1 0 1)", "(0 2 0 1)", "(4 1)", "(0 x 1)",
            "(1 1 -1 2)",
        ] {
            assert!(bad.parse::<AssociateOperator>().is_err(), "{}", bad);
        }
    }
}
