//! Server-side expressions.
//!
//! Expressions are built by the caller and evaluated by the storage engine
//! against the record being operated on, so conditional logic runs inside
//! the atomic command instead of in a separate read round trip.
//!
//! Evaluation produces either a value or [`Eval::Unknown`]. `Unknown` is the
//! "no value" sentinel: an expression write whose result is `Unknown` becomes
//! a skipped write when the operation carries `eval_no_fail`, and an error
//! otherwise.
//!
//! # Example
//!
//! ```ignore
//! // (totalObs if it exists, else 0) + 3
//! let total = Exp::add(
//!     Exp::cond(
//!         Exp::bin_exists("totalObs"),
//!         Exp::int_bin("totalObs"),
//!         Exp::val(0),
//!     ),
//!     Exp::val(3),
//! );
//! ```

mod eval;

pub use eval::{Eval, ExpError};

use crate::types::Value;

/// An expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Exp {
    /// Constant.
    Val(Value),
    /// Integer bin; `Unknown` when the bin is absent.
    IntBin(String),
    /// List bin; `Unknown` when the bin is absent.
    ListBin(String),
    /// True if the bin is present.
    BinExists(String),
    Not(Box<Exp>),
    /// Integer sum of all operands.
    Add(Vec<Exp>),
    /// Integer `left >= right`.
    Ge(Box<Exp>, Box<Exp>),
    /// Ternary; only the selected branch is evaluated.
    Cond {
        when: Box<Exp>,
        then: Box<Exp>,
        otherwise: Box<Exp>,
    },
    /// Length of a list.
    ListSize(Box<Exp>),
    /// Items `[index, index + count)` of a list, clamped to its length.
    /// A missing count means "to the end".
    ListRange {
        index: Box<Exp>,
        count: Option<Box<Exp>>,
        list: Box<Exp>,
    },
    /// The no-value sentinel.
    Unknown,
}

impl Exp {
    pub fn val(value: impl Into<Value>) -> Self {
        Exp::Val(value.into())
    }

    pub fn int_bin(name: impl Into<String>) -> Self {
        Exp::IntBin(name.into())
    }

    pub fn list_bin(name: impl Into<String>) -> Self {
        Exp::ListBin(name.into())
    }

    pub fn bin_exists(name: impl Into<String>) -> Self {
        Exp::BinExists(name.into())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(exp: Exp) -> Self {
        Exp::Not(Box::new(exp))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(left: Exp, right: Exp) -> Self {
        Exp::Add(vec![left, right])
    }

    pub fn ge(left: Exp, right: Exp) -> Self {
        Exp::Ge(Box::new(left), Box::new(right))
    }

    pub fn cond(when: Exp, then: Exp, otherwise: Exp) -> Self {
        Exp::Cond {
            when: Box::new(when),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn list_size(list: Exp) -> Self {
        Exp::ListSize(Box::new(list))
    }

    /// `count` items starting at `index`.
    pub fn list_range(index: Exp, count: Exp, list: Exp) -> Self {
        Exp::ListRange {
            index: Box::new(index),
            count: Some(Box::new(count)),
            list: Box::new(list),
        }
    }

    /// All items from `index` to the end.
    pub fn list_range_from(index: Exp, list: Exp) -> Self {
        Exp::ListRange {
            index: Box::new(index),
            count: None,
            list: Box::new(list),
        }
    }

    pub fn unknown() -> Self {
        Exp::Unknown
    }
}
