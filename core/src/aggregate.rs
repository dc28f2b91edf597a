//! Optional merge step applied to a batch's result records.

use crate::types::ResultRecord;

/// Either the raw records or whatever the merge function produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated<T> {
    Raw(Vec<ResultRecord>),
    Merged(T),
}

impl<T> Aggregated<T> {
    pub fn merged(self) -> Option<T> {
        match self {
            Aggregated::Merged(value) => Some(value),
            Aggregated::Raw(_) => None,
        }
    }

    pub fn raw(self) -> Option<Vec<ResultRecord>> {
        match self {
            Aggregated::Raw(records) => Some(records),
            Aggregated::Merged(_) => None,
        }
    }
}

/// Apply `merge` to `results`, or hand them back untouched when there is no
/// merge function.
pub fn aggregate<T, F>(results: Vec<ResultRecord>, merge: Option<F>) -> Aggregated<T>
where
    F: FnOnce(Vec<ResultRecord>) -> T,
{
    match merge {
        Some(merge) => Aggregated::Merged(merge(results)),
        None => Aggregated::Raw(results),
    }
}
