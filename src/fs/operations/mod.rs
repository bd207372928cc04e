//! Path operations on [`Drive`](crate::Drive), split by concern.

mod browse;
mod scope;
mod trash;
mod tree;

pub(crate) use browse::DirCursor;
