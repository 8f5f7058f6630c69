//! Query-execution core of the gongdb embedded SQL engine.
//!
//! The crate takes a fully bound [`Query`] and produces its rows: it
//! pre-filters every table through a [`Catalog`], joins the survivors,
//! evaluates the projection and runs grouping and aggregation. Parsing and
//! binding happen elsewhere; [`storage::StorageEngine`] and
//! [`lock::LockManager`] are in-memory implementations of the two
//! collaborator contracts.

pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod expr;
pub mod group;
pub mod join;
pub mod lock;
pub mod projection;
pub mod query;
pub mod row;
pub mod storage;
pub mod value;

pub use config::EngineConfig;
pub use deadline::{CancelHandle, Deadline};
pub use engine::{format_query_rows, QueryEngine, QueryResult};
pub use error::{Error, Result};
pub use expr::{BinaryOperator, ColumnRef, EvalMode, Evaluated, Expr, ExprKind, Function};
pub use lock::{LockManager, SessionId, TableLocks};
pub use projection::ExprList;
pub use query::{JoinInfo, JoinKind, OrderByExpr, Query, TableRef};
pub use row::{RowId, RowSource};
pub use storage::{Catalog, Column, StorageEngine, TableMeta};
pub use value::{DataType, Value};
