//! §4.9: the query layer — a BLQL filter/update dialect (`parse`), an
//! in-memory evaluator (`eval`), an index-aware planner (`optimizer`), the
//! find/update/delete pipelines that tie them to a `Collection` (`exec`),
//! and the materialized result type (`cursor`).

pub mod cursor;
pub mod eval;
pub mod exec;
pub mod optimizer;
pub mod parse;
pub mod types;

pub use cursor::Cursor;
pub use exec::{count_docs, delete_many, delete_one, find_docs, update_many, update_one};
pub use optimizer::Plan;
pub use parse::{parse_filter_json, parse_update_json, to_canonical_json, to_json};
pub use types::{CmpOp, DeleteReport, Filter, FindOptions, Order, QueryModel, SortSpec, UpdateDoc, UpdateReport};
