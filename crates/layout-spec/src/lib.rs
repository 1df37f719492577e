#![allow(missing_docs)]

pub mod builder;
pub mod commit;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod eval;
pub mod expr;
pub mod functions;
pub mod node;
pub mod path;
pub mod render;
pub mod rows;
pub mod spec;
pub mod store;
pub mod validate;
pub mod value;
pub mod visibility;

pub use builder::{BuildReport, TreeBuilder};
pub use commit::{CommitQueue, FlushReport, Tick};
pub use config::{ConfigError, EngineConfig};
pub use context::{
    DataSources, EvalContext, InstanceContext, NoNodes, NodeLookup, ProcessContext, ResolvedNode,
    RowCountSource, TaskContext,
};
pub use engine::{GenerationReport, GenerationTrigger, LayoutEngine};
pub use error::{EngineError, ExprError, ExprResult, LayoutError};
pub use eval::{Evaluator, evaluate_json};
pub use expr::{Expr, TypedExpr};
pub use functions::{FunctionDef, FunctionRegistry, Invocation};
pub use node::{LayoutNode, NodeRow, NodeTree, PageState, RowExtras, RowId, indexed_id};
pub use path::{DataModelPath, DataReference};
pub use render::{RenderNode, RenderPage, RenderPayload, build_render_payload, render_json, render_text};
pub use rows::{ArenaKey, RowArena, RowChange, RowChangeKind, RowRegistry};
pub use spec::{ComponentSpec, LayoutSet, PageSpec};
pub use store::SnapshotStore;
pub use validate::{CompiledLayout, LayoutIssue, ValidationReport, compile, validate};
pub use value::{ExprType, ExprValue};
pub use visibility::{
    InteractionEvent, ValidationCategory, ValidationMask, Visibility, VisibilityTree,
};
