pub mod compiled;
pub mod decl;
pub mod registry;

pub use compiled::{
    compile, CompiledField, CompiledSortKey, CompiledType, Computation, Dependent,
    DependencyPath, FieldKind, RelationDef, Trigger,
};
pub use decl::{Cardinality, ComputeFn, FieldDecl, SortKey, SortOrder, TypeDecl};
pub use registry::{Registry, Schema};
