//! Purpose: Define the stable public Rust API boundary for rowshape.
//! Exports: Mapper, record mapper, options, value model and collaborator traits.
//! Role: Public, additive-only surface; internal plan and assembly types stay hidden.
//! Invariants: Everything a caller needs to map rows is reachable from this module.
//! Invariants: Internal modules remain reachable through `core` but are not promised stable.

pub use crate::core::context::Context;
pub use crate::core::db::{ColumnType, CursorReader, Database, RowCursor, ScanType};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::exclude::{
    AllowedProperties, ConditionalExclude, PropertyExcluder, PropertyExclusions,
};
pub use crate::core::limit::{Limiter, MaxRows, Unlimited};
pub use crate::core::mapper::{ColumnList, Mapper};
pub use crate::core::mapping::{Mapping, Mappings, PostProcess};
pub use crate::core::options::{AddClause, MapOption, Query};
pub use crate::core::post::{ProvidingProcessor, RowPostProcessor};
pub use crate::core::record::{
    DeclaredColumnNamer, Field, FieldColumnNamer, FromValue, Record, RecordMapper, RecordOption,
    RecordPostProcessor,
};
pub use crate::core::scan::{ColumnScanner, bool_column};
pub use crate::core::subquery::SubQuery;
pub use crate::core::translate::{ErrorTranslator, PassThrough};
pub use crate::core::value::{Row, Value};
pub use crate::record_fields;
