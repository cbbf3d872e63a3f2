//! `sheetsync-recon`: mapping-driven spreadsheet reconciliation engine.
//!
//! Pure engine crate: reads rows through [`sheetsync_io::TabularSource`],
//! writes through the [`Repository`] trait. Storage backends live elsewhere.

pub mod binding;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod job;
pub mod mapping;
pub mod materializer;
pub mod memory;
pub mod record;
pub mod reference;
pub mod repository;
pub mod resolver;
pub mod value;

pub use binding::{BoundProperty, ColumnBinding};
pub use config::{EngineSettings, SyncConfig};
pub use context::{ArgumentSpec, ContextDefinition, ContextRegistry};
pub use engine::{Engine, EngineSession, Preview, RunState};
pub use error::{ImportError, ImportFailure, ValidationErrors};
pub use job::{ArgumentValue, ImportCounters, ImportFlags, ImportJob, ImportStatus, MappedProperty};
pub use mapping::{FieldMappingRegistry, MappingMetadata, MappingTable, TargetSchema};
pub use memory::MemoryRepository;
pub use record::{FieldTransform, Record};
pub use reference::{PassthroughResolver, ReferenceResolver};
pub use repository::{Constraint, Entity, Query, Repository, RepositoryError};
pub use resolver::IdentityResolver;
pub use value::{EntityRef, Value};
