//! Typescope core - position queries over Python repositories
//!
//! Every tracked file of a repository is parsed into a graph of
//! [`NodeFact`]s: syntax nodes carrying their source range, their enclosing
//! node and whatever metadata providers reported for them (inferred types,
//! fully qualified names). [`SourceFileIndex`] answers position queries over
//! one file through an [`IntervalIndex`]; [`RepoIndex`] builds those indices
//! on demand and keeps provider output in an on-disk [`MetadataCache`].

pub mod cache;
pub mod config;
pub mod error;
pub mod facts;
pub mod interval;
pub mod providers;
pub mod repo;
mod single_flight;
pub mod source_file;
pub mod type_expr;

pub use cache::MetadataCache;
pub use cache::RepoFingerprint;
pub use cache::Resolution;
pub use config::RepoIndexConfig;
pub use error::IndexError;
pub use error::ProviderError;
pub use error::Result;
pub use facts::FactGraph;
pub use facts::NameOrigin;
pub use facts::NodeFact;
pub use facts::NodeId;
pub use facts::NodeMetadata;
pub use facts::QualifiedName;
pub use interval::Interval;
pub use interval::IntervalIndex;
pub use providers::MetadataProvider;
pub use repo::RepoIndex;
pub use repo::RepoIndexStats;
pub use source_file::RangeMode;
pub use source_file::SourceFileIndex;
pub use type_expr::InferredType;
pub use type_expr::TypeExpr;

pub use typescope_ast::CodePosition;
pub use typescope_ast::CodeRange;
pub use typescope_ast::NodeKind;
