use super::FactKind;
use super::FactValue;
use super::MetadataProvider;
use super::NodeAnnotation;
use super::ProviderOutput;
use super::ProviderScope;
use crate::error::ProviderError;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::debug;
use tracing::info;
use typescope_ast::CodePosition;
use typescope_ast::CodeRange;

const PROVIDER_ID: &str = "pyre-types";

/// Type inference through a running `pyre` server.
///
/// Issues `pyre --noninteractive query "types(path='...', ...)"` in the
/// repository root. Pyre reports 1-based lines and 0-based columns, which is
/// the convention used throughout this crate.
#[derive(Debug, Clone)]
pub struct PyreTypeProvider {
    command: String,
}

impl PyreTypeProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for PyreTypeProvider {
    fn default() -> Self {
        Self::new("pyre")
    }
}

impl MetadataProvider for PyreTypeProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn fact(&self) -> FactKind {
        FactKind::InferredType
    }

    fn scope(&self) -> ProviderScope {
        ProviderScope::Repository
    }

    fn compute(&self, root: &Path, paths: &[String]) -> Result<ProviderOutput, ProviderError> {
        if paths.is_empty() {
            return Ok(ProviderOutput::default());
        }
        let query = format!(
            "types({})",
            paths
                .iter()
                .map(|path| format!("path='{}'", root.join(path).display()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!(command = %self.command, files = paths.len(), "querying pyre for types");
        let output = Command::new(&self.command)
            .arg("--noninteractive")
            .arg("query")
            .arg(&query)
            .current_dir(root)
            .output()
            .map_err(|e| ProviderError::failed(PROVIDER_ID, format!("failed to run {}: {e}", self.command)))?;
        if !output.status.success() {
            return Err(ProviderError::failed(
                PROVIDER_ID,
                format!(
                    "{} exited with {}: {}",
                    self.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        parse_types_response(root, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct TypesResponse {
    response: Vec<FileTypes>,
}

#[derive(Debug, Deserialize)]
struct FileTypes {
    path: String,
    types: Vec<TypeAnnotation>,
}

#[derive(Debug, Deserialize)]
struct TypeAnnotation {
    location: Location,
    annotation: String,
}

#[derive(Debug, Deserialize)]
struct Location {
    start: Point,
    stop: Point,
}

#[derive(Debug, Deserialize)]
struct Point {
    line: usize,
    column: usize,
}

impl From<Point> for CodePosition {
    fn from(point: Point) -> Self {
        CodePosition::new(point.line, point.column)
    }
}

/// Parse the JSON answer of a pyre `types(...)` query.
///
/// Paths in the answer are made relative to `root`; empty ranges are dropped.
pub fn parse_types_response(root: &Path, json: &[u8]) -> Result<ProviderOutput, ProviderError> {
    let parsed: TypesResponse =
        serde_json::from_slice(json).map_err(|e| ProviderError::malformed(PROVIDER_ID, e.to_string()))?;

    let mut output = ProviderOutput::default();
    for file in parsed.response {
        let path = Path::new(&file.path);
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let annotations = output.files.entry(relative).or_default();
        for ty in file.types {
            let range = CodeRange::new(ty.location.start.into(), ty.location.stop.into());
            if range.is_degenerate() {
                continue;
            }
            annotations.push(NodeAnnotation {
                range,
                kind: None,
                value: FactValue::Type(ty.annotation),
            });
        }
    }
    debug!(files = output.files.len(), "parsed pyre types");
    Ok(output)
}
