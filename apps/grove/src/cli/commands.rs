//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::{GroveConfig, PublicationConfig};
use futures::StreamExt;
use grove_core::{
    Backend, EdgeQuery, EngineRegistry, Extension, GroveError, NodeId, PlanLifecycle,
    RedbBackend, Store, StoreRegistry, TypeName, VolatileBackend,
    export::{CanonicalGraph, canonical_crypto_hash, export_canonical, import_canonical},
    primitives::LIFECYCLE_EXTENSION,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum build plan size (16 MB).
const MAX_PLAN_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Import files can be larger since they contain the whole graph.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), GroveError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| GroveError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(GroveError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, GroveError> {
    let canonical = path.canonicalize().map_err(|e| {
        GroveError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(GroveError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, GroveError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        GroveError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(GroveError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| GroveError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_checked(path: &Path, max_size: u64) -> Result<Vec<u8>, GroveError> {
    let validated_path = validate_file_path(path)?;
    validate_file_size(&validated_path, max_size)?;
    std::fs::read(&validated_path).map_err(|e| GroveError::IoError(format!("Read file: {}", e)))
}

fn print_json(output: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(output).unwrap_or_default()
    );
}

// =============================================================================
// STORE SESSION
// =============================================================================

/// One opened store plus what is needed to persist it again.
///
/// The redb backend persists on its own. The volatile backend is loaded
/// from, and saved back to, a canonical export file at the database path.
#[derive(Debug)]
pub struct StoreSession {
    config: GroveConfig,
    registry: StoreRegistry,
    store: Arc<Store>,
    db_path: PathBuf,
    persistent: bool,
}

impl StoreSession {
    pub async fn open(
        db_path: &Path,
        backend: &str,
        config: Option<&Path>,
    ) -> Result<Self, GroveError> {
        let config = GroveConfig::load(config)?;

        let engines = EngineRegistry::new();
        let engine = engines.register(config.engine()?)?;
        engines.extend(
            engine.key(),
            LIFECYCLE_EXTENSION,
            Extension::Lifecycle(Arc::new(PlanLifecycle)),
        )?;

        let (backend, persistent): (Box<dyn Backend>, bool) = match backend {
            "redb" => (Box::new(RedbBackend::open(db_path)?), true),
            "volatile" => (Box::new(VolatileBackend::new()), false),
            other => {
                return Err(GroveError::InvalidValue {
                    path: "--backend".to_string(),
                    expected: format!("'volatile' or 'redb', got '{}'", other),
                });
            }
        };

        let registry = StoreRegistry::new();
        let store = registry.open_with_config(engine, backend, config.store.store_config());
        let session = Self {
            config,
            registry,
            store,
            db_path: db_path.to_path_buf(),
            persistent,
        };

        if !persistent && db_path.exists() {
            let data = read_checked(db_path, MAX_IMPORT_FILE_SIZE)?;
            session.restore(&data).await?;
        }
        Ok(session)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        if self.persistent { "redb" } else { "volatile" }
    }

    async fn restore(&self, data: &[u8]) -> Result<usize, GroveError> {
        let (header, canonical) = import_canonical(data)?;
        if header.engine != self.store.engine().key() {
            return Err(GroveError::InvalidRecord(format!(
                "export was written by engine '{}', not '{}'",
                header.engine,
                self.store.engine().key()
            )));
        }
        canonical.restore(&self.store).await
    }

    /// Persist the volatile store to its file. No-op for redb.
    pub async fn save(&self) -> Result<(), GroveError> {
        if self.persistent {
            return Ok(());
        }
        let data = export_canonical(&self.store).await?;
        std::fs::write(&self.db_path, &data)
            .map_err(|e| GroveError::IoError(format!("Write db: {}", e)))
    }

    /// Free every store of the session.
    pub fn close(&self) -> Result<(), GroveError> {
        self.registry.close()
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show store status.
pub async fn cmd_status(session: &StoreSession, json_mode: bool) -> Result<(), GroveError> {
    let store = session.store();
    let canonical = CanonicalGraph::from_store(store).await?;
    let engine = store.engine();

    if json_mode {
        print_json(&json!({
            "database": session.db_path.to_string_lossy(),
            "backend": session.backend_name(),
            "engine": engine.key(),
            "types": engine.type_names().map(|t| t.as_str()).collect::<Vec<_>>(),
            "node_count": canonical.nodes.len(),
            "edge_count": canonical.edges.len(),
            "checksum": canonical.checksum(),
        }));
        return Ok(());
    }

    println!("Grove Store Status");
    println!("==================");
    println!("Database: {:?}", session.db_path);
    println!("Backend:  {}", session.backend_name());
    println!("Engine:   {}", engine.key());
    println!();
    println!("Nodes:    {}", canonical.nodes.len());
    println!("Edges:    {}", canonical.edges.len());
    println!("Checksum: {}", canonical.checksum());

    Ok(())
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Build a graph from a JSON build plan.
pub async fn cmd_build(
    session: &StoreSession,
    json_mode: bool,
    plan: &Path,
) -> Result<(), GroveError> {
    tracing::info!("Building from {:?}", plan);
    let contents = read_checked(plan, MAX_PLAN_FILE_SIZE)?;
    let opts: Value = serde_json::from_slice(&contents)
        .map_err(|e| GroveError::SerializationError(format!("Plan: {}", e)))?;

    let store = session.store();
    let outcome = store.engine().build_from_store(opts, store).await?;
    session.save().await?;

    if json_mode {
        print_json(&outcome);
    } else {
        println!(
            "Built {} nodes under root '{}'",
            outcome["nodes"],
            outcome["root"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

// =============================================================================
// PUT / LINK COMMANDS
// =============================================================================

/// Insert or replace one node, checked against its type.
pub async fn cmd_put(
    session: &StoreSession,
    id: &str,
    type_name: &str,
    data: &str,
) -> Result<(), GroveError> {
    let data: Value = serde_json::from_str(data)
        .map_err(|e| GroveError::SerializationError(format!("Node data: {}", e)))?;
    let (id, type_name) = (NodeId::new(id), TypeName::new(type_name));

    session
        .store()
        .transact_graph(|ctx| {
            Box::pin(async move {
                ctx.create(id, type_name, data)?;
                Ok(())
            })
        })
        .await?;
    session.save().await?;
    println!("Stored node");
    Ok(())
}

/// Link two nodes. The subject must exist and declare the predicate.
pub async fn cmd_link(
    session: &StoreSession,
    subject: &str,
    predicate: &str,
    object: &str,
) -> Result<(), GroveError> {
    let subject = NodeId::new(subject);
    let object = NodeId::new(object);
    let predicate = predicate.to_string();

    session
        .store()
        .transact_graph(|ctx| {
            Box::pin(async move {
                if ctx.load(&subject).await?.is_none() {
                    return Err(GroveError::UnresolvedReference {
                        reference: subject.to_string(),
                        reason: "no such node".to_string(),
                    });
                }
                ctx.link(subject, predicate, object, Value::Null)
            })
        })
        .await?;
    session.save().await?;
    println!("Linked");
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// Materialize nodes and print their typed data.
pub async fn cmd_inspect(
    session: &StoreSession,
    json_mode: bool,
    type_name: Option<&str>,
    id: Option<&str>,
) -> Result<(), GroveError> {
    let type_name = type_name.map(TypeName::new);
    let mut ctx = session.store().new_context()?;

    match id {
        Some(id) => {
            if ctx.load(&NodeId::new(id)).await?.is_none() {
                println!("Node '{}' not found", id);
                return Ok(());
            }
        }
        None => {
            ctx.load_all(type_name.as_ref()).await?;
        }
    }

    let roots: Vec<&str> = ctx.roots().iter().map(|o| o.node_id().as_str()).collect();
    let mut rows = Vec::new();
    for object in ctx.objects() {
        if type_name.as_ref().is_some_and(|t| t != object.type_name()) {
            continue;
        }
        let refs = object.refs().await?;
        rows.push(json!({
            "id": object.node_id(),
            "type": object.type_name(),
            "behavior": object.behavior_name(),
            "root": roots.contains(&object.node_id().as_str()),
            "refs": refs.len(),
            "data": object.data(),
        }));
    }

    if json_mode {
        print_json(&Value::Array(rows));
        return Ok(());
    }

    println!("{} node(s)", rows.len());
    for row in &rows {
        let marker = if row["root"] == json!(true) { " (root)" } else { "" };
        println!(
            "  {} : {}{}",
            row["id"].as_str().unwrap_or_default(),
            row["type"].as_str().unwrap_or_default(),
            marker
        );
        println!("    {}", row["data"]);
    }
    Ok(())
}

// =============================================================================
// EDGES COMMAND
// =============================================================================

/// Query edges by predicate, optionally narrowed by subject and object.
pub async fn cmd_edges(
    session: &StoreSession,
    json_mode: bool,
    predicate: &str,
    subject: Option<String>,
    object: Option<String>,
) -> Result<(), GroveError> {
    let mut query = EdgeQuery::new(predicate);
    if let Some(subject) = subject {
        query = query.subject(subject);
    }
    if let Some(object) = object {
        query = query.object(object);
    }

    let mut edges = session.store().query_edges(&query).await?;
    let mut rows = Vec::with_capacity(edges.len());
    for edge in &mut edges {
        let data = edge.data().await?;
        let triple = edge.triple();
        rows.push(json!({
            "subject": triple.subject,
            "predicate": triple.predicate,
            "object": triple.object,
            "data": data,
        }));
    }

    if json_mode {
        print_json(&Value::Array(rows));
        return Ok(());
    }

    println!("{} edge(s) for '{}'", edges.len(), predicate);
    for edge in edges.iter().take(50) {
        println!("  {}", edge.triple());
    }
    if edges.len() > 50 {
        println!("  ... and {} more", edges.len() - 50);
    }
    Ok(())
}

// =============================================================================
// PUBLISH COMMAND
// =============================================================================

/// Parse `key=value` params. Values are JSON when they parse, strings
/// otherwise.
pub fn parse_params(params: &[String]) -> Result<Value, GroveError> {
    let mut out = serde_json::Map::new();
    for param in params {
        let (key, raw) = param.split_once('=').ok_or_else(|| GroveError::InvalidValue {
            path: param.clone(),
            expected: "key=value".to_string(),
        })?;
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        out.insert(key.to_string(), value);
    }
    Ok(Value::Object(out))
}

/// Print the current snapshot of a publication.
pub async fn cmd_publish(
    session: &StoreSession,
    json_mode: bool,
    name: &str,
    params: &[String],
) -> Result<(), GroveError> {
    let publication = session
        .config()
        .publication(name)
        .cloned()
        .unwrap_or_else(|| PublicationConfig::over(name));
    let filter = publication.to_filter()?;

    let store = Arc::clone(session.store());
    let mut live = filter.subscribe(
        move |source| store.node_snapshots(Some(TypeName::new(source))),
        parse_params(params)?,
    )?;
    let snapshot = live.next().await.unwrap_or_default();

    if json_mode {
        print_json(&Value::Array(snapshot));
        return Ok(());
    }

    println!("Publication '{}' ({} record(s))", filter.name(), snapshot.len());
    for record in &snapshot {
        println!("  {}", record);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Export the store.
pub async fn cmd_export(
    session: &StoreSession,
    output: &Path,
    format: &str,
) -> Result<(), GroveError> {
    let validated_output = validate_output_path(output)?;
    let store = session.store();

    let data = match format {
        "canonical" => export_canonical(store).await?,
        "json" => {
            let canonical = CanonicalGraph::from_store(store).await?;
            serde_json::to_vec_pretty(&canonical)
                .map_err(|e| GroveError::SerializationError(format!("JSON export: {}", e)))?
        }
        _ => {
            return Err(GroveError::SerializationError(format!(
                "Unknown format: {}",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| GroveError::IoError(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

/// Import a canonical export into the store.
pub async fn cmd_import(session: &StoreSession, input: &Path) -> Result<(), GroveError> {
    let data = read_checked(input, MAX_IMPORT_FILE_SIZE)?;
    let written = session.restore(&data).await?;
    session.save().await?;
    println!("Imported {} records", written);
    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Compute the BLAKE3 hash of the canonical export.
pub async fn cmd_hash(session: &StoreSession, json_mode: bool) -> Result<(), GroveError> {
    let hash = canonical_crypto_hash(session.store()).await?;

    if json_mode {
        print_json(&json!({ "algorithm": "blake3", "hash": hash }));
    } else {
        println!("BLAKE3: {}", hash);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_json_or_fall_back_to_strings() {
        let params = parse_params(&["price=12".to_string(), "name=lamp".to_string()])
            .expect("params");
        assert_eq!(params, json!({ "price": 12, "name": "lamp" }));
    }

    #[test]
    fn params_require_an_equals_sign() {
        assert!(matches!(
            parse_params(&["price".to_string()]),
            Err(GroveError::InvalidValue { .. })
        ));
    }

    #[test]
    fn output_path_without_parent_uses_current_dir() {
        let path = validate_output_path(Path::new("out.grvx")).expect("path");
        assert!(path.ends_with("out.grvx"));
    }
}
