//! Protocol operations over an open lattice.
//!
//! Each operation returns one JSON response object. One-shot commands and the
//! daemon share these, so both speak the same response shapes:
//!
//! ```text
//! {"ok": true, ...}
//! {"ok": false, "error": "<message>", "code": "<kind>"}
//! ```
//!
//! Values are returned as `"value"` when they are UTF-8 and as
//! `"value_base64"` otherwise.

use crate::error::{CliError, CliResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lattice_core::{Lattice, Node, NodeId, NodeKind, NodeLink, PAYLOAD_CAPACITY};
use serde_json::{json, Map, Value};

/// Builds the failure response for `err`.
pub fn error_response(err: &CliError) -> Value {
    json!({
        "ok": false,
        "error": err.to_string(),
        "code": err.code(),
    })
}

/// Inserts a value under `value` or `value_base64`.
fn put_value(obj: &mut Map<String, Value>, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(text) => obj.insert("value".into(), Value::String(text.to_string())),
        Err(_) => obj.insert("value_base64".into(), Value::String(BASE64.encode(bytes))),
    };
}

/// JSON view of a node record.
pub fn node_json(node: &Node) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), json!(node.id.as_u64()));
    obj.insert("name".into(), json!(node.name));
    obj.insert("kind".into(), json!(node.kind.to_string()));
    match node.link {
        NodeLink::Inline => put_value(&mut obj, &node.payload),
        NodeLink::ChunkHead {
            total_len,
            chunk_count,
        } => {
            obj.insert("chunked".into(), json!(true));
            obj.insert("total_len".into(), json!(total_len));
            obj.insert("chunk_count".into(), json!(chunk_count));
        }
        NodeLink::Chunk {
            parent_id,
            sequence_index,
        } => {
            obj.insert("parent_id".into(), json!(parent_id.as_u64()));
            obj.insert("sequence_index".into(), json!(sequence_index));
            put_value(&mut obj, &node.payload);
        }
    }
    Value::Object(obj)
}

/// Decodes a request value given as text or base64.
pub fn decode_value(text: Option<&str>, base64: Option<&str>) -> CliResult<Vec<u8>> {
    match (text, base64) {
        (Some(t), None) => Ok(t.as_bytes().to_vec()),
        (None, Some(b)) => BASE64
            .decode(b)
            .map_err(|e| CliError::BadRequest(format!("value_base64: {e}"))),
        (Some(_), Some(_)) => Err(CliError::BadRequest(
            "give either value or value_base64, not both".into(),
        )),
        (None, None) => Err(CliError::BadRequest("missing value".into())),
    }
}

/// Parses a kind given by name or number. Absent means primitive.
pub fn parse_kind(kind: Option<&str>) -> CliResult<NodeKind> {
    match kind {
        None => Ok(NodeKind::Primitive),
        Some(k) => NodeKind::parse(k).ok_or_else(|| CliError::BadRequest(format!("unknown kind {k:?}"))),
    }
}

/// Stores `bytes` under `key`, chunking when forced or when it does not fit
/// one record.
pub fn write(
    lattice: &Lattice,
    key: &str,
    bytes: &[u8],
    kind: NodeKind,
    force_chunked: bool,
) -> CliResult<Value> {
    let chunked = force_chunked || bytes.len() > PAYLOAD_CAPACITY;
    let id = if chunked {
        lattice.add_node_chunked(key, bytes, kind)?
    } else {
        lattice.add_node(key, bytes, kind)?
    };
    Ok(json!({
        "ok": true,
        "id": id.as_u64(),
        "chunked": chunked,
    }))
}

/// Full value of the newest node under `key`.
pub fn read(lattice: &Lattice, key: &str) -> CliResult<Value> {
    let node = lattice
        .get_by_name(key)?
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;
    let bytes = lattice
        .get_node_chunked(node.id)?
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;

    let mut obj = Map::new();
    obj.insert("ok".into(), json!(true));
    obj.insert("id".into(), json!(node.id.as_u64()));
    obj.insert("name".into(), json!(node.name));
    obj.insert("kind".into(), json!(node.kind.to_string()));
    put_value(&mut obj, &bytes);
    Ok(Value::Object(obj))
}

/// Record stored under `id`.
pub fn get(lattice: &Lattice, id: u64) -> CliResult<Value> {
    let node = lattice
        .get_node(NodeId::new(id))?
        .ok_or_else(|| CliError::NotFound(format!("node {id}")))?;
    Ok(json!({ "ok": true, "node": node_json(&node) }))
}

/// Reassembled payload stored under `id`.
pub fn read_chunked(lattice: &Lattice, id: u64) -> CliResult<Value> {
    let bytes = lattice
        .get_node_chunked(NodeId::new(id))?
        .ok_or_else(|| CliError::NotFound(format!("node {id}")))?;
    let mut obj = Map::new();
    obj.insert("ok".into(), json!(true));
    obj.insert("id".into(), json!(id));
    obj.insert("len".into(), json!(bytes.len()));
    put_value(&mut obj, &bytes);
    Ok(Value::Object(obj))
}

/// Newest node per name under `prefix`.
pub fn search(lattice: &Lattice, prefix: &str, limit: usize) -> CliResult<Value> {
    let nodes = lattice.find_by_prefix(prefix, limit)?;
    let results: Vec<Value> = nodes.iter().map(node_json).collect();
    Ok(json!({
        "ok": true,
        "count": results.len(),
        "results": results,
    }))
}

/// Counters, sizes and tier.
pub fn stats(lattice: &Lattice) -> CliResult<Value> {
    Ok(json!({
        "ok": true,
        "node_count": lattice.node_count(),
        "live_count": lattice.live_count(),
        "names": lattice.name_count(),
        "max_nodes": lattice.max_nodes(),
        "ceiling": lattice.ceiling(),
        "tier": lattice.tier().to_string(),
        "evaluation_mode": lattice.evaluation_mode(),
        "wal_bytes": lattice.wal_size()?,
        "stats": serde_json::to_value(StatsView::from(lattice.stats()))?,
    }))
}

#[derive(serde::Serialize)]
struct StatsView {
    adds: u64,
    chunked_adds: u64,
    reads: u64,
    prefix_queries: u64,
    index_keys_visited: u64,
    bytes_written: u64,
    bytes_read: u64,
    wal_entries_written: u64,
    wal_entries_replayed: u64,
    wal_entries_discarded: u64,
    corrupt_records_skipped: u64,
    tier_rejections: u64,
    capacity_rejections: u64,
    checkpoints: u64,
    saves: u64,
}

impl From<lattice_core::StatsSnapshot> for StatsView {
    fn from(s: lattice_core::StatsSnapshot) -> Self {
        Self {
            adds: s.adds,
            chunked_adds: s.chunked_adds,
            reads: s.reads,
            prefix_queries: s.prefix_queries,
            index_keys_visited: s.index_keys_visited,
            bytes_written: s.bytes_written,
            bytes_read: s.bytes_read,
            wal_entries_written: s.wal_entries_written,
            wal_entries_replayed: s.wal_entries_replayed,
            wal_entries_discarded: s.wal_entries_discarded,
            corrupt_records_skipped: s.corrupt_records_skipped,
            tier_rejections: s.tier_rejections,
            capacity_rejections: s.capacity_rejections,
            checkpoints: s.checkpoints,
            saves: s.saves,
        }
    }
}

/// Plain acknowledgement.
pub fn ack(op: &str) -> Value {
    json!({ "ok": true, "op": op })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::Config;

    fn lattice() -> Lattice {
        Lattice::open_in_memory(Config::default()).unwrap()
    }

    #[test]
    fn write_then_read() {
        let lattice = lattice();
        let written = write(&lattice, "P:a:1", b"a1", NodeKind::Pattern, false).unwrap();
        assert_eq!(written["id"], 1);
        assert_eq!(written["chunked"], false);

        let read = read(&lattice, "P:a:1").unwrap();
        assert_eq!(read["value"], "a1");
        assert_eq!(read["kind"], "pattern");
    }

    #[test]
    fn oversize_write_is_chunked() {
        let lattice = lattice();
        let text = "x".repeat(2000);
        let written = write(&lattice, "doc", text.as_bytes(), NodeKind::Learning, false).unwrap();
        assert_eq!(written["chunked"], true);
        assert_eq!(read(&lattice, "doc").unwrap()["value"], text);

        let head = get(&lattice, 1).unwrap();
        assert_eq!(head["node"]["chunk_count"], 4);
    }

    #[test]
    fn binary_values_use_base64() {
        let lattice = lattice();
        write(&lattice, "bin", &[0xFF, 0xFE], NodeKind::Primitive, false).unwrap();
        let read = read(&lattice, "bin").unwrap();
        assert_eq!(read["value_base64"], "//4=");
        assert!(read.get("value").is_none());
    }

    #[test]
    fn search_returns_newest_per_name() {
        let lattice = lattice();
        write(&lattice, "P:a:1", b"old", NodeKind::Primitive, false).unwrap();
        write(&lattice, "P:a:1", b"new", NodeKind::Primitive, false).unwrap();
        write(&lattice, "P:b:1", b"b1", NodeKind::Primitive, false).unwrap();

        let found = search(&lattice, "P:a:", 10).unwrap();
        assert_eq!(found["count"], 1);
        assert_eq!(found["results"][0]["value"], "new");
    }

    #[test]
    fn missing_key_is_not_found() {
        let err = read(&lattice(), "absent").unwrap_err();
        assert_eq!(err.code(), "not_found");
        let response = error_response(&err);
        assert_eq!(response["ok"], false);
        assert_eq!(response["code"], "not_found");
    }

    #[test]
    fn capacity_code_is_surfaced() {
        let lattice = Lattice::open_in_memory(Config::default().max_nodes(1)).unwrap();
        write(&lattice, "a", b"", NodeKind::Primitive, false).unwrap();
        let err = write(&lattice, "b", b"", NodeKind::Primitive, false).unwrap_err();
        assert_eq!(err.code(), "capacity_exceeded");
    }

    #[test]
    fn value_decoding() {
        assert_eq!(decode_value(Some("hi"), None).unwrap(), b"hi");
        assert_eq!(decode_value(None, Some("aGk=")).unwrap(), b"hi");
        assert!(decode_value(None, None).is_err());
        assert!(decode_value(Some("a"), Some("YQ==")).is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(parse_kind(None).unwrap(), NodeKind::Primitive);
        assert_eq!(parse_kind(Some("learning")).unwrap(), NodeKind::Learning);
        assert!(parse_kind(Some("nonsense")).is_err());
    }

    #[test]
    fn stats_report() {
        let lattice = lattice();
        write(&lattice, "a", b"1", NodeKind::Primitive, false).unwrap();
        let stats = stats(&lattice).unwrap();
        assert_eq!(stats["node_count"], 1);
        assert_eq!(stats["tier"], "free");
        assert_eq!(stats["stats"]["adds"], 1);
    }
}
