//! Typed read-only query surface.
//!
//! Paths are `/segment/segment/…`. Responses carry the rendered value plus
//! a type tag (`str`, `int`, `decimal`, `json`) in the info field so the
//! caller knows how to decode. Queries never mutate durable state; the
//! simulation path runs against a commit-locked fork.

use kura_common::{
    config::code_key,
    encoding::{decode_hex_json, render_typed, ValueKind},
};
use log::{debug, error};
use serde_json::{json, Value};

use super::{
    executor::compiler::{decode_manifest, Manifest},
    nonce::NonceLedger,
    processor::TxProcessor,
    simulator::simulate_tx,
    storage::StateStore,
};

pub const OK_CODE: u32 = 0;
pub const ERROR_CODE: u32 = 1;

/// Typed query response, transport-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub code: u32,
    pub key: String,
    pub value: Vec<u8>,
    /// Type tag of `value`.
    pub info: String,
    pub log: String,
}

impl QueryResult {
    fn ok(key: &str, value: Vec<u8>, kind: ValueKind) -> Self {
        QueryResult {
            code: OK_CODE,
            key: key.to_string(),
            value,
            info: kind.as_str().to_string(),
            log: String::new(),
        }
    }

    fn null(key: &str) -> Self {
        QueryResult {
            code: OK_CODE,
            key: key.to_string(),
            value: Vec::new(),
            info: String::new(),
            log: String::new(),
        }
    }

    fn error(log: impl Into<String>) -> Self {
        QueryResult {
            code: ERROR_CODE,
            key: String::new(),
            value: vec![0],
            info: String::new(),
            log: log.into(),
        }
    }
}

/// Borrowed view of everything the query surface may read.
pub struct QueryContext<'a> {
    pub store: &'a StateStore,
    pub ledger: &'a NonceLedger,
    pub processor: &'a TxProcessor,
    pub block_service_mode: bool,
}

/// Dispatch one query path.
pub fn handle_query(ctx: &QueryContext<'_>, path: &str) -> QueryResult {
    debug!("query {}", path);
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some(head) = parts.first() else {
        return QueryResult::error("Empty query path");
    };
    let arg = parts.get(1).copied().unwrap_or("");

    let outcome = match *head {
        "get" => query_get(ctx, arg),
        "health" => Ok(render(arg, Some(json!("OK")))),
        "ping" => Ok(render(arg, Some(json!({"status": "online"})))),
        "get_next_nonce" => query_next_nonce(ctx, arg),
        "contract" => query_contract(ctx, arg),
        "contract_methods" => query_contract_methods(ctx, arg),
        "contract_vars" => query_contract_vars(ctx, arg),
        "keys" if ctx.block_service_mode => query_keys(ctx, arg),
        "simulate_tx" if ctx.block_service_mode => query_simulate(ctx, arg),
        other => {
            let log = format!("Unknown query path: {}", other);
            error!("{}", log);
            return QueryResult::error(log);
        }
    };

    outcome.unwrap_or_else(|log| {
        error!("{}", log);
        QueryResult::error(log)
    })
}

fn render(key: &str, value: Option<Value>) -> QueryResult {
    match value {
        None => QueryResult::null(key),
        Some(value) => {
            let (bytes, kind) = render_typed(&value);
            QueryResult::ok(key, bytes, kind)
        }
    }
}

fn query_get(ctx: &QueryContext<'_>, key: &str) -> Result<QueryResult, String> {
    let value = ctx.store.get(key).map_err(|e| e.to_string())?;
    Ok(render(key, value))
}

fn query_next_nonce(ctx: &QueryContext<'_>, sender: &str) -> Result<QueryResult, String> {
    let next = ctx
        .ledger
        .peek_next(ctx.store, sender)
        .map_err(|e| e.to_string())?;
    Ok(render(sender, Some(json!(next))))
}

/// Contract interface source: submitted code from state, or the native
/// source for system contracts.
fn contract_source(ctx: &QueryContext<'_>, name: &str) -> Result<Option<String>, String> {
    if let Some(value) = ctx.store.get(&code_key(name)).map_err(|e| e.to_string())? {
        return Ok(value.as_str().map(str::to_string));
    }
    Ok(ctx
        .processor
        .executor()
        .registry()
        .contract(name)
        .map(|native| native.source.to_string()))
}

fn contract_manifest(ctx: &QueryContext<'_>, name: &str) -> Result<Option<Manifest>, String> {
    let compiled_key = kura_common::config::compiled_key(name);
    if let Some(value) = ctx.store.get(&compiled_key).map_err(|e| e.to_string())? {
        if let Some(hex_str) = value.as_str() {
            return decode_manifest(hex_str)
                .map(Some)
                .map_err(|e| format!("stored manifest for '{}' is corrupt: {}", name, e));
        }
    }
    Ok(ctx
        .processor
        .executor()
        .registry()
        .contract(name)
        .map(|native| native.manifest()))
}

fn query_contract(ctx: &QueryContext<'_>, name: &str) -> Result<QueryResult, String> {
    let source = contract_source(ctx, name)?;
    Ok(render(name, source.map(Value::String)))
}

fn query_contract_methods(ctx: &QueryContext<'_>, name: &str) -> Result<QueryResult, String> {
    let Some(manifest) = contract_manifest(ctx, name)? else {
        return Ok(QueryResult::null(name));
    };
    let methods = serde_json::to_value(&manifest.methods).map_err(|e| e.to_string())?;
    Ok(render(name, Some(json!({"methods": methods}))))
}

fn query_contract_vars(ctx: &QueryContext<'_>, name: &str) -> Result<QueryResult, String> {
    let Some(manifest) = contract_manifest(ctx, name)? else {
        return Ok(QueryResult::null(name));
    };
    let variables = serde_json::to_value(&manifest.variables).map_err(|e| e.to_string())?;
    Ok(render(name, Some(variables)))
}

fn query_keys(ctx: &QueryContext<'_>, prefix: &str) -> Result<QueryResult, String> {
    let scan_prefix = format!("{}{}", prefix, kura_common::config::INDEX_SEPARATOR);
    let keys = ctx
        .store
        .keys(&scan_prefix)
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter_map(|key| {
            key.strip_prefix(&scan_prefix)
                .map(str::to_string)
        })
        .collect::<Vec<String>>();
    Ok(render(prefix, Some(json!(keys))))
}

fn query_simulate(ctx: &QueryContext<'_>, raw_hex: &str) -> Result<QueryResult, String> {
    let document = decode_hex_json(raw_hex.as_bytes()).map_err(|e| e.to_string())?;
    let result =
        simulate_tx(ctx.store, ctx.processor, &document).map_err(|e| e.to_string())?;
    let value = serde_json::to_value(&result).map_err(|e| e.to_string())?;
    Ok(render(raw_hex, Some(value)))
}
