//! Contract interface compilation.
//!
//! A contract's `__code__` cell holds its interface source: a small
//! line-oriented declaration of state variables and exported methods.
//! Compilation parses that source into a [`Manifest`] and serializes it
//! deterministically; the hex form is what lands in `__compiled__`.
//! The executable body of a contract is native and registered in the
//! runtime registry; the interface is the part that travels through state,
//! genesis and patches.
//!
//! Grammar, one declaration per line (blank lines and `#` comments skipped):
//!
//! ```text
//! var balances: hash
//! @export
//! fn transfer(amount: decimal, to: str)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("compiled manifest is not valid hex")]
    BadCompiledHex,

    #[error("compiled manifest does not decode: {0}")]
    BadCompiledManifest(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodArg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub arguments: Vec<MethodArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Parsed interface of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub contract: String,
    pub methods: Vec<MethodDef>,
    pub variables: Vec<VarDef>,
}

const VALUE_KINDS: [&str; 6] = ["str", "int", "decimal", "bool", "json", "hash"];

/// Parse interface source into a manifest.
pub fn parse_interface(contract: &str, source: &str) -> Result<Manifest, CompileError> {
    let mut methods = Vec::new();
    let mut variables = Vec::new();
    let mut export_pending = false;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line == "@export" {
            if export_pending {
                return Err(parse_err(line_no, "duplicate @export"));
            }
            export_pending = true;
            continue;
        }

        if let Some(rest) = line.strip_prefix("var ") {
            if export_pending {
                return Err(parse_err(line_no, "@export must precede a fn declaration"));
            }
            let (name, kind) = rest
                .split_once(':')
                .ok_or_else(|| parse_err(line_no, "expected 'var <name>: <type>'"))?;
            let name = name.trim();
            let kind = kind.trim();
            if !is_identifier(name) {
                return Err(parse_err(line_no, "invalid variable name"));
            }
            if !VALUE_KINDS.contains(&kind) {
                return Err(parse_err(line_no, "unknown variable type"));
            }
            variables.push(VarDef {
                name: name.to_string(),
                kind: kind.to_string(),
            });
            continue;
        }

        if let Some(rest) = line.strip_prefix("fn ") {
            if !export_pending {
                return Err(parse_err(line_no, "fn declaration without @export"));
            }
            export_pending = false;
            methods.push(parse_method(line_no, rest)?);
            continue;
        }

        return Err(parse_err(line_no, "unrecognized declaration"));
    }

    if export_pending {
        return Err(CompileError::Parse {
            line: source.lines().count(),
            message: "trailing @export with no fn".into(),
        });
    }

    Ok(Manifest {
        contract: contract.to_string(),
        methods,
        variables,
    })
}

fn parse_method(line_no: usize, rest: &str) -> Result<MethodDef, CompileError> {
    let open = rest
        .find('(')
        .ok_or_else(|| parse_err(line_no, "expected '(' in fn declaration"))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| parse_err(line_no, "expected ')' in fn declaration"))?;
    if close < open {
        return Err(parse_err(line_no, "mismatched parentheses"));
    }

    let name = rest[..open].trim();
    if !is_identifier(name) {
        return Err(parse_err(line_no, "invalid fn name"));
    }

    let args_str = rest[open + 1..close].trim();
    let mut arguments = Vec::new();
    if !args_str.is_empty() {
        for part in args_str.split(',') {
            let (arg_name, kind) = part
                .split_once(':')
                .ok_or_else(|| parse_err(line_no, "expected '<name>: <type>' argument"))?;
            let arg_name = arg_name.trim();
            let kind = kind.trim();
            if !is_identifier(arg_name) {
                return Err(parse_err(line_no, "invalid argument name"));
            }
            if !VALUE_KINDS.contains(&kind) {
                return Err(parse_err(line_no, "unknown argument type"));
            }
            arguments.push(MethodArg {
                name: arg_name.to_string(),
                kind: kind.to_string(),
            });
        }
    }

    Ok(MethodDef {
        name: name.to_string(),
        arguments,
    })
}

fn parse_err(line: usize, message: &str) -> CompileError {
    CompileError::Parse {
        line,
        message: message.to_string(),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Compile interface source to the hex manifest stored at `__compiled__`.
/// Same source, same bytes, on every node.
pub fn compile_interface(contract: &str, source: &str) -> Result<String, CompileError> {
    let manifest = parse_interface(contract, source)?;
    let json = serde_json::to_string(&manifest)
        .map_err(|e| CompileError::BadCompiledManifest(e.to_string()))?;
    Ok(hex::encode(json.as_bytes()))
}

/// Decode a `__compiled__` hex manifest.
pub fn decode_manifest(compiled_hex: &str) -> Result<Manifest, CompileError> {
    let bytes = hex::decode(compiled_hex).map_err(|_| CompileError::BadCompiledHex)?;
    serde_json::from_slice(&bytes).map_err(|e| CompileError::BadCompiledManifest(e.to_string()))
}
