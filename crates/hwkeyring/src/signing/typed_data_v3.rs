//! EIP-712 struct hashing the way version 3 encodes it.
//!
//! Fields missing from a value are left out of its encoding, and array types are only refused
//! when a value for them is actually present.

use crate::errors::{KeyringError, KeyringResult};
use alloy::{
    dyn_abi::DynSolType,
    primitives::{keccak256, B256},
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

const DOMAIN_TYPE: &str = "EIP712Domain";

fn invalid(msg: impl Into<String>) -> KeyringError {
    KeyringError::InvalidTypedData(msg.into())
}

struct Field<'a> {
    name: &'a str,
    ty: &'a str,
}

#[derive(Clone, Copy)]
struct Types<'a>(&'a Map<String, Value>);

impl<'a> Types<'a> {
    fn is_struct(self, ty: &str) -> bool {
        self.0.contains_key(ty)
    }

    fn fields(self, ty: &str) -> KeyringResult<Vec<Field<'a>>> {
        let types: &'a Map<String, Value> = self.0;
        let Some(list) = types.get(ty) else {
            // The domain type may be left undeclared.
            if ty == DOMAIN_TYPE {
                return Ok(Vec::new());
            }
            return Err(invalid(format!("unknown type {ty}")));
        };
        let list = list
            .as_array()
            .ok_or_else(|| invalid(format!("fields of {ty} must be an array")))?;
        list.iter()
            .map(|f| {
                let name = f.get("name").and_then(Value::as_str);
                let field_ty = f.get("type").and_then(Value::as_str);
                match (name, field_ty) {
                    (Some(name), Some(field_ty)) => Ok(Field { name, ty: field_ty }),
                    _ => Err(invalid(format!("malformed field in {ty}"))),
                }
            })
            .collect()
    }

    fn collect_dependencies(self, ty: &str, found: &mut BTreeSet<String>) -> KeyringResult<()> {
        if found.contains(ty) || !self.is_struct(ty) {
            return Ok(());
        }
        found.insert(ty.to_owned());
        for f in self.fields(ty)? {
            self.collect_dependencies(base_type(f.ty), found)?;
        }
        Ok(())
    }

    /// `Primary(type name,...)` followed by every referenced struct, sorted by name.
    fn encode_type(self, primary: &str) -> KeyringResult<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(primary, &mut deps)?;
        deps.remove(primary);

        let mut out = String::new();
        for ty in std::iter::once(primary).chain(deps.iter().map(String::as_str)) {
            let members: Vec<String> = self
                .fields(ty)?
                .iter()
                .map(|f| format!("{} {}", f.ty, f.name))
                .collect();
            out.push_str(ty);
            out.push('(');
            out.push_str(&members.join(","));
            out.push(')');
        }
        Ok(out)
    }

    fn hash_struct(self, ty: &str, value: &Value) -> KeyringResult<B256> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid(format!("value of {ty} must be an object")))?;
        let fields = self.fields(ty)?;
        let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
        encoded.extend_from_slice(keccak256(self.encode_type(ty)?.as_bytes()).as_slice());
        for f in &fields {
            let Some(v) = obj.get(f.name) else {
                continue;
            };
            encoded.extend_from_slice(self.encode_field(f, v)?.as_slice());
        }
        Ok(keccak256(encoded))
    }

    fn encode_field(self, f: &Field<'_>, value: &Value) -> KeyringResult<B256> {
        if self.is_struct(f.ty) {
            return self.hash_struct(f.ty, value);
        }
        match f.ty {
            "string" => match value {
                Value::Null => Ok(keccak256(b"")),
                Value::String(s) => Ok(keccak256(s.as_bytes())),
                other => Err(invalid(format!("{}: expected a string, got {other}", f.name))),
            },
            "bytes" => match value {
                Value::String(s) => Ok(keccak256(dynamic_bytes(s))),
                other => Err(invalid(format!("{}: expected bytes, got {other}", f.name))),
            },
            ty if ty.ends_with(']') => Err(invalid(format!(
                "{} has array type {ty}, which V3 cannot encode; use V4",
                f.name
            ))),
            ty => {
                let sol = DynSolType::parse(ty).map_err(|e| invalid(e.to_string()))?;
                let v = sol
                    .coerce_json(value)
                    .map_err(|e| invalid(format!("{}: {e}", f.name)))?;
                v.as_word()
                    .ok_or_else(|| invalid(format!("{}: {ty} is not a single-word type", f.name)))
            }
        }
    }
}

fn base_type(ty: &str) -> &str {
    ty.split('[').next().unwrap_or(ty)
}

/// `0x` hex is decoded; anything else is taken as UTF-8.
fn dynamic_bytes(s: &str) -> Vec<u8> {
    s.strip_prefix("0x")
        .and_then(|h| hex::decode(h).ok())
        .unwrap_or_else(|| s.as_bytes().to_vec())
}

/// `(domain separator, message struct hash)` of sanitized typed data.
pub fn hashes(data: &Value) -> KeyringResult<(B256, B256)> {
    let types = data
        .get("types")
        .and_then(Value::as_object)
        .map(Types)
        .ok_or_else(|| invalid("missing types"))?;
    let primary = data
        .get("primaryType")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing primaryType"))?;
    let domain = data.get("domain").ok_or_else(|| invalid("missing domain"))?;
    let message = data.get("message").ok_or_else(|| invalid("missing message"))?;

    Ok((
        types.hash_struct(DOMAIN_TYPE, domain)?,
        types.hash_struct(primary, message)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use serde_json::json;

    fn ping(message: Value) -> Value {
        json!({
            "types": {
                "EIP712Domain": [ { "name": "name", "type": "string" } ],
                "Ping": [
                    { "name": "n", "type": "uint256" },
                    { "name": "note", "type": "string" }
                ]
            },
            "primaryType": "Ping",
            "domain": { "name": "test" },
            "message": message
        })
    }

    #[test]
    fn missing_fields_are_skipped() -> eyre::Result<()> {
        let (_, message) = hashes(&ping(json!({ "n": 1 })))?;

        let mut expected = keccak256("Ping(uint256 n,string note)").to_vec();
        expected.extend_from_slice(&U256::from(1_u64).to_be_bytes::<32>());
        assert_eq!(message, keccak256(expected));
        Ok(())
    }

    #[test]
    fn arrays_fail_only_when_present() -> eyre::Result<()> {
        let mut data = ping(json!({ "n": 1 }));
        data["types"]["Ping"][1] = json!({ "name": "tags", "type": "string[]" });
        hashes(&data)?;

        data["message"]["tags"] = json!(["a"]);
        assert!(matches!(hashes(&data), Err(KeyringError::InvalidTypedData(_))));
        Ok(())
    }

    #[test]
    fn dependencies_are_sorted_after_the_primary_type() -> eyre::Result<()> {
        let types = json!({
            "Mail": [
                { "name": "to", "type": "Person" },
                { "name": "attachment", "type": "Blob" }
            ],
            "Person": [ { "name": "name", "type": "string" } ],
            "Blob": [ { "name": "data", "type": "bytes" } ]
        });
        let types = types.as_object().map(Types).ok_or_else(|| eyre::eyre!("not an object"))?;
        assert_eq!(
            types.encode_type("Mail")?,
            "Mail(Person to,Blob attachment)Blob(bytes data)Person(string name)"
        );
        Ok(())
    }
}
