//! Host values read from a YAML values file
//!
//! Mappings become record initializers. Two single-key mappings are special:
//! `{ bytes: <hex or list> }` is a byte string and `{ pointer: <hex or list> }`
//! points at a byte buffer that lives for the whole command.

use anyhow::{anyhow, bail, Context as _, Result};
use cstruct_reflect::HostValue;
use serde_yml::Value;

/// Decoded YAML document together with the pointer buffers it needs.
pub struct ValueFile {
    document: Value,
    buffers: Vec<Vec<u8>>,
}

impl ValueFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        let document: Value = serde_yml::from_str(yaml).context("parsing values file")?;
        if !document.is_mapping() {
            bail!("values file must be a mapping of field names to values");
        }
        let mut buffers = Vec::new();
        collect_buffers(&document, &mut buffers)?;
        Ok(Self { document, buffers })
    }

    /// Field/value pairs borrowing this file's buffers.
    pub fn fields(&self) -> Result<Vec<(String, HostValue<'_>)>> {
        let mut next = 0;
        let Value::Mapping(mapping) = &self.document else {
            return Ok(Vec::new());
        };
        mapping
            .iter()
            .map(|(key, value)| {
                let key = key.as_str().ok_or_else(|| anyhow!("field names must be strings"))?;
                Ok((key.to_string(), self.to_host(value, &mut next)?))
            })
            .collect()
    }

    fn to_host(&self, value: &Value, next: &mut usize) -> Result<HostValue<'_>> {
        Ok(match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(number) => {
                if let Some(v) = number.as_i64() {
                    HostValue::Int(v)
                } else if let Some(v) = number.as_u64() {
                    HostValue::UInt(v)
                } else {
                    HostValue::Float(number.as_f64().unwrap_or_default())
                }
            }
            Value::String(text) => HostValue::Text(text.clone()),
            Value::Sequence(items) => HostValue::List(items.iter().map(|item| self.to_host(item, next)).collect::<Result<_>>()?),
            Value::Mapping(mapping) => match special(value) {
                Some(("bytes", inner)) => HostValue::Bytes(parse_bytes(inner)?),
                Some(("pointer", _)) => {
                    let buffer = self.buffers.get(*next).ok_or_else(|| anyhow!("pointer buffer missing"))?;
                    *next += 1;
                    HostValue::pointer(buffer.as_slice())
                }
                _ => {
                    let mut entries = Vec::new();
                    for (key, item) in mapping {
                        let key = key.as_str().ok_or_else(|| anyhow!("field names must be strings"))?;
                        entries.push((key.to_string(), self.to_host(item, next)?));
                    }
                    HostValue::map(entries)
                }
            },
            Value::Tagged(tagged) => self.to_host(&tagged.value, next)?,
        })
    }
}

/* `{ bytes: .. }` or `{ pointer: .. }` */
fn special(value: &Value) -> Option<(&str, &Value)> {
    let Value::Mapping(mapping) = value else {
        return None;
    };
    if mapping.len() != 1 {
        return None;
    }
    let (key, inner) = mapping.iter().next()?;
    match key.as_str()? {
        name @ ("bytes" | "pointer") => Some((name, inner)),
        _ => None,
    }
}

/* Same traversal order as `to_host`, so buffers line up with pointer sites */
fn collect_buffers(value: &Value, buffers: &mut Vec<Vec<u8>>) -> Result<()> {
    match value {
        Value::Sequence(items) => items.iter().try_for_each(|item| collect_buffers(item, buffers)),
        Value::Mapping(mapping) => match special(value) {
            Some(("pointer", inner)) => {
                buffers.push(parse_bytes(inner)?);
                Ok(())
            }
            Some(_) => Ok(()),
            None => mapping.values().try_for_each(|item| collect_buffers(item, buffers)),
        },
        Value::Tagged(tagged) => collect_buffers(&tagged.value, buffers),
        _ => Ok(()),
    }
}

/// Hex text (with or without `0x`, spaces ignored) or a list of byte values.
pub fn parse_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(text) => {
            let cleaned: String = text.trim_start_matches("0x").chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&cleaned).with_context(|| format!("invalid hex string '{}'", text))
        }
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| anyhow!("byte lists may only contain integers 0..=255"))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => bail!("expected hex string or list of bytes"),
    }
}
