use crate::errors::AbiSkewError;
use crate::resolved::ResolvedRecord;
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Width assumed for types the library exports no size accessor for (a plain `int`).
pub const DEFAULT_PROBE_SIZE: u64 = 4;

/// Source of authoritative type sizes, usually the compiled native library.
pub trait SizeProbe {
  /// Size of `type_name` as compiled, or `None` when no accessor exists for it.
  fn probe_size(&self, type_name: &str) -> Option<u64>;
}

impl<T: SizeProbe + ?Sized> SizeProbe for &T {
  fn probe_size(&self, type_name: &str) -> Option<u64> {
    (**self).probe_size(type_name)
  }
}

impl<T: SizeProbe + ?Sized> SizeProbe for Box<T> {
  fn probe_size(&self, type_name: &str) -> Option<u64> {
    (**self).probe_size(type_name)
  }
}

/// Probe that knows nothing; every lookup falls back to the default width.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl SizeProbe for NoProbe {
  fn probe_size(&self, _type_name: &str) -> Option<u64> {
    None
  }
}

/// Static `type name -> size` table, typically loaded from a YAML file captured from a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeTable {
  sizes: IndexMap<String, u64>,
}

impl SizeTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, type_name: impl Into<String>, size: u64) -> Option<u64> {
    self.sizes.insert(type_name.into(), size)
  }

  pub fn get(&self, type_name: &str) -> Option<u64> {
    self.sizes.get(type_name).copied()
  }

  pub fn len(&self) -> usize {
    self.sizes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sizes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
    self.sizes.iter().map(|(name, size)| (name.as_str(), *size))
  }
}

impl<S: Into<String>> FromIterator<(S, u64)> for SizeTable {
  fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
    Self { sizes: iter.into_iter().map(|(name, size)| (name.into(), size)).collect() }
  }
}

impl SizeProbe for SizeTable {
  fn probe_size(&self, type_name: &str) -> Option<u64> {
    self.get(type_name)
  }
}

/// Name of the accessor the native library exports for `type_name`.
pub fn size_symbol(type_name: &str) -> String {
  format!("{}_size", type_name)
}

pub fn probe_or_default(probe: &dyn SizeProbe, type_name: &str) -> u64 {
  match probe.probe_size(type_name) {
    Some(size) => {
      debug!(type_name, size, "probed native size");
      size
    }
    None => {
      warn!(type_name, fallback = DEFAULT_PROBE_SIZE, "no native size accessor, using fallback width");
      DEFAULT_PROBE_SIZE
    }
  }
}

/// Declared size override first, then the probe, then the fallback width.
pub fn authoritative_size(record: &ResolvedRecord, probe: &dyn SizeProbe) -> u64 {
  match record.size_override {
    Some(size) => size,
    None => probe_or_default(probe, &record.name),
  }
}

/// Compares the resolved layout with the authoritative size and returns that size when they agree.
pub fn check_rationality(record: &ResolvedRecord, probe: &dyn SizeProbe) -> Result<u64, AbiSkewError> {
  let native = authoritative_size(record, probe);
  if native != record.size {
    return Err(AbiSkewError::SizeMismatch { type_name: record.name.clone(), local: record.size, native });
  }
  debug!(type_name = %record.name, size = native, "rationality check passed");
  Ok(native)
}
