use thiserror::Error;

/// Errors raised while turning definitions into layouts. None of these are recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("unknown type '{type_name}'")]
  UnknownType { type_name: String },

  #[error("missing type definitions: {}", .names.join(", "))]
  MissingTypes { names: Vec<String> },

  #[error("circular dependency between records: {}", .names.join(", "))]
  CircularDependency { names: Vec<String> },

  #[error("'{name}' is defined more than once")]
  DuplicateDefinition { name: String },

  #[error("record '{record}' has no field table and no resolved layout")]
  MissingFieldTable { record: String },

  #[error("record '{record}' declares field '{field}' more than once")]
  DuplicateField { record: String, field: String },

  #[error("invalid bitfield '{record}.{field}': {reason}")]
  InvalidBitfield { record: String, field: String, reason: String },

  #[error("invalid length for '{record}.{field}': {reason}")]
  InvalidLength { record: String, field: String, reason: String },

  #[error("invalid enum mapping for '{record}.{field}': {reason}")]
  InvalidEnumMapping { record: String, field: String, reason: String },

  #[error("invalid selector for '{record}.{field}': {reason}")]
  InvalidSelector { record: String, field: String, reason: String },

  #[error("invalid anonymous member '{record}.{field}': {reason}")]
  InvalidAnonymous { record: String, field: String, reason: String },

  #[error("enum '{enum_name}' has unsupported storage width {size}")]
  UnsupportedEnumWidth { enum_name: String, size: u64 },
}

/// The locally resolved layout disagrees with the compiled library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiSkewError {
  #[error(
    "STRUCTURE RATIONALITY CHECK FAILED!\nThe size of {type_name} ({local}) does not match the installed library's size ({native}).\n\nThis can cause serious faults - you will need to reinstall"
  )]
  SizeMismatch { type_name: String, local: u64, native: u64 },
}
