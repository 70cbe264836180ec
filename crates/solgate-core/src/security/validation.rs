use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::method_spec;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const VALID_ENCODINGS: &[&str] = &["base58", "base64", "base64+zstd", "jsonParsed"];
const VALID_COMMITMENTS: &[&str] = &["processed", "confirmed", "finalized"];
const MAX_FILTERS: usize = 4;
const MAX_LIMIT: u64 = 1000;

/// Bounds applied while sanitizing and validating parameters.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    pub max_param_bytes: usize,
    pub max_string_len: usize,
    pub max_depth: usize,
    pub max_accounts: usize,
    pub max_signatures: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_param_bytes: 65_536,
            max_string_len: 4_096,
            max_depth: 8,
            max_accounts: 100,
            max_signatures: 256,
        }
    }
}

/// Rejection reasons for caller input. None of these ever reach the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Method is not in the supported-method table.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Params are not a positional array.
    #[error("Params must be an array")]
    ParamsNotArray,

    #[error("Missing parameter {index} for {method}")]
    MissingParam { method: String, index: usize },

    #[error("Too many parameters for {method}: {count}")]
    TooManyParams { method: String, count: usize },

    /// Not a base58 string of 32..=44 characters.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Not a base58 string of 64..=88 characters.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid commitment: {0}")]
    InvalidCommitment(String),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Too many {field}: {count} (max {max})")]
    TooManyItems { field: &'static str, count: usize, max: usize },

    #[error("String parameter too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("Params too large: {size} bytes (max {max})")]
    ParamsTooLarge { size: usize, max: usize },

    #[error("Params nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// True when every character is in the base58 alphabet.
pub(crate) fn is_base58(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// Validates and sanitizes positional parameters against per-method schemas.
#[derive(Debug, Clone, Default)]
pub struct RequestValidator {
    limits: ValidationLimits,
}

impl RequestValidator {
    #[must_use]
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Sanitizes `params`, then checks them against the schema for `method`.
    ///
    /// Returns the sanitized parameters; `null` becomes an empty array.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for unsupported methods, malformed or unsafe input.
    pub fn validate(&self, method: &str, params: Value) -> Result<Value, ValidationError> {
        if method_spec(method).is_none() {
            return Err(ValidationError::MethodNotAllowed(method.to_string()));
        }

        let params = match params {
            Value::Null => Value::Array(Vec::new()),
            Value::Array(_) => params,
            _ => return Err(ValidationError::ParamsNotArray),
        };

        let sanitized = self.sanitize(params, 1)?;
        let size = serde_json::to_vec(&sanitized).map(|bytes| bytes.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_param_bytes {
            return Err(ValidationError::ParamsTooLarge { size, max: self.limits.max_param_bytes });
        }

        let items = sanitized.as_array().map(Vec::as_slice).unwrap_or_default();
        self.check_schema(method, items)?;
        Ok(sanitized)
    }

    /// Strips ASCII control characters and enforces string length and nesting depth.
    fn sanitize(&self, value: Value, depth: usize) -> Result<Value, ValidationError> {
        match value {
            Value::String(text) => Ok(Value::String(self.sanitize_str(&text)?)),
            Value::Array(items) => {
                self.check_depth(depth)?;
                items
                    .into_iter()
                    .map(|item| self.sanitize(item, depth + 1))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Value::Object(map) => {
                self.check_depth(depth)?;
                let mut clean = Map::with_capacity(map.len());
                for (key, item) in map {
                    clean.insert(self.sanitize_str(&key)?, self.sanitize(item, depth + 1)?);
                }
                Ok(Value::Object(clean))
            }
            other => Ok(other),
        }
    }

    fn sanitize_str(&self, text: &str) -> Result<String, ValidationError> {
        let clean: String = text.chars().filter(|c| !c.is_ascii_control()).collect();
        if clean.len() > self.limits.max_string_len {
            return Err(ValidationError::StringTooLong {
                len: clean.len(),
                max: self.limits.max_string_len,
            });
        }
        Ok(clean)
    }

    fn check_depth(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > self.limits.max_depth {
            return Err(ValidationError::NestingTooDeep(self.limits.max_depth));
        }
        Ok(())
    }

    fn check_schema(&self, method: &str, params: &[Value]) -> Result<(), ValidationError> {
        let required = |index: usize| {
            params
                .get(index)
                .ok_or_else(|| ValidationError::MissingParam { method: method.to_string(), index })
        };
        let max_params = |count: usize| {
            if params.len() > count {
                Err(ValidationError::TooManyParams {
                    method: method.to_string(),
                    count: params.len(),
                })
            } else {
                Ok(())
            }
        };

        match method {
            "getAccountInfo" |
            "getBalance" |
            "getProgramAccounts" |
            "getSignaturesForAddress" |
            "getTokenAccountBalance" |
            "getTokenSupply" |
            "getTokenLargestAccounts" => {
                max_params(2)?;
                validate_address(required(0)?)?;
                self.validate_optional_config(params.get(1))
            }
            "getMultipleAccounts" => {
                max_params(2)?;
                let addresses =
                    self.bounded_list(required(0)?, "addresses", self.limits.max_accounts)?;
                addresses.iter().try_for_each(validate_address)?;
                self.validate_optional_config(params.get(1))
            }
            "getSignatureStatuses" => {
                max_params(2)?;
                let signatures =
                    self.bounded_list(required(0)?, "signatures", self.limits.max_signatures)?;
                signatures.iter().try_for_each(validate_signature)?;
                self.validate_optional_config(params.get(1))
            }
            "getTokenAccountsByOwner" => {
                max_params(3)?;
                validate_address(required(0)?)?;
                validate_token_account_filter(required(1)?)?;
                self.validate_optional_config(params.get(2))
            }
            "getTransaction" => {
                max_params(2)?;
                validate_signature(required(0)?)?;
                self.validate_optional_config(params.get(1))
            }
            "sendTransaction" | "simulateTransaction" => {
                max_params(2)?;
                match required(0)?.as_str() {
                    Some(encoded) if !encoded.is_empty() => {}
                    _ => {
                        return Err(ValidationError::InvalidConfig(
                            "transaction must be an encoded string".to_string(),
                        ))
                    }
                }
                self.validate_optional_config(params.get(1))
            }
            "getMinimumBalanceForRentExemption" => {
                max_params(2)?;
                if required(0)?.as_u64().is_none() {
                    return Err(ValidationError::OutOfRange {
                        field: "dataLength",
                        value: params[0].to_string(),
                    });
                }
                self.validate_optional_config(params.get(1))
            }
            "getHealth" | "getVersion" => max_params(0),
            _ => {
                max_params(1)?;
                self.validate_optional_config(params.first())
            }
        }
    }

    fn bounded_list<'a>(
        &self,
        value: &'a Value,
        field: &'static str,
        max: usize,
    ) -> Result<&'a [Value], ValidationError> {
        let items = value.as_array().ok_or(ValidationError::ParamsNotArray)?;
        if items.is_empty() || items.len() > max {
            return Err(ValidationError::TooManyItems { field, count: items.len(), max });
        }
        Ok(items)
    }

    fn validate_optional_config(&self, config: Option<&Value>) -> Result<(), ValidationError> {
        let Some(config) = config else {
            return Ok(());
        };
        let Some(object) = config.as_object() else {
            return Err(ValidationError::InvalidConfig("config must be an object".to_string()));
        };

        if let Some(encoding) = object.get("encoding") {
            match encoding.as_str() {
                Some(encoding) if VALID_ENCODINGS.contains(&encoding) => {}
                _ => return Err(ValidationError::InvalidEncoding(encoding.to_string())),
            }
        }
        if let Some(commitment) = object.get("commitment") {
            match commitment.as_str() {
                Some(commitment) if VALID_COMMITMENTS.contains(&commitment) => {}
                _ => return Err(ValidationError::InvalidCommitment(commitment.to_string())),
            }
        }
        if let Some(limit) = object.get("limit") {
            match limit.as_u64() {
                Some(limit) if (1..=MAX_LIMIT).contains(&limit) => {}
                _ => {
                    return Err(ValidationError::OutOfRange {
                        field: "limit",
                        value: limit.to_string(),
                    });
                }
            }
        }
        for field in ["before", "until"] {
            if let Some(signature) = object.get(field) {
                validate_signature(signature)?;
            }
        }
        if let Some(slot) = object.get("minContextSlot") {
            if slot.as_u64().is_none() {
                return Err(ValidationError::OutOfRange {
                    field: "minContextSlot",
                    value: slot.to_string(),
                });
            }
        }
        if let Some(slice) = object.get("dataSlice") {
            let valid = slice.as_object().is_some_and(|slice| {
                slice.get("offset").and_then(Value::as_u64).is_some() &&
                    slice.get("length").and_then(Value::as_u64).is_some()
            });
            if !valid {
                return Err(ValidationError::InvalidConfig(
                    "dataSlice needs offset and length".into(),
                ));
            }
        }
        if let Some(filters) = object.get("filters") {
            validate_filters(filters)?;
        }
        Ok(())
    }
}

fn validate_address(value: &Value) -> Result<(), ValidationError> {
    match value.as_str() {
        Some(address) if (32..=44).contains(&address.len()) && is_base58(address) => Ok(()),
        _ => Err(ValidationError::InvalidAddress(value.to_string())),
    }
}

fn validate_signature(value: &Value) -> Result<(), ValidationError> {
    match value.as_str() {
        Some(signature) if (64..=88).contains(&signature.len()) && is_base58(signature) => Ok(()),
        _ => Err(ValidationError::InvalidSignature(value.to_string())),
    }
}

fn validate_token_account_filter(value: &Value) -> Result<(), ValidationError> {
    let object = value.as_object().ok_or_else(|| {
        ValidationError::InvalidFilter("expected {mint} or {programId}".to_string())
    })?;
    match (object.get("mint"), object.get("programId")) {
        (Some(address), None) | (None, Some(address)) => validate_address(address),
        _ => Err(ValidationError::InvalidFilter(
            "expected exactly one of mint or programId".into(),
        )),
    }
}

fn validate_filters(filters: &Value) -> Result<(), ValidationError> {
    let filters = filters
        .as_array()
        .ok_or_else(|| ValidationError::InvalidFilter("filters must be an array".to_string()))?;
    if filters.len() > MAX_FILTERS {
        return Err(ValidationError::TooManyItems {
            field: "filters",
            count: filters.len(),
            max: MAX_FILTERS,
        });
    }

    for filter in filters {
        let object = filter
            .as_object()
            .filter(|object| object.len() == 1)
            .ok_or_else(|| ValidationError::InvalidFilter(filter.to_string()))?;

        if let Some(size) = object.get("dataSize") {
            if size.as_u64().is_none() {
                return Err(ValidationError::InvalidFilter(format!("dataSize {size}")));
            }
        } else if let Some(memcmp) = object.get("memcmp") {
            let valid = memcmp.as_object().is_some_and(|memcmp| {
                memcmp.get("offset").and_then(Value::as_u64).is_some() &&
                    memcmp.get("bytes").and_then(Value::as_str).is_some_and(|bytes| {
                        !bytes.is_empty() &&
                            bytes.chars().all(|c| {
                                c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
                            })
                    })
            });
            if !valid {
                return Err(ValidationError::InvalidFilter(format!("memcmp {memcmp}")));
            }
        } else {
            return Err(ValidationError::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}
