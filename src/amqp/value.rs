use super::AmqpError;

/// AMQP 1.0 typed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmqpValue {
    ///
    Null,
    ///
    Boolean(bool),
    ///
    UInt(u32),
    ///
    ULong(u64),
    ///
    Long(i64),
    /// UTF-8 string
    String(String),
    /// ASCII symbolic name
    Symbol(String),
    ///
    Binary(Vec<u8>),
    ///
    List(Vec<AmqpValue>),
    /// Ordered key/value pairs
    Map(Vec<(AmqpValue, AmqpValue)>),
    /// Value tagged with a descriptor
    Described(Box<AmqpValue>, Box<AmqpValue>),
}

impl AmqpValue {
    /// Empty map
    pub fn map() -> Self {
        AmqpValue::Map(Vec::new())
    }

    /// Symbol value, fails for non-ASCII names
    pub fn symbol(name: impl Into<String>) -> Result<Self, AmqpError> {
        let name = name.into();
        if !name.is_ascii() {
            return Err(AmqpError::NonAsciiSymbol(name));
        }
        Ok(AmqpValue::Symbol(name))
    }

    ///
    pub fn string(value: impl Into<String>) -> Self {
        AmqpValue::String(value.into())
    }

    ///
    pub fn described(descriptor: AmqpValue, value: AmqpValue) -> Self {
        AmqpValue::Described(Box::new(descriptor), Box::new(value))
    }

    /// Name of the value's type, used in errors
    pub fn type_name(&self) -> &'static str {
        match self {
            AmqpValue::Null => "null",
            AmqpValue::Boolean(_) => "boolean",
            AmqpValue::UInt(_) => "uint",
            AmqpValue::ULong(_) => "ulong",
            AmqpValue::Long(_) => "long",
            AmqpValue::String(_) => "string",
            AmqpValue::Symbol(_) => "symbol",
            AmqpValue::Binary(_) => "binary",
            AmqpValue::List(_) => "list",
            AmqpValue::Map(_) => "map",
            AmqpValue::Described(..) => "described",
        }
    }

    fn mismatch(&self, expected: &'static str) -> AmqpError {
        AmqpError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// Insert or replace the entry for `key` in a map
    pub fn set_map_value(&mut self, key: AmqpValue, value: AmqpValue) -> Result<(), AmqpError> {
        match self {
            AmqpValue::Map(entries) => {
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(())
            }
            other => Err(other.mismatch("map")),
        }
    }

    /// Number of entries of a map
    pub fn map_pair_count(&self) -> Result<usize, AmqpError> {
        match self {
            AmqpValue::Map(entries) => Ok(entries.len()),
            other => Err(other.mismatch("map")),
        }
    }

    /// Key and value of the `index`th map entry
    pub fn map_key_value_pair(&self, index: usize) -> Result<(&AmqpValue, &AmqpValue), AmqpError> {
        let AmqpValue::Map(entries) = self else {
            return Err(self.mismatch("map"));
        };
        entries
            .get(index)
            .map(|(k, v)| (k, v))
            .ok_or(AmqpError::OutOfRange {
                index,
                len: entries.len(),
            })
    }

    /// Text of a string or symbol
    pub fn as_str(&self) -> Result<&str, AmqpError> {
        match self {
            AmqpValue::String(s) | AmqpValue::Symbol(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// The value wrapped by a described value
    pub fn inplace_described_value(&self) -> Result<&AmqpValue, AmqpError> {
        match self {
            AmqpValue::Described(_, value) => Ok(value),
            other => Err(other.mismatch("described")),
        }
    }

    ///
    pub fn is_null(&self) -> bool {
        matches!(self, AmqpValue::Null)
    }
}
