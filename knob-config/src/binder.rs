//! Binding of configuration sections onto serde types.
//!
//! Binding is an overlay: the target is serialized, the section subtree is merged on
//! top of it and the result is deserialized back. Fields that the section does not
//! mention keep their current values.
//!
//! Configuration leaves are strings, so the deserializer parses scalars on demand.
//! Keys match struct fields ignoring ASCII case and underscores, so `MaxRetries`,
//! `maxretries` and `max_retries` all bind to a `max_retries` field.

use std::any::type_name;
use std::fmt::Display;

use serde::de::value::StringDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    VariantAccess, Visitor,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConfigurationSection, KEY_DELIMITER};

/// Settings of the binding process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderOptions {
    /// Fail when a configuration key matches no field of the target struct.
    pub error_on_unknown_configuration: bool,
}

impl BinderOptions {
    /// Sets whether unknown configuration keys fail the binding.
    pub fn with_error_on_unknown_configuration(mut self, value: bool) -> Self {
        self.error_on_unknown_configuration = value;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Cannot bind {value:?} at {path:?}: expected {expected}")]
    InvalidValue {
        path: String,
        value: String,
        expected: &'static str,
    },
    #[error("Configuration key {path:?} does not match any field")]
    UnknownKey { path: String },
    #[error("Cannot bind configuration at {path:?}: {message}")]
    Message { path: String, message: String },
    #[error("Cannot serialize current value: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl de::Error for BindError {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        BindError::Message {
            path: String::new(),
            message: msg.to_string(),
        }
    }
}

/// Binds `section` onto `target`.
///
/// # Examples
///
/// ```rust
/// use knob_config::{BinderOptions, Configuration, bind};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct Retry {
///     max_attempts: u32,
///     backoff_ms: u64,
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Configuration::from_pairs([("Retry:MaxAttempts", "5")]);
/// let mut retry = Retry { max_attempts: 1, backoff_ms: 250 };
/// bind(&config.section("Retry"), &mut retry, &BinderOptions::default())?;
/// assert_eq!(retry.max_attempts, 5);
/// assert_eq!(retry.backoff_ms, 250);
/// # Ok(())
/// # }
/// ```
pub fn bind<T>(
    section: &ConfigurationSection,
    target: &mut T,
    options: &BinderOptions,
) -> Result<(), BindError>
where
    T: Serialize + DeserializeOwned,
{
    tracing::trace!(
        options = type_name::<T>(),
        section = section.path(),
        "Binding configuration"
    );
    let overlay = section.to_value();
    if overlay.is_null() {
        return Ok(());
    }
    let current = serde_json::to_value(&*target)?;
    let merged = merge_value(current, overlay);
    let binder = ValueBinder {
        value: merged,
        path: section.path().to_string(),
        options,
    };
    *target = T::deserialize(binder).map_err(|err| match err {
        BindError::Message { path, message } if path.is_empty() => BindError::Message {
            path: section.path().to_string(),
            message,
        },
        err => err,
    })?;
    Ok(())
}

/// Binds `section` onto `T::default()`.
pub fn get<T>(section: &ConfigurationSection, options: &BinderOptions) -> Result<T, BindError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut value = T::default();
    bind(section, &mut value, options)?;
    Ok(value)
}

/// Compares keys ignoring ASCII case and underscores.
fn keys_match(a: &str, b: &str) -> bool {
    let mut a = a.bytes().filter(|c| *c != b'_');
    let mut b = b.bytes().filter(|c| *c != b'_');
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x.eq_ignore_ascii_case(&y) => continue,
            _ => return false,
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Returns the indices of an object whose keys are all numeric.
fn numeric_keys(map: &Map<String, Value>) -> Option<Vec<usize>> {
    map.keys().map(|k| k.parse::<usize>().ok()).collect()
}

/// Overlays `overlay` on top of `base`.
///
/// Scalars never replace sections, and empty scalars never replace non-string values.
fn merge_value(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (base, Value::Null) => base,
        (base @ (Value::Object(_) | Value::Array(_)), Value::String(_)) => base,
        (base, Value::String(s)) if s.is_empty() && !base.is_string() => base,
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let existing = base.keys().find(|k| keys_match(k, &key)).cloned();
                match existing {
                    Some(existing) => {
                        // The configured spelling replaces the serialized one.
                        let current = base.remove(&existing).unwrap_or(Value::Null);
                        base.insert(key, merge_value(current, value));
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Object(overlay)) => match numeric_keys(&overlay) {
            Some(indices) => {
                let mut entries: Vec<(usize, Value)> =
                    indices.into_iter().zip(overlay.into_iter().map(|(_, v)| v)).collect();
                entries.sort_by_key(|(index, _)| *index);
                // Indices past the end are appended in order, without gaps.
                for (index, value) in entries {
                    match base.get_mut(index) {
                        Some(current) => *current = merge_value(std::mem::take(current), value),
                        None => base.push(value),
                    }
                }
                Value::Array(base)
            }
            None => Value::Object(overlay),
        },
        (_, overlay) => overlay,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}{KEY_DELIMITER}{key}")
    }
}

struct ValueBinder<'a> {
    value: Value,
    path: String,
    options: &'a BinderOptions,
}

impl<'a> ValueBinder<'a> {
    fn invalid(&self, expected: &'static str) -> BindError {
        BindError::InvalidValue {
            path: self.path.clone(),
            value: describe(&self.value),
            expected,
        }
    }

    /// Converts an array, or an object keyed by indices, into sequence items.
    fn into_items(self) -> Result<SeqBinder<'a>, BindError> {
        let items = match self.value {
            Value::Array(items) => items,
            Value::Object(map) => {
                let Some(indices) = numeric_keys(&map) else {
                    return Err(BindError::InvalidValue {
                        path: self.path,
                        value: Value::Object(map).to_string(),
                        expected: "a sequence",
                    });
                };
                let mut entries: Vec<(usize, Value)> =
                    indices.into_iter().zip(map.into_iter().map(|(_, v)| v)).collect();
                entries.sort_by_key(|(index, _)| *index);
                entries.into_iter().map(|(_, v)| v).collect()
            }
            ref value if is_empty(value) => Vec::new(),
            value => {
                return Err(BindError::InvalidValue {
                    path: self.path,
                    value: describe(&value),
                    expected: "a sequence",
                });
            }
        };
        Ok(SeqBinder {
            items: items.into_iter().enumerate(),
            path: self.path,
            options: self.options,
        })
    }

    fn into_entries(
        self,
        fields: Option<&'static [&'static str]>,
    ) -> Result<MapBinder<'a>, BindError> {
        let map = match self.value {
            Value::Object(map) => map,
            ref value if is_empty(value) => Map::new(),
            value => {
                return Err(BindError::InvalidValue {
                    path: self.path,
                    value: describe(&value),
                    expected: "a section",
                });
            }
        };
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let field = match fields {
                Some(fields) => match fields.iter().find(|f| keys_match(f, &key)) {
                    Some(field) => field.to_string(),
                    None if self.options.error_on_unknown_configuration => {
                        return Err(BindError::UnknownKey {
                            path: child_path(&self.path, &key),
                        });
                    }
                    None => key.clone(),
                },
                None => key.clone(),
            };
            entries.push((field, key, value));
        }
        Ok(MapBinder {
            entries: entries.into_iter(),
            pending: None,
            path: self.path,
            options: self.options,
        })
    }
}

macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V>(self, visitor: V) -> Result<V::Value, BindError>
        where
            V: Visitor<'de>,
        {
            let parsed = match &self.value {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .or_else(|| n.as_u64().and_then(|v| <$ty>::try_from(v).ok())),
                Value::String(s) => s.trim().parse::<$ty>().ok(),
                _ => None,
            };
            match parsed {
                Some(v) => visitor.$visit(v),
                None => Err(self.invalid(stringify!($ty))),
            }
        }
    };
}

macro_rules! deserialize_float {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V>(self, visitor: V) -> Result<V::Value, BindError>
        where
            V: Visitor<'de>,
        {
            let parsed = match &self.value {
                Value::Number(n) => n.as_f64().map(|v| v as $ty),
                Value::String(s) => s.trim().parse::<$ty>().ok(),
                _ => None,
            };
            match parsed {
                Some(v) => visitor.$visit(v),
                None => Err(self.invalid(stringify!($ty))),
            }
        }
    };
}

impl<'de> de::Deserializer<'de> for ValueBinder<'_> {
    type Error = BindError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::Number(ref n) => {
                if let Some(v) = n.as_u64() {
                    visitor.visit_u64(v)
                } else if let Some(v) = n.as_i64() {
                    visitor.visit_i64(v)
                } else if let Some(v) = n.as_f64() {
                    visitor.visit_f64(v)
                } else {
                    Err(self.invalid("a number"))
                }
            }
            Value::String(v) => visitor.visit_string(v),
            Value::Array(_) => visitor.visit_seq(self.into_items()?),
            Value::Object(_) => visitor.visit_map(self.into_entries(None)?),
        }
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        match &self.value {
            Value::Bool(v) => visitor.visit_bool(*v),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => visitor.visit_bool(true),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => {
                visitor.visit_bool(false)
            }
            _ => Err(self.invalid("a boolean")),
        }
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8);
    deserialize_integer!(deserialize_i16, visit_i16, i16);
    deserialize_integer!(deserialize_i32, visit_i32, i32);
    deserialize_integer!(deserialize_i64, visit_i64, i64);
    deserialize_integer!(deserialize_u8, visit_u8, u8);
    deserialize_integer!(deserialize_u16, visit_u16, u16);
    deserialize_integer!(deserialize_u32, visit_u32, u32);
    deserialize_integer!(deserialize_u64, visit_u64, u64);
    deserialize_float!(deserialize_f32, visit_f32, f32);
    deserialize_float!(deserialize_f64, visit_f64, f64);

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        if let Value::String(s) = &self.value {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return visitor.visit_char(c);
            }
        }
        Err(self.invalid("a character"))
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::String(v) => visitor.visit_string(v),
            Value::Null => visitor.visit_string(String::new()),
            Value::Bool(v) => visitor.visit_string(v.to_string()),
            Value::Number(v) => visitor.visit_string(v.to_string()),
            _ => Err(self.invalid("a string")),
        }
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::String(v) => visitor.visit_byte_buf(v.into_bytes()),
            _ => self.deserialize_seq(visitor),
        }
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        if is_empty(&self.value) {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(self.into_items()?)
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(self.into_entries(None)?)
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(self.into_entries(Some(fields))?)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        let (variant, content) = match self.value {
            Value::String(ref s) => (s.trim().to_string(), None),
            Value::Object(ref map) if map.len() == 1 => match map.iter().next() {
                Some((key, value)) => (key.clone(), Some(value.clone())),
                None => return Err(self.invalid("an enum variant")),
            },
            _ => return Err(self.invalid("an enum variant")),
        };
        let variant = variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(&variant))
            .map_or(variant, |v| v.to_string());
        let path = match content {
            Some(_) => child_path(&self.path, &variant),
            None => self.path,
        };
        visitor.visit_enum(EnumBinder {
            variant,
            content: content.unwrap_or(Value::Null),
            path,
            options: self.options,
        })
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }
}

struct SeqBinder<'a> {
    items: std::iter::Enumerate<std::vec::IntoIter<Value>>,
    path: String,
    options: &'a BinderOptions,
}

impl<'de> SeqAccess<'de> for SeqBinder<'_> {
    type Error = BindError;

    fn next_element_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, BindError>
    where
        S: DeserializeSeed<'de>,
    {
        let Some((index, value)) = self.items.next() else {
            return Ok(None);
        };
        seed.deserialize(ValueBinder {
            value,
            path: child_path(&self.path, &index.to_string()),
            options: self.options,
        })
        .map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct MapBinder<'a> {
    // (key given to the visitor, key as configured, value)
    entries: std::vec::IntoIter<(String, String, Value)>,
    pending: Option<(String, Value)>,
    path: String,
    options: &'a BinderOptions,
}

impl<'de> MapAccess<'de> for MapBinder<'_> {
    type Error = BindError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, BindError>
    where
        K: DeserializeSeed<'de>,
    {
        let Some((field, key, value)) = self.entries.next() else {
            return Ok(None);
        };
        self.pending = Some((key, value));
        let field: StringDeserializer<BindError> = field.into_deserializer();
        seed.deserialize(field).map(Some)
    }

    fn next_value_seed<S>(&mut self, seed: S) -> Result<S::Value, BindError>
    where
        S: DeserializeSeed<'de>,
    {
        let (key, value) = self.pending.take().ok_or_else(|| BindError::Message {
            path: self.path.clone(),
            message: "value requested before key".to_string(),
        })?;
        seed.deserialize(ValueBinder {
            value,
            path: child_path(&self.path, &key),
            options: self.options,
        })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

struct EnumBinder<'a> {
    variant: String,
    content: Value,
    path: String,
    options: &'a BinderOptions,
}

impl<'de, 'a> EnumAccess<'de> for EnumBinder<'a> {
    type Error = BindError;
    type Variant = ValueBinder<'a>;

    fn variant_seed<S>(self, seed: S) -> Result<(S::Value, ValueBinder<'a>), BindError>
    where
        S: DeserializeSeed<'de>,
    {
        let variant: StringDeserializer<BindError> = self.variant.into_deserializer();
        let value = seed.deserialize(variant)?;
        Ok((
            value,
            ValueBinder {
                value: self.content,
                path: self.path,
                options: self.options,
            },
        ))
    }
}

impl<'de> VariantAccess<'de> for ValueBinder<'_> {
    type Error = BindError;

    fn unit_variant(self) -> Result<(), BindError> {
        if is_empty(&self.value) {
            Ok(())
        } else {
            Err(self.invalid("a unit variant"))
        }
    }

    fn newtype_variant_seed<S>(self, seed: S) -> Result<S::Value, BindError>
    where
        S: DeserializeSeed<'de>,
    {
        seed.deserialize(self)
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, BindError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(self.into_entries(Some(fields))?)
    }
}
