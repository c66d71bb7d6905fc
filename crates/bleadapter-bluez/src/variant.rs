//! Property values of the host object cache.
//!
//! BlueZ exposes every property as a D-Bus variant. The adapter only ever
//! needs a handful of signatures, so they are decoded once into [`Variant`]
//! and anything else is kept as [`Variant::Other`] with its signature.

use std::collections::{BTreeMap, HashMap};

/// A decoded D-Bus variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    /// `s`
    Str(String),
    /// `b`
    Bool(bool),
    /// `q`
    U16(u16),
    /// `n`
    I16(i16),
    /// `u`
    U32(u32),
    /// `o`
    ObjectPath(String),
    /// `ay`
    Bytes(Vec<u8>),
    /// `as`
    StrList(Vec<String>),
    /// `ao`
    PathList(Vec<String>),
    /// `a{qv}` with byte-array values (manufacturer data)
    U16Bytes(BTreeMap<u16, Vec<u8>>),
    /// `a{sv}` with byte-array values (service data)
    StrBytes(BTreeMap<String, Vec<u8>>),
    /// Any other signature
    Other(String),
}

impl Variant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(v) | Self::PathList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16_bytes(&self) -> Option<&BTreeMap<u16, Vec<u8>>> {
        match self {
            Self::U16Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&BTreeMap<String, Vec<u8>>> {
        match self {
            Self::StrBytes(v) => Some(v),
            _ => None,
        }
    }

    /// D-Bus type signature of the value.
    pub fn signature(&self) -> &str {
        match self {
            Self::Str(_) => "s",
            Self::Bool(_) => "b",
            Self::U16(_) => "q",
            Self::I16(_) => "n",
            Self::U32(_) => "u",
            Self::ObjectPath(_) => "o",
            Self::Bytes(_) => "ay",
            Self::StrList(_) => "as",
            Self::PathList(_) => "ao",
            Self::U16Bytes(_) => "a{qv}",
            Self::StrBytes(_) => "a{sv}",
            Self::Other(sig) => sig,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "\"{}\"", s),
            Self::ObjectPath(s) => write!(f, "{}", s),
            Self::Bool(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{:?}", v),
            Self::StrList(v) | Self::PathList(v) => write!(f, "{:?}", v),
            Self::U16Bytes(v) => write!(f, "{:?}", v),
            Self::StrBytes(v) => write!(f, "{:?}", v),
            Self::Other(sig) => write!(f, "<{}>", sig),
        }
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Variant {
    fn from(v: i16) -> Self {
        Self::I16(v)
    }
}

impl From<u16> for Variant {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<Vec<u8>> for Variant {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<String>> for Variant {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

/// Property name → value.
pub type Properties = HashMap<String, Variant>;

/// Interface name → properties.
pub type InterfaceMap = HashMap<String, Properties>;

/// Object path → interfaces, as returned by `GetManagedObjects`.
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

/// Typed property lookups with the defaults used throughout the adapter.
pub trait PropertyExt {
    fn str_or_default(&self, key: &str) -> String;
    fn opt_str(&self, key: &str) -> Option<String>;
    fn bool_or(&self, key: &str, default: bool) -> bool;
    fn strings(&self, key: &str) -> Vec<String>;
    fn bytes(&self, key: &str) -> Vec<u8>;
}

impl PropertyExt for Properties {
    fn str_or_default(&self, key: &str) -> String {
        self.opt_str(key).unwrap_or_default()
    }

    fn opt_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Variant::as_str).map(str::to_string)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Variant::as_bool).unwrap_or(default)
    }

    fn strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Variant::as_str_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    fn bytes(&self, key: &str) -> Vec<u8> {
        self.get(key)
            .and_then(Variant::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }
}
