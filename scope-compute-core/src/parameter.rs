use crate::unit::Unit;
use std::collections::HashMap;

/// One symbol of an 8B/10B pattern used for trigger-style matching
/// parameters (spec.md §6, `"8B10B pattern"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Symbol8b10b {
    pub disparity: Disparity,
    pub kind: SymbolKind,
    pub value: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disparity {
    Positive,
    Negative,
    Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    K,
    D,
    DontCare,
}

/// A bidirectional name<->value map backing an `Enum` parameter.
#[derive(Clone, Debug, Default)]
pub struct EnumMap {
    name_to_value: HashMap<String, i64>,
    value_to_name: HashMap<i64, String>,
}

impl EnumMap {
    pub fn new(entries: impl IntoIterator<Item = (&'static str, i64)>) -> Self {
        let mut map = Self::default();
        for (name, value) in entries {
            map.name_to_value.insert(name.to_string(), value);
            map.value_to_name.insert(value, name.to_string());
        }
        map
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.name_to_value.get(name).copied()
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.value_to_name.get(&value).map(String::as_str)
    }
}

/// Value payload of a [`Parameter`]. The active variant is determined by
/// the parameter's declared `ParameterType` and never changes across its
/// lifetime (spec.md §6).
#[derive(Clone, Debug)]
pub enum ParameterValue {
    Float(f32),
    Int(i64),
    Bool(bool),
    Filename(String),
    Enum(i64),
    String(String),
    Pattern8b10b(Vec<Symbol8b10b>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    Filename,
    Enum,
    String,
    Pattern8b10b,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ParameterFlags: u8 {
        const HIDDEN = 0b0000_0001;
        const READONLY = 0b0000_0010;
        /// Filename parameter names an output path rather than an input.
        const OUTPUT_FILE = 0b0000_0100;
    }
}

/// A typed, named, unit-tagged scalar input to a filter (spec.md §6).
#[derive(Clone, Debug)]
pub struct Parameter {
    pub param_type: ParameterType,
    pub unit: Unit,
    pub flags: ParameterFlags,
    pub value: ParameterValue,
    pub enum_map: Option<EnumMap>,
    /// File mask/name pair shown by a file picker, e.g. `("*.s2p", "Touchstone files")`.
    pub file_mask: Option<(String, String)>,
    dirty: bool,
}

impl Parameter {
    pub fn new(param_type: ParameterType, unit: Unit, initial: ParameterValue) -> Self {
        Self {
            param_type,
            unit,
            flags: ParameterFlags::empty(),
            value: initial,
            enum_map: None,
            file_mask: None,
            dirty: true,
        }
    }

    pub fn float(unit: Unit, value: f32) -> Self {
        Self::new(ParameterType::Float, unit, ParameterValue::Float(value))
    }

    pub fn int(unit: Unit, value: i64) -> Self {
        Self::new(ParameterType::Int, unit, ParameterValue::Int(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ParameterType::Bool, Unit::Counts, ParameterValue::Bool(value))
    }

    pub fn enum_value(map: EnumMap, value: i64) -> Self {
        let mut p = Self::new(ParameterType::Enum, Unit::Counts, ParameterValue::Enum(value));
        p.enum_map = Some(map);
        p
    }

    pub fn get_float(&self) -> f32 {
        match &self.value {
            ParameterValue::Float(v) => *v,
            ParameterValue::Int(v) => *v as f32,
            ParameterValue::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn get_int(&self) -> i64 {
        match &self.value {
            ParameterValue::Int(v) => *v,
            ParameterValue::Float(v) => *v as i64,
            ParameterValue::Bool(v) => *v as i64,
            ParameterValue::Enum(v) => *v,
            _ => 0,
        }
    }

    pub fn get_bool(&self) -> bool {
        self.get_int() != 0
    }

    pub fn set_float(&mut self, v: f32) {
        self.value = ParameterValue::Float(v);
        self.dirty = true;
    }

    pub fn set_int(&mut self, v: i64) {
        self.value = ParameterValue::Int(v);
        self.dirty = true;
    }

    pub fn set_bool(&mut self, v: bool) {
        self.value = ParameterValue::Bool(v);
        self.dirty = true;
    }

    /// Clears and returns whether the parameter changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}
