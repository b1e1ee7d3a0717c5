//! Type-erased values and the table of conversions between them.
//!
//! A blackboard stores values as [`AnyValue`], a reference counted `Any` tagged with
//! its [`TypeTag`]. Reading a value as a different type goes through a
//! [`TypesConverter`]: identical types pass through, the primitive types
//! (`bool`, the integer and float widths and `String`) convert into each other
//! without registration, and every other pair needs an explicit
//! [`TypesConverter::add_conversion`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::BlackboardError;

/// Runtime identity of a type, with its name kept for messages.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_primitive(&self) -> bool {
        primitive_tags().iter().any(|tag| tag == self)
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for TypeTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type-erased blackboard value. Clones share the allocation; a `set` replaces
/// the whole value.
#[derive(Clone)]
pub struct AnyValue {
    tag: TypeTag,
    value: Arc<dyn Any + Send + Sync>,
}

impl AnyValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl Debug for AnyValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "AnyValue({})", self.tag.name)
    }
}

type AnyConverter = Arc<dyn Fn(&AnyValue) -> Result<AnyValue, BlackboardError> + Send + Sync>;

/// Registry of conversions keyed by the ordered pair (from, to).
#[derive(Clone, Default)]
pub struct TypesConverter {
    converters: HashMap<(TypeTag, TypeTag), AnyConverter>,
}

impl TypesConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible conversion. A registration for a pair of primitive
    /// types takes precedence over the built-in conversion.
    pub fn add_conversion<From, To>(
        &mut self,
        convert: impl Fn(&From) -> To + Send + Sync + 'static,
    ) where
        From: Any + Send + Sync,
        To: Any + Send + Sync,
    {
        self.add_fallible_conversion(move |from: &From| Ok::<_, String>(convert(from)));
    }

    /// Registers a conversion that may reject a value. The error text ends up in
    /// [`BlackboardError::ConversionFailed`].
    pub fn add_fallible_conversion<From, To, E>(
        &mut self,
        convert: impl Fn(&From) -> Result<To, E> + Send + Sync + 'static,
    ) where
        From: Any + Send + Sync,
        To: Any + Send + Sync,
        E: ToString,
    {
        let from_tag = TypeTag::of::<From>();
        let to_tag = TypeTag::of::<To>();
        let converter: AnyConverter = Arc::new(move |value: &AnyValue| {
            let from = value
                .downcast_ref::<From>()
                .ok_or(BlackboardError::NoConversion {
                    from: value.tag().name(),
                    to: to_tag.name(),
                })?;
            convert(from)
                .map(AnyValue::new)
                .map_err(|e| BlackboardError::ConversionFailed {
                    value: e.to_string(),
                    to: to_tag.name(),
                })
        });
        self.converters.insert((from_tag, to_tag), converter);
    }

    pub fn is_convertible(&self, from: TypeTag, to: TypeTag) -> bool {
        from == to
            || self.converters.contains_key(&(from, to))
            || (from.is_primitive() && to.is_primitive())
    }

    pub fn convert_any(&self, value: &AnyValue, to: TypeTag) -> Result<AnyValue, BlackboardError> {
        let from = value.tag();
        if from == to {
            return Ok(value.clone());
        }
        if let Some(converter) = self.converters.get(&(from, to)) {
            return converter(value);
        }
        if from.is_primitive() && to.is_primitive() {
            if let Some(scalar) = Scalar::of(value) {
                return scalar.convert_to(to).ok_or_else(|| BlackboardError::ConversionFailed {
                    value: scalar.to_string(),
                    to: to.name(),
                });
            }
        }
        Err(BlackboardError::NoConversion {
            from: from.name(),
            to: to.name(),
        })
    }

    pub fn convert<To: Any + Clone>(&self, value: &AnyValue) -> Result<To, BlackboardError> {
        let to = TypeTag::of::<To>();
        let converted = self.convert_any(value, to)?;
        converted
            .downcast_ref::<To>()
            .cloned()
            .ok_or(BlackboardError::NoConversion {
                from: value.tag().name(),
                to: to.name(),
            })
    }

    /// Interprets the text of a port literal as `To`.
    pub fn convert_literal<To: Any + Clone>(&self, text: &str) -> Result<To, BlackboardError> {
        self.convert(&AnyValue::new(text.to_owned()))
    }
}

impl Debug for TypesConverter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_set()
            .entries(
                self.converters
                    .keys()
                    .map(|(from, to)| format!("{} -> {}", from.name(), to.name())),
            )
            .finish()
    }
}

fn primitive_tags() -> [TypeTag; 14] {
    [
        TypeTag::of::<bool>(),
        TypeTag::of::<i8>(),
        TypeTag::of::<i16>(),
        TypeTag::of::<i32>(),
        TypeTag::of::<i64>(),
        TypeTag::of::<isize>(),
        TypeTag::of::<u8>(),
        TypeTag::of::<u16>(),
        TypeTag::of::<u32>(),
        TypeTag::of::<u64>(),
        TypeTag::of::<usize>(),
        TypeTag::of::<f32>(),
        TypeTag::of::<f64>(),
        TypeTag::of::<String>(),
    ]
}

/// Common representation the built-in conversions go through.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn of(value: &AnyValue) -> Option<Self> {
        macro_rules! try_int {
            ($($ty:ty),*) => {
                $(
                    if let Some(v) = value.downcast_ref::<$ty>() {
                        return Some(Scalar::Int(*v as i128));
                    }
                )*
            };
        }
        if let Some(v) = value.downcast_ref::<bool>() {
            return Some(Scalar::Bool(*v));
        }
        try_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
        if let Some(v) = value.downcast_ref::<f32>() {
            return Some(Scalar::Float(*v as f64));
        }
        if let Some(v) = value.downcast_ref::<f64>() {
            return Some(Scalar::Float(*v));
        }
        value
            .downcast_ref::<String>()
            .map(|v| Scalar::Str(v.clone()))
    }

    fn as_int(&self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(*b as i128),
            Self::Int(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && f.fract() == 0. && f.abs() < i128::MAX as f64 {
                    Some(*f as i128)
                } else {
                    None
                }
            }
            Self::Str(s) => s.trim().parse().ok(),
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1. } else { 0. }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.),
            Self::Str(s) => match s.trim() {
                "1" => Some(true),
                "0" => Some(false),
                s if s.eq_ignore_ascii_case("true") => Some(true),
                s if s.eq_ignore_ascii_case("false") => Some(false),
                _ => None,
            },
        }
    }

    fn convert_to(&self, to: TypeTag) -> Option<AnyValue> {
        macro_rules! try_int {
            ($($ty:ty),*) => {
                $(
                    if to == TypeTag::of::<$ty>() {
                        return self
                            .as_int()
                            .and_then(|v| <$ty>::try_from(v).ok())
                            .map(AnyValue::new);
                    }
                )*
            };
        }
        if to == TypeTag::of::<bool>() {
            return self.as_bool().map(AnyValue::new);
        }
        try_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
        if to == TypeTag::of::<f32>() {
            return self.as_float().map(|v| AnyValue::new(v as f32));
        }
        if to == TypeTag::of::<f64>() {
            return self.as_float().map(AnyValue::new);
        }
        if to == TypeTag::of::<String>() {
            return Some(AnyValue::new(self.to_string()));
        }
        None
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(s) => f.write_str(s),
        }
    }
}
