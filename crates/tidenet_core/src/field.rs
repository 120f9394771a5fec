//! # Synchronized Fields
//!
//! A [`SyncField`] is one value of entity state: it encodes itself into a
//! snapshot, notifies a listener when it changes, and owns the comparer used
//! to decide whether a predicted value diverged from the authoritative one.
//!
//! ## Comparers
//!
//! | Type      | Default                                    |
//! |-----------|--------------------------------------------|
//! | `bool`    | exact                                      |
//! | `i32`     | exact                                      |
//! | `String`  | exact                                      |
//! | `f32`     | absolute difference within 0.01            |
//! | `Vec2`    | squared distance within 0.01               |
//! | `Vec3`    | squared distance within 0.01               |
//! | `Quat`    | angle within 1 degree                      |
//! | tuples    | each component with its own default        |
//!
//! Comparers only matter for reconciliation. Wire bytes are always exact.

use crate::error::SyncResult;
use crate::stream::{StateReader, StateWriter};
use std::fmt;
use tidenet_shared::constants::{FLOAT_TOLERANCE, ROTATION_TOLERANCE_DEGREES, VECTOR_SQR_TOLERANCE};
use tidenet_shared::{Quat, Vec2, Vec3};

/// Equality policy used when diffing predicted against authoritative state.
pub trait ValueComparer<T>: Send + Sync {
    /// True if `a` and `b` count as the same state.
    fn equals(&self, a: &T, b: &T) -> bool;
}

/// Plain `==`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactComparer;

impl<T: PartialEq> ValueComparer<T> for ExactComparer {
    fn equals(&self, a: &T, b: &T) -> bool {
        a == b
    }
}

/// Absolute difference of two floats within a tolerance.
#[derive(Clone, Copy, Debug)]
pub struct FloatToleranceComparer(pub f32);

impl Default for FloatToleranceComparer {
    fn default() -> Self {
        Self(FLOAT_TOLERANCE)
    }
}

impl ValueComparer<f32> for FloatToleranceComparer {
    fn equals(&self, a: &f32, b: &f32) -> bool {
        (a - b).abs() <= self.0
    }
}

/// Squared distance of two vectors within a tolerance.
#[derive(Clone, Copy, Debug)]
pub struct SqrMagnitudeComparer(pub f32);

impl Default for SqrMagnitudeComparer {
    fn default() -> Self {
        Self(VECTOR_SQR_TOLERANCE)
    }
}

impl ValueComparer<Vec2> for SqrMagnitudeComparer {
    fn equals(&self, a: &Vec2, b: &Vec2) -> bool {
        (*a - *b).length_squared() <= self.0
    }
}

impl ValueComparer<Vec3> for SqrMagnitudeComparer {
    fn equals(&self, a: &Vec3, b: &Vec3) -> bool {
        (*a - *b).length_squared() <= self.0
    }
}

/// Angle between two rotations within a tolerance in degrees.
#[derive(Clone, Copy, Debug)]
pub struct AngleComparer(pub f32);

impl Default for AngleComparer {
    fn default() -> Self {
        Self(ROTATION_TOLERANCE_DEGREES)
    }
}

impl ValueComparer<Quat> for AngleComparer {
    fn equals(&self, a: &Quat, b: &Quat) -> bool {
        a.angle_degrees(*b) <= self.0
    }
}

/// A type that can live inside a [`SyncField`].
pub trait FieldValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Appends the wire form.
    fn encode(&self, writer: &mut StateWriter);

    /// Reads the wire form back.
    ///
    /// # Errors
    ///
    /// Fails if the reader runs out of bytes or the bytes are malformed.
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self>;

    /// Comparer used when none is configured.
    fn default_comparer() -> Box<dyn ValueComparer<Self>>;
}

impl FieldValue for bool {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_bool(*self);
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_bool()
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(ExactComparer)
    }
}

impl FieldValue for i32 {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_i32(*self);
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_i32()
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(ExactComparer)
    }
}

impl FieldValue for f32 {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_f32(*self);
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_f32()
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(FloatToleranceComparer::default())
    }
}

impl FieldValue for String {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_str(self);
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_string()
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(ExactComparer)
    }
}

impl FieldValue for Vec2 {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_f32s(&self.to_array());
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_f32s().map(Self::from_array)
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(SqrMagnitudeComparer::default())
    }
}

impl FieldValue for Vec3 {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_f32s(&self.to_array());
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_f32s().map(Self::from_array)
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(SqrMagnitudeComparer::default())
    }
}

impl FieldValue for Quat {
    fn encode(&self, writer: &mut StateWriter) {
        writer.write_f32s(&self.to_array());
    }
    fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
        reader.read_f32s().map(Self::from_array)
    }
    fn default_comparer() -> Box<dyn ValueComparer<Self>> {
        Box::new(AngleComparer::default())
    }
}

/// Component-wise comparer for tuple fields.
pub struct TupleComparer<C> {
    components: C,
}

impl<C> TupleComparer<C> {
    /// Wraps one comparer per tuple component.
    pub const fn new(components: C) -> Self {
        Self { components }
    }
}

macro_rules! impl_tuple_field {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: FieldValue),+> ValueComparer<($($name,)+)>
            for TupleComparer<($(Box<dyn ValueComparer<$name>>,)+)>
        {
            fn equals(&self, a: &($($name,)+), b: &($($name,)+)) -> bool {
                $(self.components.$idx.equals(&a.$idx, &b.$idx))&&+
            }
        }

        impl<$($name: FieldValue),+> FieldValue for ($($name,)+) {
            fn encode(&self, writer: &mut StateWriter) {
                $(self.$idx.encode(writer);)+
            }
            fn decode(reader: &mut StateReader<'_>) -> SyncResult<Self> {
                Ok(($($name::decode(reader)?,)+))
            }
            fn default_comparer() -> Box<dyn ValueComparer<Self>> {
                Box::new(TupleComparer::new(($($name::default_comparer(),)+)))
            }
        }
    };
}

impl_tuple_field!(A: 0, B: 1);
impl_tuple_field!(A: 0, B: 1, C: 2);

/// Listener invoked with `(old, new)` whenever a field value changes.
pub type ChangeCallback<T> = Box<dyn FnMut(&T, &T) + Send>;

/// A single synchronized value.
pub struct SyncField<T: FieldValue> {
    value: T,
    enabled: bool,
    comparer: Box<dyn ValueComparer<T>>,
    on_change: Option<ChangeCallback<T>>,
}

impl<T: FieldValue> SyncField<T> {
    /// Synchronized field holding `value`, compared with the type's default.
    pub fn new(value: T) -> Self {
        Self {
            value,
            enabled: true,
            comparer: T::default_comparer(),
            on_change: None,
        }
    }

    /// Field that is declared but never serialized.
    pub fn disabled(value: T) -> Self {
        Self {
            enabled: false,
            ..Self::new(value)
        }
    }

    /// Replaces the reconciliation comparer.
    #[must_use]
    pub fn with_comparer(mut self, comparer: impl ValueComparer<T> + 'static) -> Self {
        self.comparer = Box::new(comparer);
        self
    }

    /// Registers the change listener, replacing any previous one.
    pub fn set_on_change(&mut self, callback: impl FnMut(&T, &T) + Send + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Stores `value`, notifying the listener if it differs from the old one.
    pub fn set(&mut self, value: T) {
        if self.value != value {
            if let Some(callback) = self.on_change.as_mut() {
                callback(&self.value, &value);
            }
        }
        self.value = value;
    }

    /// Whether the field takes part in snapshots.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compares two values with this field's comparer.
    pub fn values_equal(&self, a: &T, b: &T) -> bool {
        self.comparer.equals(a, b)
    }
}

impl<T: FieldValue + Default> Default for SyncField<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: FieldValue> fmt::Debug for SyncField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncField")
            .field("value", &self.value)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a field used by the entity codec.
pub trait SyncVar: Send {
    /// Whether the field takes part in snapshots.
    fn is_enabled(&self) -> bool;

    /// Appends the current value.
    fn write_state(&self, writer: &mut StateWriter);

    /// Replaces the current value with the next one in `reader`.
    ///
    /// # Errors
    ///
    /// Fails on a short or malformed read.
    fn read_state(&mut self, reader: &mut StateReader<'_>) -> SyncResult<()>;

    /// Decodes one value from each reader and compares them.
    ///
    /// # Errors
    ///
    /// Fails on a short or malformed read on either side.
    fn states_equal(&self, a: &mut StateReader<'_>, b: &mut StateReader<'_>) -> SyncResult<bool>;
}

impl<T: FieldValue> SyncVar for SyncField<T> {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write_state(&self, writer: &mut StateWriter) {
        self.value.encode(writer);
    }

    fn read_state(&mut self, reader: &mut StateReader<'_>) -> SyncResult<()> {
        let value = T::decode(reader)?;
        self.set(value);
        Ok(())
    }

    fn states_equal(&self, a: &mut StateReader<'_>, b: &mut StateReader<'_>) -> SyncResult<bool> {
        let left = T::decode(a)?;
        let right = T::decode(b)?;
        Ok(self.comparer.equals(&left, &right))
    }
}

/// Synchronized `bool`.
pub type SyncBool = SyncField<bool>;
/// Synchronized `i32`.
pub type SyncInt = SyncField<i32>;
/// Synchronized `f32`.
pub type SyncFloat = SyncField<f32>;
/// Synchronized `String`.
pub type SyncString = SyncField<String>;
/// Synchronized [`Vec2`].
pub type SyncVec2 = SyncField<Vec2>;
/// Synchronized [`Vec3`].
pub type SyncVec3 = SyncField<Vec3>;
/// Synchronized [`Quat`].
pub type SyncQuat = SyncField<Quat>;
