//! Shared types that cross the RPC boundary.
//!
//! These travel between the client orchestrator, the wire protocol, and the
//! dispatcher, and must mean the same thing on both sides of the connection.

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An encoded image exactly as it travels over the wire.
///
/// The format is implied by the magic bytes; nothing in this type inspects
/// them. Serialized as a single CBOR byte string rather than an array of
/// integers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ImageBuffer(Vec<u8>);

impl ImageBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageBuffer({} bytes)", self.0.len())
    }
}

impl Serialize for ImageBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ImageBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_byte_buf(ImageBufferVisitor)
    }
}

struct ImageBufferVisitor;

impl<'de> Visitor<'de> for ImageBufferVisitor {
    type Value = ImageBuffer;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("encoded image bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(ImageBuffer(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(ImageBuffer(v))
    }

    // Accept an array of integers too, for peers that don't emit byte strings.
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut data = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            data.push(byte);
        }
        Ok(ImageBuffer(data))
    }
}

/// A rotation the service accepts. Nothing else is representable.
///
/// Angles are counter-clockwise: a 90° rotation turns the top edge of the
/// image into its left edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    None,
    Ninety,
    OneEighty,
    TwoSeventy,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAngle {
    #[error("invalid rotation {0} degrees: valid rotations are 0, 90, 180, 270")]
    Degrees(i64),
    #[error("invalid rotation '{0}': use NONE, NINETY_DEG, ONE_EIGHTY_DEG or TWO_SEVENTY_DEG")]
    Label(String),
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::None,
        Rotation::Ninety,
        Rotation::OneEighty,
        Rotation::TwoSeventy,
    ];

    pub fn degrees(self) -> i64 {
        match self {
            Rotation::None => 0,
            Rotation::Ninety => 90,
            Rotation::OneEighty => 180,
            Rotation::TwoSeventy => 270,
        }
    }

    /// Only exact members of {0, 90, 180, 270} are accepted; 360 and -90 are not.
    pub fn from_degrees(degrees: i64) -> Result<Self, InvalidAngle> {
        Self::ALL
            .into_iter()
            .find(|r| r.degrees() == degrees)
            .ok_or(InvalidAngle::Degrees(degrees))
    }

    /// The label used on the command line.
    pub fn label(self) -> &'static str {
        match self {
            Rotation::None => "NONE",
            Rotation::Ninety => "NINETY_DEG",
            Rotation::OneEighty => "ONE_EIGHTY_DEG",
            Rotation::TwoSeventy => "TWO_SEVENTY_DEG",
        }
    }

    /// Labels are matched exactly (case-sensitive).
    pub fn from_label(label: &str) -> Result<Self, InvalidAngle> {
        Self::ALL
            .into_iter()
            .find(|r| r.label() == label)
            .ok_or_else(|| InvalidAngle::Label(label.to_string()))
    }

    /// Apply `self` and then `next`; angles add modulo 360.
    pub fn then(self, next: Rotation) -> Rotation {
        let total = (self.degrees() + next.degrees()) % 360;
        match total {
            90 => Rotation::Ninety,
            180 => Rotation::OneEighty,
            270 => Rotation::TwoSeventy,
            _ => Rotation::None,
        }
    }
}

impl FromStr for Rotation {
    type Err = InvalidAngle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rotate call: image bytes plus the requested angle in degrees.
///
/// The angle stays a raw integer here so that the dispatcher, not the type
/// system, is the one to reject values outside the allowed set. A remote
/// peer can send anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateRequest {
    pub image: ImageBuffer,
    pub degrees: i64,
}

impl RotateRequest {
    pub fn new(image: ImageBuffer, rotation: Rotation) -> Self {
        Self {
            image,
            degrees: rotation.degrees(),
        }
    }
}
