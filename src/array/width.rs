// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

/// How payload bytes map to elements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WType {
    /// Payload is packed at `width` *bits* per element (width < 8).
    Bits,
    /// Payload is `width` *bytes* per element.
    Multiply,
    /// One byte per element regardless of the declared width.
    Ignore,
}

impl TryFrom<u8> for WType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Bits),
            1 => Ok(Self::Multiply),
            2 => Ok(Self::Ignore),
            _ => Err(()),
        }
    }
}

impl From<WType> for u8 {
    fn from(value: WType) -> Self {
        match value {
            WType::Bits => 0,
            WType::Multiply => 1,
            WType::Ignore => 2,
        }
    }
}

/// Element width in bits, one of `{0, 1, 2, 4, 8, 16, 32, 64}`.
///
/// Encoded on disk as a 3-bit exponent `e` via `bits = (1 << e) >> 1`, so
/// `e=0` is the degenerate all-zero width (every element is the value 0).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Width(u8);

impl Width {
    pub const W0: Self = Self(0);
    pub const W1: Self = Self(1);
    pub const W2: Self = Self(2);
    pub const W4: Self = Self(4);
    pub const W8: Self = Self(8);
    pub const W16: Self = Self(16);
    pub const W32: Self = Self(32);
    pub const W64: Self = Self(64);

    const EXPONENTS: [u8; 8] = [0, 1, 2, 4, 8, 16, 32, 64];

    /// Element width in bits.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// The 3-bit on-disk exponent for this width.
    #[must_use]
    pub fn exponent(self) -> u8 {
        Self::EXPONENTS
            .iter()
            .position(|&b| b == self.0)
            .expect("width is always one of the fixed exponents") as u8
    }

    /// Reconstructs a width from its 3-bit on-disk exponent.
    #[must_use]
    pub fn from_exponent(exp: u8) -> Self {
        Self(Self::EXPONENTS[usize::from(exp & 0b111)])
    }

    /// The smallest fixed width whose signed range covers `value`.
    #[must_use]
    pub fn for_signed(value: i64) -> Self {
        if value == 0 {
            return Self::W0;
        }
        for w in [Self::W1, Self::W2, Self::W4, Self::W8, Self::W16, Self::W32, Self::W64] {
            if w.0 == 64 {
                return w;
            }
            let half = 1_i64 << (w.0 - 1);
            if value >= -half && value < half {
                return w;
            }
        }
        Self::W64
    }

    /// Whichever of `self` and `other` can represent both.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}
