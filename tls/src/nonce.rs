use crate::{suite::IV_LENGTH, Error};

/// A per-record nonce.
pub type Nonce = [u8; IV_LENGTH];

/// The sequence number of the next record protected with a traffic key. Incremented each time
/// the nonce is used and able to reach 2^64 - 1 before overflowing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sequence {
    counter: u128,
}

/// If the counter is greater-than-or-equal to this value, it is considered to have overflowed.
/// This is 2^64 or, in binary, one followed by 64 zeros.
const OVERFLOW_VALUE: u128 = 1 << 64;

impl Sequence {
    /// Returns the sequence number of the next record.
    pub fn value(&self) -> u64 {
        // An overflowed counter is reported as saturated.
        u64::try_from(self.counter).unwrap_or(u64::MAX)
    }

    /// Derives the nonce for the next record from `iv` and increments the counter by 1.
    ///
    /// An error is returned if-and-only-if the nonce cannot be derived.
    pub fn next(&mut self, iv: &Nonce) -> Result<Nonce, Error> {
        let result = self.derive(iv)?;
        self.inc();
        Ok(result)
    }

    /// Increments the counter by 1.
    ///
    /// Silently fails (does not increment) once the counter has already overflowed 64 bits. This
    /// prevents the counter from wrapping back to 0.
    pub fn inc(&mut self) {
        if self.counter >= OVERFLOW_VALUE {
            return;
        }
        self.counter += 1;
    }

    /// XORs the big-endian sequence number (left-padded to the length of `iv`) into `iv`.
    ///
    /// An error is returned if-and-only-if the counter has overflowed 64 bits.
    pub fn derive(&self, iv: &Nonce) -> Result<Nonce, Error> {
        if self.counter >= OVERFLOW_VALUE {
            return Err(Error::NonceOverflow);
        }
        let sequence = (self.counter as u64).to_be_bytes();
        let mut result = *iv;
        for (byte, s) in result[IV_LENGTH - 8..].iter_mut().zip(sequence) {
            *byte ^= s;
        }
        Ok(result)
    }
}
