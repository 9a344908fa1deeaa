/// Accumulates the SCIP line checksum: the byte sum, low six bits, offset by `0x30`.
pub struct Checksum {
    current: u32,
}

impl Checksum {
    /// Creates a new `Checksum` instance, initialized to 0.
    #[inline]
    pub fn new() -> Checksum {
        Checksum { current: 0 }
    }

    /// Adds a slice of bytes to the running sum.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        for &d in data {
            self.current = self.current.wrapping_add(d as u32);
        }
    }

    /// Returns the checksum character for the bytes pushed so far.
    #[inline]
    pub fn checksum(&self) -> u8 {
        (self.current & 0x3f) as u8 + 0x30
    }
}

impl Default for Checksum {
    fn default() -> Checksum {
        Checksum::new()
    }
}

/// Returns `true` when `expected` is the checksum character of `body`.
pub fn check_sum(body: &[u8], expected: u8) -> bool {
    let mut checksum = Checksum::new();
    checksum.push_slice(body);
    checksum.checksum() == expected
}

/// Splits a checksummed line into body and checksum, returning the body if it verifies.
pub fn verified_body(line: &[u8]) -> Option<&[u8]> {
    let (&sum, body) = line.split_last()?;
    if check_sum(body, sum) {
        Some(body)
    } else {
        None
    }
}
