//! Convenience functions for the `Vec<bool>` and `&[bool]` bit vectors the
//! probe engine shifts. Index 0 is always the first bit on the wire, which
//! makes these LSB-first throughout, matching the JTAG shift order.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Not enough bits to extract required data.")]
    NotEnoughBits,
    #[error("Unknown word size.")]
    InvalidWordSize,
    #[error("Bit strings may only contain '0' and '1' characters.")]
    InvalidBitChar,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse a string of '0'/'1' characters into bits, first character first.
pub fn bits_from_str(s: &str) -> Result<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            _ => Err(Error::InvalidBitChar),
        })
        .collect()
}

/// Render bits as a string of '0'/'1' characters, index 0 first.
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&bit| if bit { '1' } else { '0' }).collect()
}

/// Extracts the next n bits as a u64, least significant bit first,
/// with any higher order bits set to 0. Returns the extracted word
/// and any remaining bits.
///
/// Returns an error if bits.len() < n or if n > 64.
pub fn drain_word(bits: &[bool], n: usize) -> Result<(u64, &[bool])> {
    if bits.len() < n {
        Err(Error::NotEnoughBits)
    } else if n > 64 {
        Err(Error::InvalidWordSize)
    } else {
        let mut word = 0u64;
        for (idx, bit) in bits[..n].iter().enumerate() {
            word |= (*bit as u64) << idx;
        }
        Ok((word, &bits[n..]))
    }
}

/// Extract the next 32 bits as a u32.
pub fn drain_u32(bits: &[bool]) -> Result<(u32, &[bool])> {
    let (word, bits) = drain_word(bits, 32)?;
    Ok((word as u32, bits))
}

/// Append n bits from a u64 to a Vec<bool>, least significant bit first.
pub fn append_word(bits: &mut Vec<bool>, word: u64, n: usize) {
    for idx in 0..n {
        let bit = ((word >> idx) & 1) == 1;
        bits.push(bit);
    }
}

/// Convenience macro for creating a &[bool] from &[u8] of 0/1.
macro_rules! bv {
    ($($x:expr),*) => {
        &[ $(($x != 0),)* ] as &[bool]
    }
}

#[test]
fn test_bits_from_str() {
    assert_eq!(bits_from_str("").unwrap(), Vec::<bool>::new());
    assert_eq!(bits_from_str("1011").unwrap(), bv![1, 0, 1, 1]);
    assert!(bits_from_str("10x1").is_err());
}

#[test]
fn test_bits_to_string() {
    assert_eq!(bits_to_string(bv![]), "");
    assert_eq!(bits_to_string(bv![1, 0, 1, 1]), "1011");
    assert_eq!(bits_to_string(&bits_from_str("0110011101").unwrap()), "0110011101");
}

#[test]
fn test_drain_word() {
    assert_eq!(drain_word(bv![1, 0   ], 2).unwrap(), (0b01, bv![]));
    assert_eq!(drain_word(bv![1, 0, 1], 2).unwrap(), (0b01, bv![1]));
    assert!(drain_word(bv![1, 0, 1], 4).is_err());
}

#[test]
fn test_drain_u32() {
    assert_eq!(drain_u32(bv![1, 0, 0, 0, 1, 0, 1, 0, 1, 1, 0, 0, 0, 0, 1, 0,
                             0, 1, 1, 1, 0, 1, 0, 1, 0, 0, 1, 1, 1, 1, 0, 1]).unwrap(),
               (0xBCAE4351,  bv![]));
}

#[test]
fn test_append_word() {
    let mut bits = bv![1, 1, 1, 1].to_vec();
    append_word(&mut bits, 0b1101, 4);
    assert_eq!(&bits[..], bv![1, 1, 1, 1, 1, 0, 1, 1]);
}
