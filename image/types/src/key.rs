/*++

Licensed under the Apache-2.0 license.

File Name:

   key.rs

Abstract:

    RSA key material and its fixed width binary encoding.

--*/

use crate::{KeyOrder, RsaSize};
use socsec_error::{SocsecError, SocsecResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RsaComponent {
    N,
    E,
    D,
}

/// Which exponent goes into the second half of a key binary
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KeyPart {
    Public,
    Private,
}

/// RSA key components as big endian magnitudes
#[derive(Clone, Eq, PartialEq)]
pub struct RsaKey {
    n: Vec<u8>,
    e: Vec<u8>,
    d: Option<Vec<u8>>,
}

impl core::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RsaKey")
            .field("n_bits", &bit_length(&self.n))
            .field("e_bits", &bit_length(&self.e))
            .field("private", &self.d.is_some())
            .finish()
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn bit_length(bytes: &[u8]) -> usize {
    match bytes.iter().position(|b| *b != 0) {
        Some(i) => (bytes.len() - i) * 8 - bytes[i].leading_zeros() as usize,
        None => 0,
    }
}

/// Place a big endian value right aligned in a `len` byte field
fn fixed_field(value: &[u8], len: usize, order: KeyOrder) -> SocsecResult<Vec<u8>> {
    if value.len() > len {
        return Err(SocsecError::KEY_SIZE_UNSUPPORTED);
    }
    let mut field = vec![0u8; len];
    field[len - value.len()..].copy_from_slice(value);
    order.apply(&mut field);
    Ok(field)
}

impl RsaKey {
    pub fn new(n: &[u8], e: &[u8], d: Option<&[u8]>) -> SocsecResult<Self> {
        let n = strip_leading_zeros(n);
        let e = strip_leading_zeros(e);
        if n.is_empty() || e.is_empty() {
            return Err(SocsecError::KEY_PEM_INVALID);
        }
        Ok(Self {
            n,
            e,
            d: d.map(strip_leading_zeros),
        })
    }

    pub fn public(n: &[u8], e: &[u8]) -> SocsecResult<Self> {
        Self::new(n, e, None)
    }

    pub fn n(&self) -> &[u8] {
        &self.n
    }

    pub fn e(&self) -> &[u8] {
        &self.e
    }

    pub fn d(&self) -> Option<&[u8]> {
        self.d.as_deref()
    }

    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Number of significant bits of a component
    pub fn bit_length(&self, component: RsaComponent) -> SocsecResult<usize> {
        match component {
            RsaComponent::N => Ok(bit_length(&self.n)),
            RsaComponent::E => Ok(bit_length(&self.e)),
            RsaComponent::D => self
                .d
                .as_deref()
                .map(bit_length)
                .ok_or(SocsecError::KEY_NOT_PRIVATE),
        }
    }

    /// RSA size of the modulus; the bit length must be exact
    pub fn rsa_size(&self) -> SocsecResult<RsaSize> {
        RsaSize::from_modulus_bits(bit_length(&self.n))
    }

    /// Width of each half of the key binary
    ///
    /// Only 1024, 2048 and 3072 bit moduli get their own width. Any other
    /// bit length, including a short 2047 bit modulus, uses the 4096 bit
    /// width of 512 bytes rather than rounding up to the next size.
    pub fn field_len(&self) -> usize {
        match bit_length(&self.n) {
            1024 => 128,
            2048 => 256,
            3072 => 384,
            _ => 512,
        }
    }

    /// Modulus followed by the public or private exponent, each `field_len`
    /// bytes wide
    pub fn to_binary(&self, part: KeyPart, order: KeyOrder) -> SocsecResult<Vec<u8>> {
        let exp = match part {
            KeyPart::Public => self.e.as_slice(),
            KeyPart::Private => self.d.as_deref().ok_or(SocsecError::KEY_NOT_PRIVATE)?,
        };
        let len = self.field_len();
        let mut bin = fixed_field(&self.n, len, order)?;
        bin.extend(fixed_field(exp, len, order)?);
        Ok(bin)
    }

    /// Rebuild a public key from a key binary: modulus in the first half,
    /// exponent in the second
    pub fn from_binary(bin: &[u8], order: KeyOrder) -> SocsecResult<Self> {
        if bin.is_empty() || bin.len() % 2 != 0 {
            return Err(SocsecError::KEY_PEM_INVALID);
        }
        let (n, e) = bin.split_at(bin.len() / 2);
        let mut n = n.to_vec();
        let mut e = e.to_vec();
        order.apply(&mut n);
        order.apply(&mut e);
        Self::public(&n, &e)
    }
}
