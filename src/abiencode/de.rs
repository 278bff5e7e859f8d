//! Reading values back out of abi encoded data.
//!
//! The encoder is driven by serde, the decoder is not: the layout of a Solidity
//! value cannot be recovered from the bytes alone, so callers read the fields
//! in order, the same way `abi.decode` is given a list of types.

use super::{
    error::{Error, Result},
    ser::SLOT_SIZE,
    types::{Address, Bytes32, Hash, U256},
};

#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    /// Offsets of dynamic values are relative to this position.
    base: usize,
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            base: 0,
            pos: 0,
        }
    }

    fn at(&self, base: usize) -> Self {
        Self {
            data: self.data,
            base,
            pos: base,
        }
    }

    fn word(&mut self) -> Result<&'a [u8]> {
        let end = self.pos + SLOT_SIZE;
        let word = self
            .data
            .get(self.pos..end)
            .ok_or(Error::UnexpectedEnd { offset: self.pos })?;
        self.pos = end;
        Ok(word)
    }

    fn usize(&mut self, what: &'static str) -> Result<usize> {
        let v = self.u256()?;
        if v > U256::from(u32::MAX) {
            return Err(Error::InvalidValue(what));
        }
        Ok(v.as_usize())
    }

    pub fn u256(&mut self) -> Result<U256> {
        Ok(U256::from_big_endian(self.word()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let v = self.u256()?;
        if v > U256::from(u64::MAX) {
            return Err(Error::InvalidValue("uint64"));
        }
        Ok(v.as_u64())
    }

    pub fn u8(&mut self) -> Result<u8> {
        let v = self.u256()?;
        if v > U256::from(u8::MAX) {
            return Err(Error::InvalidValue("uint8"));
        }
        Ok(v.low_u32() as u8)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::InvalidValue("bool")),
        }
    }

    pub fn address(&mut self) -> Result<Address> {
        let word = self.word()?;
        if word[..SLOT_SIZE - 20].iter().any(|b| *b != 0) {
            return Err(Error::InvalidValue("address"));
        }
        Address::try_from(&word[SLOT_SIZE - 20..])
    }

    pub fn hash(&mut self) -> Result<Hash> {
        Hash::try_from(self.word()?)
    }

    pub fn bytes32(&mut self) -> Result<Bytes32> {
        Bytes32::try_from(self.word()?)
    }

    /// Follow the offset in the current slot and return a decoder for the
    /// dynamic value it points to.
    pub fn dynamic(&mut self) -> Result<Decoder<'a>> {
        let offset = self.usize("offset")?;
        let start = self.base + offset;
        if start > self.data.len() {
            return Err(Error::UnexpectedEnd { offset: start });
        }
        Ok(self.at(start))
    }

    /// Decode a dynamic array `T[]`. `f` is called once per element with a
    /// decoder positioned at the element's head.
    pub fn array<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Decoder<'a>) -> Result<T>,
    {
        let mut inner = self.dynamic()?;
        let len = inner.usize("array length")?;
        // Every element occupies at least one slot in the head.
        if len > (self.data.len() - inner.pos) / SLOT_SIZE {
            return Err(Error::UnexpectedEnd { offset: inner.pos });
        }
        let mut elements = inner.at(inner.pos);
        (0..len).map(|_| f(&mut elements)).collect()
    }

    /// Decode dynamic `bytes`.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let mut inner = self.dynamic()?;
        let len = inner.usize("bytes length")?;
        let start = inner.pos;
        self.data
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(Error::UnexpectedEnd { offset: start })
    }
}
