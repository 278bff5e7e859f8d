use super::error::{Error, Result};
use serde::{
    ser::{
        self, Impossible, SerializeSeq, SerializeStruct, SerializeTuple, SerializeTupleStruct,
    },
    Serialize,
};

/// Type name used for marking a struct as fake-dynamic (dynamic but
/// transparent).
///
/// The characters have no special meaning, they have just been chosen in a way
/// that normal Rust types will never have this name.
const MARK_DYNAMIC_NAME: &str = ":$&_DYNAMIC";

/// PhantomData type to mark a struct/tuple as dynamic, even if its fields
/// content are not dynamic.
///
/// `bytes32` and other fixed-size bytes must be able to write a 32 byte slot
/// through [serde::Serializer::serialize_bytes], so that method cannot be used
/// for the dynamic `bytes` type. Instead `bytes` is serialized as a tuple (see
/// [as_bytes][super::as_bytes]):
/// - A [DynamicMarker] to force the tuple to be dynamic but at the same time
///   transparent (i.e. don't put its content in the Tail and write an offset
///   in Head).
/// - The length (number of bytes without padding)
/// - The data, padded to the [SLOT_SIZE]
///
/// # Important
/// Be careful when using this Type directly. When used wrong the resulting
/// serialized bytes may not represent anything in Solidity.
pub struct DynamicMarker;
impl Serialize for DynamicMarker {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_unit_struct(MARK_DYNAMIC_NAME)
    }
}

pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

/// Used by the size passes, which never write.
struct NoWriter;

impl Writer for NoWriter {
    fn write(&mut self, _: &[u8]) {}
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    /// Don't serialize, just calculate length of Head and whether the type is
    /// dynamic. We need the head size to calculate offsets for dynamic types.
    HeadSize,
    /// First pass: Write the static part (stores the offset for the next
    /// dynamic value)
    Head { offset: usize },
    /// Don't serialize, calculate the length of the dynamic part.
    TailSize,
    /// Second pass: Write the dynamic part
    Tail,
}

pub struct Serializer<'a, W>
where
    W: Writer,
{
    writer: &'a mut W,
    pass: Pass,
    /// Accumulated by [Pass::HeadSize] and [Pass::TailSize].
    size: usize,
    is_dynamic: bool,
    is_fake_dynamic: bool,
}

/// Solidity `abi.encode(value)`.
///
/// Dynamic values are prefixed with the offset of their (only) element, like
/// Solidity does for a single dynamic argument.
pub fn to_writer<T, W>(value: &T, writer: &mut W) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    to_writer_internal(value, writer, true)
}

/// Solidity `abi.encode(a, b, ...)` where the fields of `value` (a struct or
/// tuple) are the individual arguments.
pub fn args_to_writer<T, W>(value: &T, writer: &mut W) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    to_writer_internal(value, writer, false)
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    to_writer(value, &mut buf)?;
    Ok(buf)
}

pub fn args_to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    args_to_writer(value, &mut buf)?;
    Ok(buf)
}

fn to_writer_internal<T, W>(value: &T, writer: &mut W, include_outer_struct: bool) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    let (head_size, is_dynamic, is_fake_dynamic) = compute_size(value)?;

    let mut serializer = Serializer {
        writer,
        pass: Pass::Head { offset: head_size },
        size: 0,
        is_dynamic,
        is_fake_dynamic,
    };

    if is_dynamic && include_outer_struct {
        serializer.write_right_aligned(SLOT_SIZE.to_be_bytes())
    }

    value.serialize(&mut serializer)?;
    if is_dynamic {
        serializer.pass = Pass::Tail;
        value.serialize(&mut serializer)?;
    }
    Ok(())
}

/// Returns `(head_size, is_dynamic, is_fake_dynamic)`.
fn compute_size<T>(value: &T) -> Result<(usize, bool, bool)>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::HeadSize,
        size: 0,
        is_dynamic: false,
        is_fake_dynamic: false,
    };
    value.serialize(&mut serializer)?;
    Ok((
        serializer.size,
        serializer.is_dynamic,
        serializer.is_fake_dynamic,
    ))
}

fn compute_tail_size<T>(value: &T) -> Result<usize>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::TailSize,
        size: 0,
        is_dynamic: false,
        is_fake_dynamic: false,
    };
    value.serialize(&mut serializer)?;
    Ok(serializer.size)
}

pub(super) const SLOT_SIZE: usize = 32; // bytes

/// Number of bytes `len` bytes occupy when padded to full slots.
fn padded_len(len: usize) -> usize {
    len.div_ceil(SLOT_SIZE) * SLOT_SIZE
}

impl<'a, W> Serializer<'a, W>
where
    W: Writer,
{
    // Panics if v.len() > SLOT_SIZE
    fn write_left_aligned_slice(&mut self, v: &[u8]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[..v.len()].copy_from_slice(v);
        self.writer.write(bytes.as_slice());
    }

    // Panics if N > SLOT_SIZE
    fn write_right_aligned<const N: usize>(&mut self, v: [u8; N]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[SLOT_SIZE - N..].copy_from_slice(v.as_slice());
        self.writer.write(bytes.as_slice())
    }

    fn serialize_with<T>(&mut self, value: &T, pass: Pass) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (_, is_dynamic, is_fake_dynamic) = compute_size(value)?;
        let mut serializer = Serializer {
            writer: &mut *self.writer,
            pass,
            size: 0,
            is_dynamic,
            is_fake_dynamic,
        };
        value.serialize(&mut serializer)
    }

    fn static_value<const N: usize>(&mut self, v: [u8; N]) -> Result<()> {
        match self.pass {
            Pass::HeadSize => self.size += SLOT_SIZE,
            Pass::Head { .. } => self.write_right_aligned(v),
            Pass::TailSize | Pass::Tail => {}
        }
        Ok(())
    }

    /// Write the entire element in [Pass::Head] if it is static, or only its
    /// offset in [Pass::Head] and its content in [Pass::Tail] if it isn't.
    ///
    /// `offset_base` is subtracted from the offsets written for dynamic
    /// elements. Sequence offsets do not count the length slot, struct/tuple
    /// offsets count from the start of the head.
    fn serialize_member<T>(&mut self, value: &T, offset_base: usize) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (element_head_size, is_dyn, is_fake_dynamic) = compute_size(value)?;
        let indirect = is_dyn && !is_fake_dynamic;
        match self.pass {
            Pass::HeadSize => {
                self.size += if indirect {
                    SLOT_SIZE
                } else {
                    element_head_size
                };
                self.is_dynamic |= is_dyn || is_fake_dynamic;
                Ok(())
            }
            Pass::Head { offset } => {
                if indirect {
                    self.write_right_aligned((offset - offset_base).to_be_bytes());
                    self.pass = Pass::Head {
                        offset: offset + element_head_size + compute_tail_size(value)?,
                    };
                    Ok(())
                } else {
                    self.serialize_with(
                        value,
                        Pass::Head {
                            offset: element_head_size,
                        },
                    )
                }
            }
            Pass::TailSize => {
                let element_tail_size = compute_tail_size(value)?;
                self.size += if indirect { element_head_size } else { 0 } + element_tail_size;
                Ok(())
            }
            Pass::Tail => {
                if indirect {
                    // The offset given here does not affect the sequence this
                    // element is part of, it is the base for the offsets
                    // written by the element's own children.
                    self.serialize_with(
                        value,
                        Pass::Head {
                            offset: element_head_size,
                        },
                    )?;
                    self.serialize_with(value, Pass::Tail)
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl<'a, 'b, W> ser::Serializer for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Impossible<(), Error>;
    type SerializeMap = Impossible<(), Error>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Impossible<(), Error>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.serialize_u8(u8::from(v))
    }

    fn serialize_i8(self, _: i8) -> Result<()> {
        Err(Error::TypeNotRepresentable("i8"))
    }

    fn serialize_i16(self, _: i16) -> Result<()> {
        Err(Error::TypeNotRepresentable("i16"))
    }

    fn serialize_i32(self, _: i32) -> Result<()> {
        Err(Error::TypeNotRepresentable("i32"))
    }

    fn serialize_i64(self, _: i64) -> Result<()> {
        Err(Error::TypeNotRepresentable("i64"))
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.static_value(v.to_be_bytes())
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.static_value(v.to_be_bytes())
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.static_value(v.to_be_bytes())
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.static_value(v.to_be_bytes())
    }

    fn serialize_u128(self, v: u128) -> Result<()> {
        self.static_value(v.to_be_bytes())
    }

    fn serialize_f32(self, _: f32) -> Result<()> {
        Err(Error::TypeNotRepresentable("f32"))
    }

    fn serialize_f64(self, _: f64) -> Result<()> {
        Err(Error::TypeNotRepresentable("f64"))
    }

    fn serialize_char(self, _: char) -> Result<()> {
        Err(Error::TypeNotRepresentable("char"))
    }

    fn serialize_str(self, _: &str) -> Result<()> {
        Err(Error::TypeNotRepresentable("str"))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        match self.pass {
            Pass::HeadSize => self.size += padded_len(v.len()),
            Pass::Head { .. } => {
                let iter = v.chunks_exact(SLOT_SIZE);
                let rem = iter.remainder();
                for chunk in iter {
                    self.writer.write(chunk);
                }
                if !rem.is_empty() {
                    self.write_left_aligned_slice(rem);
                }
            }
            Pass::TailSize | Pass::Tail => {}
        }
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("none"))
    }

    fn serialize_some<T: ?Sized>(self, _: &T) -> Result<()>
    where
        T: Serialize,
    {
        Err(Error::TypeNotRepresentable("some"))
    }

    fn serialize_unit(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit"))
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<()> {
        if name != MARK_DYNAMIC_NAME {
            return Err(Error::TypeNotRepresentable("unit struct"));
        }
        if let Pass::HeadSize = self.pass {
            self.is_fake_dynamic = true;
        }
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit variant (enum)"))
    }

    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.serialize_member(value, 0)
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<()>
    where
        T: Serialize,
    {
        Err(Error::TypeNotRepresentable("newtype variant (enum)"))
    }

    fn serialize_seq(self, size: Option<usize>) -> Result<Self::SerializeSeq> {
        match self.pass {
            Pass::HeadSize => {
                self.is_dynamic = true;
                self.size += SLOT_SIZE;
            }
            Pass::Head { .. } => {
                let size = size.ok_or(Error::TypeNotRepresentable("sequence of unknown length"))?;
                self.write_right_aligned(size.to_be_bytes());
            }
            Pass::TailSize | Pass::Tail => {}
        }
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::TypeNotRepresentable("struct variant"))
    }

    fn collect_str<T: ?Sized>(self, _value: &T) -> Result<()>
    where
        T: core::fmt::Display,
    {
        Err(Error::TypeNotRepresentable("str"))
    }
}

impl<'a, 'b, W> SerializeSeq for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        // The length slot of the array is not part of the offsets of its
        // dynamic elements.
        Serializer::serialize_member(self, value, SLOT_SIZE)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTuple for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        Serializer::serialize_member(self, value, 0)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTupleStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        Serializer::serialize_member(self, value, 0)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        Serializer::serialize_member(self, value, 0)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}
