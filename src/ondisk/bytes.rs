use std::marker::PhantomData;
use serde::ser::{Serialize, Serializer, SerializeTuple};
use serde::de::{Deserialize, Deserializer, SeqAccess, Visitor, Error};

/// Copiable, serializable byte field wider than serde's native array
/// support. Serialises as a fixed tuple, which bincode lays out as the
/// raw bytes.
#[derive(Clone, Copy, Eq)]
pub struct Bytes<const C: usize>(pub [u8; C]);

impl<const C: usize> Bytes<C> {
    pub fn zeroed() -> Self
    {
        Self { 0: [0u8; C] }
    }

    /// Builds a field from a possibly-shorter slice, zero-padded.
    pub fn from_slice(src: &[u8]) -> Self
    {
        let mut out = [0u8; C];
        let n = src.len().min(C);
        out[..n].copy_from_slice(&src[..n]);

        Self { 0: out }
    }

    pub fn as_slice(&self) -> &[u8]
    {
        &self.0
    }
}

impl<const C: usize> Default for Bytes<C> {
    fn default() -> Self
    {
        Self::zeroed()
    }
}

impl<const C: usize> PartialEq for Bytes<C> {
    fn eq(&self, other: &Self) -> bool
    {
        self.0.eq(&other.0)
    }
}

impl<const C: usize> Serialize for Bytes<C> {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer
    {
        let mut seq = serializer.serialize_tuple(C)?;
        for b in &self.0 {
            seq.serialize_element(b)?;
        }

        seq.end()
    }
}

impl<'de, const C: usize> Deserialize<'de> for Bytes<C> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>
    {
        deserializer.deserialize_tuple(C, BytesVisitor { marker: PhantomData })
    }
}

#[derive(Debug)]
struct BytesVisitor<A> {
    marker: PhantomData<A>,
}

impl<'de, const C: usize> Visitor<'de> for BytesVisitor<Bytes<C>> {
    type Value = Bytes<C>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        write!(formatter, "a byte field of length {}", C)
    }

    #[inline]
    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>
    {
        let mut out = Bytes::zeroed();

        for i in 0..C {
            out.0[i] = match seq.next_element()? {
                Some(v) => v,
                None => return Err(Error::invalid_length(i, &self)),
            }
        }

        Ok(out)
    }
}

// The wide fields drown ordinary struct output; show a prefix only.
impl<const C: usize> std::fmt::Debug for Bytes<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        let head = &self.0[..self.0.len().min(8)];

        write!(f, "Bytes<{}>{:02x?}..", C, head)
    }
}


#[cfg(test)]
mod tests {
    use super::Bytes;
    use bincode::{DefaultOptions, Options};

    fn opts() -> impl Options
    {
        DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
    }

    #[test]
    fn layout_is_raw_bytes()
    {
        let b: Bytes<5> = Bytes { 0: [1, 2, 3, 4, 5] };
        let raw = opts().serialize(&b).unwrap();

        assert_eq!(raw, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn roundtrip()
    {
        let b: Bytes<64> = Bytes::from_slice(b"hydra");
        let raw = opts().serialize(&b).unwrap();
        let back: Bytes<64> = opts().deserialize(&raw).unwrap();

        assert_eq!(b, back);
    }

    #[test]
    fn from_slice_pads()
    {
        let b: Bytes<4> = Bytes::from_slice(&[9]);

        assert_eq!(b.as_slice(), &[9, 0, 0, 0]);
    }

    #[test]
    fn from_slice_truncates()
    {
        let b: Bytes<2> = Bytes::from_slice(&[1, 2, 3]);

        assert_eq!(b.as_slice(), &[1, 2]);
    }

    #[test]
    fn short_input_rejected()
    {
        let r: Result<Bytes<8>, _> = opts().deserialize(&[0u8; 4]);

        assert!(r.is_err());
    }
}
