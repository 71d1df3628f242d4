//! Base64 codec with the vault's historical wire behavior.
//!
//! Encoding is standard-alphabet with `=` padding. Decoding is
//! padding-tolerant: the payload length is derived from the position of
//! the first byte outside the alphabet (or the end of input), so blobs
//! that lost their padding still decode. The two translation tables are
//! the module's only state.
//!
//! The container format does not use this codec; it is surface for hosts
//! that persist auxiliary blobs (the settings dialog historically stored
//! hotkey and window state through it).

const BITS_TO_ASCII: [u8; 64] =
  *b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// 0x40 marks bytes outside the alphabet, including `=`.
const INVALID: u8 = 0x40;

const ASCII_TO_BITS: [u8; 256] = build_reverse_table();

const fn build_reverse_table() -> [u8; 256] {
  let mut table = [INVALID; 256];
  let mut i = 0;
  while i < 64 {
    table[BITS_TO_ASCII[i] as usize] = i as u8;
    i += 1;
  }
  table
}

/// Encoded length of `bytes` input bytes, including padding.
pub const fn encoded_len(bytes: usize) -> usize {
  (bytes + 2) / 3 * 4
}

/// Decoded payload length of `text`, scanning to the first byte outside
/// the alphabet or the end of input.
pub fn decoded_len(text: &[u8]) -> usize {
  let valid = valid_prefix_len(text);
  (valid * 3 + 1) / 4
}

fn valid_prefix_len(text: &[u8]) -> usize {
  text
    .iter()
    .position(|&b| ASCII_TO_BITS[b as usize] >= INVALID)
    .unwrap_or(text.len())
}

/// Encodes `data` as padded base64.
pub fn encode(data: &[u8]) -> String {
  let mut out = Vec::with_capacity(encoded_len(data.len()));

  let mut chunks = data.chunks_exact(3);
  for chunk in &mut chunks {
    out.push(BITS_TO_ASCII[(chunk[0] >> 2) as usize]);
    out.push(BITS_TO_ASCII[((chunk[0] & 0x03) << 4 | chunk[1] >> 4) as usize]);
    out.push(BITS_TO_ASCII[((chunk[1] & 0x0F) << 2 | chunk[2] >> 6) as usize]);
    out.push(BITS_TO_ASCII[(chunk[2] & 0x3F) as usize]);
  }

  match *chunks.remainder() {
    [] => {}
    [a] => {
      out.push(BITS_TO_ASCII[(a >> 2) as usize]);
      out.push(BITS_TO_ASCII[((a & 0x03) << 4) as usize]);
      out.push(b'=');
      out.push(b'=');
    }
    [a, b] => {
      out.push(BITS_TO_ASCII[(a >> 2) as usize]);
      out.push(BITS_TO_ASCII[((a & 0x03) << 4 | b >> 4) as usize]);
      out.push(BITS_TO_ASCII[((b & 0x0F) << 2) as usize]);
      out.push(b'=');
    }
    _ => unreachable!("chunks_exact remainder is under 3 bytes"),
  }

  // The alphabet and '=' are ASCII.
  String::from_utf8(out).expect("base64 output is ASCII")
}

/// Decodes the leading base64 payload of `text`. Padding is optional;
/// decoding stops at the first byte outside the alphabet.
pub fn decode(text: &[u8]) -> Vec<u8> {
  let valid = valid_prefix_len(text);
  let text = &text[..valid];
  let mut out = Vec::with_capacity(decoded_len(text));

  let bits = |b: u8| ASCII_TO_BITS[b as usize];

  let mut quads = text.chunks_exact(4);
  for quad in &mut quads {
    out.push(bits(quad[0]) << 2 | bits(quad[1]) >> 4);
    out.push(bits(quad[1]) << 4 | bits(quad[2]) >> 2);
    out.push(bits(quad[2]) << 6 | bits(quad[3]));
  }

  match *quads.remainder() {
    [] => {}
    [a] => {
      // A lone trailing character carries under one byte of data; the
      // historical decoder still emitted its high bits.
      out.push(bits(a) << 2);
    }
    [a, b] => {
      out.push(bits(a) << 2 | bits(b) >> 4);
    }
    [a, b, c] => {
      out.push(bits(a) << 2 | bits(b) >> 4);
      out.push(bits(b) << 4 | bits(c) >> 2);
    }
    _ => unreachable!("chunks_exact remainder is under 4 bytes"),
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_vectors() {
    assert_eq!(encode(b""), "");
    assert_eq!(encode(b"f"), "Zg==");
    assert_eq!(encode(b"fo"), "Zm8=");
    assert_eq!(encode(b"foo"), "Zm9v");
    assert_eq!(encode(b"foob"), "Zm9vYg==");
    assert_eq!(encode(b"fooba"), "Zm9vYmE=");
    assert_eq!(encode(b"foobar"), "Zm9vYmFy");
  }

  #[test]
  fn round_trip_arbitrary_buffers() {
    let mut data = Vec::new();
    for i in 0..257u16 {
      data.push((i.wrapping_mul(31) ^ i >> 3) as u8);
      let encoded = encode(&data);
      assert_eq!(decode(encoded.as_bytes()), data, "len {}", data.len());
    }
  }

  #[test]
  fn decode_tolerates_missing_padding() {
    assert_eq!(decode(b"Zm8"), b"fo");
    assert_eq!(decode(b"Zg"), b"f");
    assert_eq!(decode(b"Zm9vYmE"), b"fooba");
  }

  #[test]
  fn decode_stops_at_foreign_byte() {
    assert_eq!(decode(b"Zm9v\nrest"), b"foo");
    assert_eq!(decoded_len(b"Zm9v\nrest"), 3);
  }

  #[test]
  fn encoded_len_matches() {
    for n in 0..100 {
      assert_eq!(encoded_len(n), encode(&vec![0u8; n]).len());
    }
  }
}
