//! Password generator.
//!
//! Builds an alphabet from the character classes a [`GeneratorSpec`]
//! enables, then draws each password character uniformly from it with the
//! engine CSPRNG. The uniform draw uses explicit modulo-bias rejection.

use crate::error::VaultError;
use crate::models::{GeneratorSpec, ASCII_LETTERS, ASCII_NUMBERS, ASCII_SPECIAL};
use crate::rng::EntropyPool;

/// Concatenates the enabled character classes, sorts and deduplicates.
///
/// Fails with [`VaultError::BadAlphabet`] if the result is empty or
/// contains any non-printable or whitespace byte. Multibyte characters
/// are unsupported.
pub fn build_alphabet(spec: &GeneratorSpec) -> Result<Vec<u8>, VaultError> {
  let mut alphabet = Vec::new();

  if spec.use_letters {
    alphabet.extend_from_slice(ASCII_LETTERS);
  }
  if spec.use_numbers {
    alphabet.extend_from_slice(ASCII_NUMBERS);
  }
  if spec.use_special {
    alphabet.extend_from_slice(ASCII_SPECIAL);
  }
  if spec.use_extra {
    alphabet.extend_from_slice(spec.extra_alphabet.as_bytes());
  }

  alphabet.sort_unstable();
  alphabet.dedup();

  if alphabet.is_empty() {
    return Err(VaultError::BadAlphabet);
  }

  // Printable ASCII excluding space; anything else (including the lead
  // bytes of multibyte characters) is rejected.
  if alphabet.iter().any(|&b| !(0x21..=0x7E).contains(&b)) {
    return Err(VaultError::BadAlphabet);
  }

  Ok(alphabet)
}

/// Generates a password of `spec.password_length` characters drawn
/// uniformly from the constructed alphabet.
pub fn generate_password(spec: &GeneratorSpec, rng: &mut EntropyPool) -> Result<String, VaultError> {
  let alphabet = build_alphabet(spec)?;

  let mut password = String::with_capacity(spec.password_length as usize);
  for _ in 0..spec.password_length {
    password.push(alphabet[uniform_index(rng, alphabet.len())] as char);
  }

  Ok(password)
}

/// Estimated password strength in bits: `length · log2(sum of enabled
/// class sizes)`. The classes are not deduplicated against each other;
/// the figure is advisory, for display only.
pub fn calculate_bit_strength(spec: &GeneratorSpec) -> f64 {
  let mut base = 0.0;

  if spec.use_letters {
    base += ASCII_LETTERS.len() as f64;
  }
  if spec.use_numbers {
    base += ASCII_NUMBERS.len() as f64;
  }
  if spec.use_special {
    base += ASCII_SPECIAL.len() as f64;
  }
  if spec.use_extra {
    base += spec.extra_alphabet.len() as f64;
  }

  if base <= 0.0 {
    return 0.0;
  }

  f64::from(spec.password_length) * base.log2()
}

/// Uniform draw from `[0, n)` with rejection of the biased tail.
fn uniform_index(rng: &mut EntropyPool, n: usize) -> usize {
  debug_assert!(n > 0);
  let n = n as u64;

  // Largest multiple of n representable in u64; draws at or above it
  // would favour small residues, so they are rejected and redrawn.
  let limit = (u64::MAX / n) * n;

  loop {
    let draw = rng.next_u64();
    if draw < limit {
      return (draw % n) as usize;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn extra_only(extra: &str, length: u16) -> GeneratorSpec {
    GeneratorSpec {
      extra_alphabet: extra.to_string(),
      password_length: length,
      use_letters: false,
      use_numbers: false,
      use_special: false,
      use_extra: true,
    }
  }

  #[test]
  fn alphabet_is_sorted_and_unique() {
    let spec = GeneratorSpec {
      extra_alphabet: "cba0".to_string(),
      use_extra: true,
      ..GeneratorSpec::default()
    };

    let alphabet = build_alphabet(&spec).expect("alphabet");
    let mut sorted = alphabet.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(alphabet, sorted);

    // '0' overlaps the numbers class and must appear once.
    assert_eq!(alphabet.iter().filter(|&&b| b == b'0').count(), 1);
  }

  #[test]
  fn empty_alphabet_rejected() {
    let spec = GeneratorSpec {
      use_letters: false,
      use_numbers: false,
      ..GeneratorSpec::default()
    };
    assert_eq!(build_alphabet(&spec), Err(VaultError::BadAlphabet));
  }

  #[test]
  fn whitespace_and_multibyte_rejected() {
    assert_eq!(
      build_alphabet(&extra_only("ab c", 8)),
      Err(VaultError::BadAlphabet)
    );
    assert_eq!(
      build_alphabet(&extra_only("aé", 8)),
      Err(VaultError::BadAlphabet)
    );
    assert_eq!(
      build_alphabet(&extra_only("a\tb", 8)),
      Err(VaultError::BadAlphabet)
    );
  }

  #[test]
  fn generated_characters_stay_in_alphabet() {
    let mut rng = EntropyPool::from_seed(b"generator test");
    let spec = extra_only("abc", 64);

    let password = generate_password(&spec, &mut rng).expect("generate");
    assert_eq!(password.len(), 64);
    assert!(password.chars().all(|c| matches!(c, 'a' | 'b' | 'c')));
  }

  #[test]
  fn uniform_draw_is_close_to_uniform() {
    // L1 distance from uniform bounded by 4 * sqrt(k / N).
    let mut rng = EntropyPool::from_seed(b"uniformity");
    let k = 5usize;
    let n = 100_000usize;

    let mut counts = vec![0u32; k];
    for _ in 0..n {
      counts[uniform_index(&mut rng, k)] += 1;
    }

    let expected = n as f64 / k as f64;
    let l1: f64 = counts
      .iter()
      .map(|&c| (f64::from(c) - expected).abs() / n as f64)
      .sum();

    assert!(l1 <= 4.0 * (k as f64 / n as f64).sqrt(), "l1 = {l1}");
  }

  #[test]
  fn bit_strength_sums_nominal_class_sizes() {
    let spec = GeneratorSpec {
      password_length: 20,
      use_letters: true,
      use_numbers: true,
      ..GeneratorSpec::default()
    };
    let strength = calculate_bit_strength(&spec);
    assert!((strength - 20.0 * 62f64.log2()).abs() < 1e-9);

    let none = GeneratorSpec {
      use_letters: false,
      use_numbers: false,
      ..GeneratorSpec::default()
    };
    assert_eq!(calculate_bit_strength(&none), 0.0);
  }
}
