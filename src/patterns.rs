//! Fault-detection passes and their registry.
//!
//! # Contract
//!
//! Every detector takes the two equal-length comparison halves of a region
//! plus a pattern RNG, and returns the number of mismatching words it
//! observed (0 = pass). Detectors are self-contained: each one seeds both
//! halves itself before perturbing them, so masking any subset in or out
//! never changes another detector's verdict.
//!
//! The stuck-address check is separate from the registry: it scans the whole
//! region (not the half-pair) for address-line faults and always runs.
//!
//! # Volatile Access
//!
//! All pattern traffic goes through `read_volatile`/`write_volatile`. The
//! point of the exercise is to put real load/store cycles on the DRAM; an
//! optimizer that keeps a pattern in registers or elides a "redundant" store
//! would silently test nothing.

use std::ptr;

use crate::region::{Word, WORD_BYTES};
use crate::rng::XorShift64;

const WORD_BITS: usize = Word::BITS as usize;
const ONE: Word = 1;

/// A word where every byte is 0x01; multiplying by a byte value replicates
/// that byte across the word.
const BYTE_SPREAD: Word = Word::MAX / 0xff;

/// 0101... alternating-bit pattern.
const CHECKER: Word = BYTE_SPREAD.wrapping_mul(0x55);

// ============================================================================
// Registry
// ============================================================================

/// Detector call signature: (half-A, half-B, pattern RNG) -> mismatch count.
pub type DetectorFn = fn(&mut [Word], &mut [Word], &mut XorShift64) -> u64;

/// One named entry in the detector registry.
pub struct TestDescriptor {
    pub name: &'static str,
    pub run: DetectorFn,
}

/// The fixed, ordered detector suite.
///
/// An environment-supplied bitmask selects entries by index (bit i enables
/// entry i); a zero/absent mask enables everything.
pub const REGISTRY: &[TestDescriptor] = &[
    TestDescriptor { name: "Random Value", run: random_value },
    TestDescriptor { name: "Compare XOR", run: compare_xor },
    TestDescriptor { name: "Compare SUB", run: compare_sub },
    TestDescriptor { name: "Compare MUL", run: compare_mul },
    TestDescriptor { name: "Compare DIV", run: compare_div },
    TestDescriptor { name: "Compare OR", run: compare_or },
    TestDescriptor { name: "Compare AND", run: compare_and },
    TestDescriptor { name: "Sequential Increment", run: seq_increment },
    TestDescriptor { name: "Solid Bits", run: solid_bits },
    TestDescriptor { name: "Block Sequential", run: block_sequential },
    TestDescriptor { name: "Checkerboard", run: checkerboard },
    TestDescriptor { name: "Bit Spread", run: bit_spread },
    TestDescriptor { name: "Bit Flip", run: bit_flip },
    TestDescriptor { name: "Walking Ones", run: walking_ones },
    TestDescriptor { name: "Walking Zeroes", run: walking_zeroes },
    TestDescriptor { name: "8-bit Writes", run: narrow_writes_8 },
    TestDescriptor { name: "16-bit Writes", run: narrow_writes_16 },
];

/// Whether registry entry `index` runs under `mask` (0 = run everything).
#[inline]
pub fn mask_enables(mask: u64, index: usize) -> bool {
    mask == 0 || index < 64 && (mask >> index) & 1 == 1
}

// ============================================================================
// Volatile plumbing
// ============================================================================

/// Write the same generated word to position `i` of both halves.
#[inline]
fn fill_pair(a: &mut [Word], b: &mut [Word], mut value: impl FnMut(usize) -> Word) {
    debug_assert_eq!(a.len(), b.len(), "comparison halves must match");
    let pa = a.as_mut_ptr();
    let pb = b.as_mut_ptr();
    for i in 0..a.len() {
        let v = value(i);
        // SAFETY: i < len of both slices; pointers come from live &mut borrows.
        unsafe {
            ptr::write_volatile(pa.add(i), v);
            ptr::write_volatile(pb.add(i), v);
        }
    }
}

/// Volatile read-modify-write of both halves with the same operation.
#[inline]
fn apply_pair(a: &mut [Word], b: &mut [Word], op: impl Fn(Word) -> Word) {
    debug_assert_eq!(a.len(), b.len(), "comparison halves must match");
    let pa = a.as_mut_ptr();
    let pb = b.as_mut_ptr();
    for i in 0..a.len() {
        // SAFETY: i < len of both slices.
        unsafe {
            ptr::write_volatile(pa.add(i), op(ptr::read_volatile(pa.add(i))));
            ptr::write_volatile(pb.add(i), op(ptr::read_volatile(pb.add(i))));
        }
    }
}

/// Count words where the two halves disagree.
#[inline]
fn compare_pair(a: &[Word], b: &[Word]) -> u64 {
    debug_assert_eq!(a.len(), b.len(), "comparison halves must match");
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut faults = 0u64;
    for i in 0..a.len() {
        // SAFETY: i < len of both slices.
        unsafe {
            if ptr::read_volatile(pa.add(i)) != ptr::read_volatile(pb.add(i)) {
                faults += 1;
            }
        }
    }
    faults
}

/// Seed both halves with one identical random stream.
#[inline]
fn seed_pair(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) {
    fill_pair(a, b, |_| rng.next_word());
}

/// `1 << n`, or 0 once the bit walks off the word. Keeps the walking and
/// spread patterns well-defined at the edges without undefined shifts.
#[inline]
fn bit(n: usize) -> Word {
    if n < WORD_BITS {
        ONE << n
    } else {
        0
    }
}

// ============================================================================
// Stuck-address check
// ============================================================================

/// Address-line integrity: write each cell its own address (or complement),
/// then verify. A cell that reads back some other cell's address pattern
/// exposes a stuck or shorted address line.
pub fn stuck_address(region: &mut [Word]) -> u64 {
    let p = region.as_mut_ptr();
    let len = region.len();
    let mut faults = 0u64;

    for round in 0..16 {
        for i in 0..len {
            // SAFETY: i < len.
            unsafe {
                let cell = p.add(i);
                let pattern = if (round + i) % 2 == 0 {
                    cell as Word
                } else {
                    !(cell as Word)
                };
                ptr::write_volatile(cell, pattern);
            }
        }
        for i in 0..len {
            // SAFETY: i < len.
            unsafe {
                let cell = p.add(i);
                let expected = if (round + i) % 2 == 0 {
                    cell as Word
                } else {
                    !(cell as Word)
                };
                if ptr::read_volatile(cell) != expected {
                    faults += 1;
                }
            }
        }
    }
    faults
}

// ============================================================================
// Detectors
// ============================================================================

fn random_value(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    seed_pair(a, b, rng);
    compare_pair(a, b)
}

/// Seed, apply one arithmetic/logic operation with a random operand to both
/// halves, compare. Shared shape of the six Compare-* detectors.
#[inline]
fn compare_with_op(
    a: &mut [Word],
    b: &mut [Word],
    rng: &mut XorShift64,
    op: impl Fn(Word, Word) -> Word,
) -> u64 {
    seed_pair(a, b, rng);
    let q = rng.next_word();
    apply_pair(a, b, |w| op(w, q));
    compare_pair(a, b)
}

fn compare_xor(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w ^ q)
}

fn compare_sub(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w.wrapping_sub(q))
}

fn compare_mul(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w.wrapping_mul(q))
}

fn compare_div(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w / q.max(1))
}

fn compare_or(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w | q)
}

fn compare_and(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    compare_with_op(a, b, rng, |w, q| w & q)
}

fn seq_increment(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    let base = rng.next_word();
    fill_pair(a, b, |i| base.wrapping_add(i as Word));
    compare_pair(a, b)
}

/// All-ones / all-zeroes, inverted per word and per round.
fn solid_bits(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for round in 0..WORD_BITS {
        let q: Word = if round % 2 == 0 { !0 } else { 0 };
        fill_pair(a, b, |i| if i % 2 == 0 { q } else { !q });
        faults += compare_pair(a, b);
    }
    faults
}

/// Every word of a round holds one byte value replicated; 256 rounds cover
/// the full byte range.
fn block_sequential(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for byte in 0..=0xffu16 {
        let q = BYTE_SPREAD.wrapping_mul(byte as Word);
        fill_pair(a, b, |_| q);
        faults += compare_pair(a, b);
    }
    faults
}

fn checkerboard(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for round in 0..WORD_BITS {
        let q = if round % 2 == 0 { CHECKER } else { !CHECKER };
        fill_pair(a, b, |i| if i % 2 == 0 { q } else { !q });
        faults += compare_pair(a, b);
    }
    faults
}

/// Two set bits (two apart) sweeping up the word and back down, alternated
/// with the complement per word. Targets coupling between nearby lines.
fn bit_spread(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for round in 0..WORD_BITS * 2 {
        let k = if round < WORD_BITS {
            round
        } else {
            2 * WORD_BITS - 1 - round
        };
        let q = bit(k) | bit(k + 2);
        fill_pair(a, b, |i| if i % 2 == 0 { q } else { !q });
        faults += compare_pair(a, b);
    }
    faults
}

/// Each single-bit pattern and its complement, re-inverted eight times.
fn bit_flip(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for k in 0..WORD_BITS {
        let mut q = bit(k);
        for _ in 0..8 {
            q = !q;
            fill_pair(a, b, |i| if i % 2 == 0 { q } else { !q });
            faults += compare_pair(a, b);
        }
    }
    faults
}

/// A single zero bit walking through all-ones, up then back down.
fn walking_ones(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for round in 0..WORD_BITS * 2 {
        let k = if round < WORD_BITS {
            round
        } else {
            2 * WORD_BITS - 1 - round
        };
        let q = !bit(k);
        fill_pair(a, b, |_| q);
        faults += compare_pair(a, b);
    }
    faults
}

/// A single one bit walking through all-zeroes, up then back down.
fn walking_zeroes(a: &mut [Word], b: &mut [Word], _rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    for round in 0..WORD_BITS * 2 {
        let k = if round < WORD_BITS {
            round
        } else {
            2 * WORD_BITS - 1 - round
        };
        let q = bit(k);
        fill_pair(a, b, |_| q);
        faults += compare_pair(a, b);
    }
    faults
}

/// One half written word-at-a-time, the other byte-at-a-time with the same
/// values, then compared; repeated with the roles swapped. Exercises the
/// narrow-write path of the memory controller.
fn narrow_writes_8(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    narrow8_round(a, b, rng);
    faults += compare_pair(a, b);
    narrow8_round(b, a, rng);
    faults += compare_pair(a, b);
    faults
}

/// As [`narrow_writes_8`], with 16-bit writes.
fn narrow_writes_16(a: &mut [Word], b: &mut [Word], rng: &mut XorShift64) -> u64 {
    let mut faults = 0;
    narrow16_round(a, b, rng);
    faults += compare_pair(a, b);
    narrow16_round(b, a, rng);
    faults += compare_pair(a, b);
    faults
}

fn narrow8_round(wordwise: &mut [Word], bytewise: &mut [Word], rng: &mut XorShift64) {
    debug_assert_eq!(wordwise.len(), bytewise.len());
    let pw = wordwise.as_mut_ptr();
    let pb = bytewise.as_mut_ptr().cast::<u8>();
    for i in 0..wordwise.len() {
        let v = rng.next_word();
        // SAFETY: i < word count; the byte view spans exactly the same region.
        unsafe {
            ptr::write_volatile(pw.add(i), v);
            for (k, &byte) in v.to_ne_bytes().iter().enumerate() {
                ptr::write_volatile(pb.add(i * WORD_BYTES + k), byte);
            }
        }
    }
}

fn narrow16_round(wordwise: &mut [Word], halfwise: &mut [Word], rng: &mut XorShift64) {
    debug_assert_eq!(wordwise.len(), halfwise.len());
    const HALVES_PER_WORD: usize = WORD_BYTES / 2;
    let pw = wordwise.as_mut_ptr();
    let ph = halfwise.as_mut_ptr().cast::<u16>();
    for i in 0..wordwise.len() {
        let v = rng.next_word();
        let bytes = v.to_ne_bytes();
        // SAFETY: i < word count; the u16 view spans exactly the same region
        // and the mapping base is word-aligned, hence u16-aligned.
        unsafe {
            ptr::write_volatile(pw.add(i), v);
            for (k, pair) in bytes.chunks_exact(2).enumerate() {
                let h = u16::from_ne_bytes([pair[0], pair[1]]);
                ptr::write_volatile(ph.add(i * HALVES_PER_WORD + k), h);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
