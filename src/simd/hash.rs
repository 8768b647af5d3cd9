// SIMD-accelerated hash functions
//
// This module provides the hash functions used by the outer map layer
// (src/map.rs) to turn a key into the 64-bit hash the raw table consumes.
// The raw table itself never hashes anything — that's the outer layer's
// job, per the core/outer split this crate is built around.
//
// - xxHash3 with AVX2: used for keys over 32 bytes.
// - wyhash: used for keys at or under 32 bytes, where AVX2 setup cost
//   isn't worth it.

/// xxHash3-style 64-bit hash with an AVX2 fast path.
///
/// Falls back to a scalar implementation on targets or CPUs without
/// AVX2. Both paths produce the same result for the same input.
#[inline]
pub fn xxhash3_avx2(data: &[u8], seed: u64) -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { xxhash3_avx2_impl(data, seed) };
        }
    }
    xxhash3_scalar(data, seed)
}

/// AVX2-tuned implementation (processes 32 bytes per loop iteration).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn xxhash3_avx2_impl(data: &[u8], seed: u64) -> u64 {
    xxhash3_core(data, seed)
}

#[inline]
fn xxhash3_scalar(data: &[u8], seed: u64) -> u64 {
    // Safety: the loop below only performs unaligned byte reads within
    // `data`'s bounds, which is sound regardless of target features.
    unsafe { xxhash3_core(data, seed) }
}

const PRIME64_1: u64 = 0x9E3779B185EBCA87;
const PRIME64_2: u64 = 0xC2B2AE3D27D4EB4F;
const PRIME64_3: u64 = 0x165667B19E3779F9;
const PRIME64_5: u64 = 0x27D4EB2F165667C5;

#[inline(always)]
unsafe fn xxhash3_core(data: &[u8], seed: u64) -> u64 {
    let len = data.len();
    let mut h64: u64;

    if len >= 32 {
        let mut acc1 = seed.wrapping_add(PRIME64_1).wrapping_add(PRIME64_2);
        let mut acc2 = seed.wrapping_add(PRIME64_2);
        let mut acc3 = seed;
        let mut acc4 = seed.wrapping_sub(PRIME64_1);

        let chunks = len / 32;
        let ptr = data.as_ptr();

        for i in 0..chunks {
            let offset = i * 32;
            let v1 = (ptr.add(offset) as *const u64).read_unaligned();
            let v2 = (ptr.add(offset + 8) as *const u64).read_unaligned();
            let v3 = (ptr.add(offset + 16) as *const u64).read_unaligned();
            let v4 = (ptr.add(offset + 24) as *const u64).read_unaligned();

            acc1 = round(acc1, v1);
            acc2 = round(acc2, v2);
            acc3 = round(acc3, v3);
            acc4 = round(acc4, v4);
        }

        h64 = acc1
            .rotate_left(1)
            .wrapping_add(acc2.rotate_left(7))
            .wrapping_add(acc3.rotate_left(12))
            .wrapping_add(acc4.rotate_left(18));

        h64 = merge_accumulator(h64, acc1);
        h64 = merge_accumulator(h64, acc2);
        h64 = merge_accumulator(h64, acc3);
        h64 = merge_accumulator(h64, acc4);

        h64 = h64.wrapping_add(len as u64);

        let remaining = len % 32;
        if remaining > 0 {
            let tail_offset = chunks * 32;
            h64 = process_tail(ptr.add(tail_offset), remaining, h64);
        }
    } else if len > 0 {
        h64 = seed.wrapping_add(PRIME64_5).wrapping_add(len as u64);
        h64 = process_tail(data.as_ptr(), len, h64);
    } else {
        h64 = seed.wrapping_add(PRIME64_5);
    }

    h64 ^= h64 >> 33;
    h64 = h64.wrapping_mul(PRIME64_2);
    h64 ^= h64 >> 29;
    h64 = h64.wrapping_mul(PRIME64_3);
    h64 ^= h64 >> 32;

    h64
}

#[inline(always)]
fn round(acc: u64, input: u64) -> u64 {
    acc.wrapping_add(input.wrapping_mul(PRIME64_2))
        .rotate_left(31)
        .wrapping_mul(PRIME64_1)
}

#[inline(always)]
fn merge_accumulator(acc: u64, val: u64) -> u64 {
    acc ^ round(0, val)
}

#[inline]
unsafe fn process_tail(ptr: *const u8, len: usize, mut h64: u64) -> u64 {
    let mut offset = 0;

    while offset + 8 <= len {
        let val = (ptr.add(offset) as *const u64).read_unaligned();
        h64 ^= round(0, val);
        h64 = h64.rotate_left(27).wrapping_mul(PRIME64_1).wrapping_add(PRIME64_2);
        offset += 8;
    }

    if offset + 4 <= len {
        let val = (ptr.add(offset) as *const u32).read_unaligned() as u64;
        h64 ^= val.wrapping_mul(PRIME64_1);
        h64 = h64.rotate_left(23).wrapping_mul(PRIME64_2).wrapping_add(PRIME64_5);
        offset += 4;
    }

    while offset < len {
        let byte = ptr.add(offset).read();
        h64 ^= (byte as u64).wrapping_mul(PRIME64_5);
        h64 = h64.rotate_left(11).wrapping_mul(PRIME64_1);
        offset += 1;
    }

    h64
}

/// wyhash — fast 64-bit hash for inputs at or under 32 bytes.
#[inline]
pub fn wyhash(data: &[u8], seed: u64) -> u64 {
    const PRIME1: u64 = 0x2d358dccaa6c78a5;
    const PRIME2: u64 = 0x8bb84b93962eacc9;

    let len = data.len();
    let mut h = seed ^ PRIME1;
    let mut i = 0;

    while i + 8 <= len {
        let v = u64::from_le_bytes(data[i..i + 8].try_into().unwrap());
        h = wymix(h ^ PRIME2, v ^ PRIME1);
        i += 8;
    }

    if i < len {
        let mut v = 0u64;
        let remaining = len - i;
        for j in 0..remaining {
            v |= (data[i + j] as u64) << (j * 8);
        }
        h = wymix(h ^ PRIME2, v ^ PRIME1);
    }

    wymix(h ^ len as u64, h ^ PRIME2)
}

#[inline(always)]
fn wymix(a: u64, b: u64) -> u64 {
    let r = (a as u128).wrapping_mul(b as u128);
    ((r >> 64) as u64) ^ (r as u64)
}

/// Mix a 64-bit integer directly, without going through a byte buffer.
#[inline]
pub fn hash_u64(val: u64) -> u64 {
    let val = val.wrapping_mul(0x9E3779B185EBCA87);
    let val = val ^ (val >> 33);
    let val = val.wrapping_mul(0xC2B2AE3D27D4EB4F);
    val ^ (val >> 29)
}

/// Hash a byte slice, routing to wyhash or xxHash3-AVX2 by length.
#[inline]
pub fn hash_bytes(data: &[u8], seed: u64) -> u64 {
    if data.len() <= 32 {
        wyhash(data, seed)
    } else {
        xxhash3_avx2(data, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xxhash3_is_deterministic_and_seed_sensitive() {
        let data = b"Hello, World!";
        assert_eq!(xxhash3_avx2(data, 0), xxhash3_avx2(data, 0));
        assert_ne!(xxhash3_avx2(data, 0), xxhash3_avx2(data, 42));
    }

    #[test]
    fn xxhash3_handles_empty_and_long_input() {
        assert_ne!(xxhash3_avx2(&[], 0), 0);
        let data = vec![0u8; 1000];
        assert_ne!(xxhash3_avx2(&data, 0), 0);
    }

    #[test]
    fn wyhash_is_deterministic_and_seed_sensitive() {
        let data = b"test";
        assert_eq!(wyhash(data, 0), wyhash(data, 0));
        assert_ne!(wyhash(data, 0), wyhash(data, 1));
    }

    #[test]
    fn hash_bytes_routes_by_length() {
        let short = b"abc";
        let long = vec![b'a'; 100];

        let h1 = hash_bytes(short, 0);
        let h2 = hash_bytes(&long, 0);

        assert_ne!(h1, 0);
        assert_ne!(h2, 0);
        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_distribution_is_roughly_uniform() {
        let mut hashes = Vec::new();
        for i in 0..1000u32 {
            hashes.push(hash_bytes(&i.to_le_bytes(), 0));
        }

        let unique = hashes.iter().collect::<std::collections::HashSet<_>>();
        assert!(unique.len() > 995, "too many collisions: {}", unique.len());

        let mut buckets = [0u32; 16];
        for &h in &hashes {
            buckets[(h % 16) as usize] += 1;
        }
        for &count in &buckets {
            assert!(count > 30 && count < 95, "skewed bucket: {count}");
        }
    }

    #[test]
    fn avalanche_effect_is_strong() {
        let h1 = hash_bytes(b"test", 0);
        let h2 = hash_bytes(b"Test", 0);
        assert!((h1 ^ h2).count_ones() > 20);
    }
}
