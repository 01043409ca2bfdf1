use crate::simd::simd_features;

#[cfg(target_arch = "x86_64")]
use crate::simd::{SIMD_AVX2, SIMD_AVX512, SIMD_SSE2};

#[cfg(target_arch = "aarch64")]
use crate::simd::SIMD_NEON;

/// Counters fed by the scanner on each processed window.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanCounters {
    pub(crate) simd_ops: u64,
    pub(crate) scalar_fallbacks: u64,
}

#[inline(always)]
fn scalar_find(
    haystack: &[u8],
    n1: u8,
    n2: u8,
    n3: u8,
    n4: u8,
    counters: &mut ScanCounters,
) -> Option<usize> {
    counters.scalar_fallbacks += 1;

    haystack
        .iter()
        .position(|&byte| byte == n1 || byte == n2 || byte == n3 || byte == n4)
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use super::{scalar_find, ScanCounters};

    #[inline(always)]
    fn get_for_offset(mask: u32) -> u32 {
        #[cfg(target_endian = "big")]
        {
            mask.swap_bytes()
        }
        #[cfg(target_endian = "little")]
        {
            mask
        }
    }

    #[inline(always)]
    fn first_offset(mask: u32) -> usize {
        get_for_offset(mask).trailing_zeros() as usize
    }

    pub mod sse2 {
        use super::*;

        use std::arch::x86_64::{
            __m128i, _mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_or_si128,
            _mm_set1_epi8,
        };

        const STEP: usize = 16;

        #[derive(Debug)]
        pub struct Sse2Finder {
            n1: u8,
            n2: u8,
            n3: u8,
            n4: u8,
            v1: __m128i,
            v2: __m128i,
            v3: __m128i,
            v4: __m128i,
        }

        impl Sse2Finder {
            #[inline]
            pub unsafe fn new(n1: u8, n2: u8, n3: u8, n4: u8) -> Self {
                Self {
                    n1,
                    n2,
                    n3,
                    n4,
                    v1: _mm_set1_epi8(n1 as i8),
                    v2: _mm_set1_epi8(n2 as i8),
                    v3: _mm_set1_epi8(n3 as i8),
                    v4: _mm_set1_epi8(n4 as i8),
                }
            }

            pub unsafe fn find(
                &self,
                haystack: &[u8],
                counters: &mut ScanCounters,
            ) -> Option<usize> {
                let len = haystack.len();

                if len < STEP {
                    return scalar_find(haystack, self.n1, self.n2, self.n3, self.n4, counters);
                }

                let ptr = haystack.as_ptr();
                let mut i: usize = 0;

                while i + STEP <= len {
                    let chunk = _mm_loadu_si128(ptr.add(i) as *const __m128i);
                    let cmp1 = _mm_cmpeq_epi8(chunk, self.v1);
                    let cmp2 = _mm_cmpeq_epi8(chunk, self.v2);
                    let cmp3 = _mm_cmpeq_epi8(chunk, self.v3);
                    let cmp4 = _mm_cmpeq_epi8(chunk, self.v4);
                    let cmp = _mm_or_si128(_mm_or_si128(cmp1, cmp2), _mm_or_si128(cmp3, cmp4));

                    let mask = _mm_movemask_epi8(cmp) as u32;

                    counters.simd_ops += 1;

                    if mask != 0 {
                        return Some(i + first_offset(mask));
                    }

                    i += STEP;
                }

                if i < len {
                    return scalar_find(&haystack[i..], self.n1, self.n2, self.n3, self.n4, counters)
                        .map(|offset| i + offset);
                }

                None
            }
        }
    }

    pub mod avx2 {
        use super::*;

        use std::arch::x86_64::{
            __m256i, _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8, _mm256_or_si256,
            _mm256_set1_epi8, _mm_prefetch, _MM_HINT_T0,
        };

        const STEP: usize = 32;

        #[derive(Debug)]
        pub struct Avx2Finder {
            n1: u8,
            n2: u8,
            n3: u8,
            n4: u8,
            v1: __m256i,
            v2: __m256i,
            v3: __m256i,
            v4: __m256i,
        }

        impl Avx2Finder {
            #[target_feature(enable = "avx2")]
            pub unsafe fn new(n1: u8, n2: u8, n3: u8, n4: u8) -> Self {
                Self {
                    n1,
                    n2,
                    n3,
                    n4,
                    v1: _mm256_set1_epi8(n1 as i8),
                    v2: _mm256_set1_epi8(n2 as i8),
                    v3: _mm256_set1_epi8(n3 as i8),
                    v4: _mm256_set1_epi8(n4 as i8),
                }
            }

            #[target_feature(enable = "avx2")]
            pub unsafe fn find(
                &self,
                haystack: &[u8],
                counters: &mut ScanCounters,
            ) -> Option<usize> {
                let len = haystack.len();

                if len < STEP {
                    return scalar_find(haystack, self.n1, self.n2, self.n3, self.n4, counters);
                }

                let ptr = haystack.as_ptr();
                let mut i: usize = 0;

                while i + STEP <= len {
                    if i + STEP * 8 <= len {
                        _mm_prefetch(ptr.add(i + STEP * 8) as *const i8, _MM_HINT_T0);
                    }

                    let chunk = _mm256_loadu_si256(ptr.add(i) as *const __m256i);
                    let cmp1 = _mm256_cmpeq_epi8(chunk, self.v1);
                    let cmp2 = _mm256_cmpeq_epi8(chunk, self.v2);
                    let cmp3 = _mm256_cmpeq_epi8(chunk, self.v3);
                    let cmp4 = _mm256_cmpeq_epi8(chunk, self.v4);
                    let cmp =
                        _mm256_or_si256(_mm256_or_si256(cmp1, cmp2), _mm256_or_si256(cmp3, cmp4));

                    let mask = _mm256_movemask_epi8(cmp) as u32;

                    counters.simd_ops += 1;

                    if mask != 0 {
                        return Some(i + first_offset(mask));
                    }

                    i += STEP;
                }

                if i < len {
                    return scalar_find(&haystack[i..], self.n1, self.n2, self.n3, self.n4, counters)
                        .map(|offset| i + offset);
                }

                None
            }
        }
    }

    pub mod avx512 {
        use super::*;

        use std::arch::x86_64::{
            __m512i, _mm512_cmpeq_epi8_mask, _mm512_loadu_si512, _mm512_set1_epi8, _mm_prefetch,
            _MM_HINT_T0,
        };

        const STEP: usize = 64;

        #[inline(always)]
        fn get_for_offset(mask: u64) -> u64 {
            #[cfg(target_endian = "big")]
            {
                mask.swap_bytes()
            }
            #[cfg(target_endian = "little")]
            {
                mask
            }
        }

        #[derive(Debug)]
        pub struct Avx512Finder {
            n1: u8,
            n2: u8,
            n3: u8,
            n4: u8,
            v1: __m512i,
            v2: __m512i,
            v3: __m512i,
            v4: __m512i,
        }

        impl Avx512Finder {
            #[target_feature(enable = "avx512bw")]
            pub unsafe fn new(n1: u8, n2: u8, n3: u8, n4: u8) -> Self {
                Self {
                    n1,
                    n2,
                    n3,
                    n4,
                    v1: _mm512_set1_epi8(n1 as i8),
                    v2: _mm512_set1_epi8(n2 as i8),
                    v3: _mm512_set1_epi8(n3 as i8),
                    v4: _mm512_set1_epi8(n4 as i8),
                }
            }

            #[target_feature(enable = "avx512bw")]
            pub unsafe fn find(
                &self,
                haystack: &[u8],
                counters: &mut ScanCounters,
            ) -> Option<usize> {
                let len = haystack.len();

                if len < STEP {
                    return scalar_find(haystack, self.n1, self.n2, self.n3, self.n4, counters);
                }

                let ptr = haystack.as_ptr();
                let mut i: usize = 0;

                while i + STEP <= len {
                    if i + STEP * 8 <= len {
                        _mm_prefetch(ptr.add(i + STEP * 8) as *const i8, _MM_HINT_T0);
                    }

                    let chunk = _mm512_loadu_si512(ptr.add(i) as *const _);

                    // Byte compares produce a 64-bit mask directly, one bit
                    // per byte lane.
                    let mask = _mm512_cmpeq_epi8_mask(chunk, self.v1)
                        | _mm512_cmpeq_epi8_mask(chunk, self.v2)
                        | _mm512_cmpeq_epi8_mask(chunk, self.v3)
                        | _mm512_cmpeq_epi8_mask(chunk, self.v4);

                    counters.simd_ops += 1;

                    if mask != 0 {
                        return Some(i + get_for_offset(mask).trailing_zeros() as usize);
                    }

                    i += STEP;
                }

                if i < len {
                    return scalar_find(&haystack[i..], self.n1, self.n2, self.n3, self.n4, counters)
                        .map(|offset| i + offset);
                }

                None
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use super::{scalar_find, ScanCounters};

    use std::arch::aarch64::{
        uint8x16_t, vceqq_u8, vdupq_n_u8, vget_lane_u64, vld1q_u8, vorrq_u8, vreinterpret_u64_u8,
        vreinterpretq_u16_u8, vshrn_n_u16,
    };

    const STEP: usize = 16;

    // Narrowing shift packs the 16 lane results into a 64-bit word holding
    // 4 bits per byte lane.
    #[inline(always)]
    unsafe fn neon_movemask(v: uint8x16_t) -> u64 {
        let asu16s = vreinterpretq_u16_u8(v);
        let mask = vshrn_n_u16(asu16s, 4);
        let asu64 = vreinterpret_u64_u8(mask);
        let scalar64 = vget_lane_u64(asu64, 0);

        scalar64 & 0x8888888888888888
    }

    #[inline(always)]
    fn get_for_offset(mask: u64) -> u64 {
        #[cfg(target_endian = "big")]
        {
            mask.swap_bytes()
        }
        #[cfg(target_endian = "little")]
        {
            mask
        }
    }

    #[inline(always)]
    fn first_offset(mask: u64) -> usize {
        (get_for_offset(mask).trailing_zeros() >> 2) as usize
    }

    #[derive(Debug)]
    pub struct NeonFinder {
        n1: u8,
        n2: u8,
        n3: u8,
        n4: u8,
        v1: uint8x16_t,
        v2: uint8x16_t,
        v3: uint8x16_t,
        v4: uint8x16_t,
    }

    impl NeonFinder {
        #[inline]
        pub unsafe fn new(n1: u8, n2: u8, n3: u8, n4: u8) -> Self {
            Self {
                n1,
                n2,
                n3,
                n4,
                v1: vdupq_n_u8(n1),
                v2: vdupq_n_u8(n2),
                v3: vdupq_n_u8(n3),
                v4: vdupq_n_u8(n4),
            }
        }

        pub unsafe fn find(&self, haystack: &[u8], counters: &mut ScanCounters) -> Option<usize> {
            let len = haystack.len();

            if len < STEP {
                return scalar_find(haystack, self.n1, self.n2, self.n3, self.n4, counters);
            }

            let ptr = haystack.as_ptr();
            let mut i: usize = 0;

            while i + STEP <= len {
                let chunk = vld1q_u8(ptr.add(i));
                let cmp1 = vceqq_u8(chunk, self.v1);
                let cmp2 = vceqq_u8(chunk, self.v2);
                let cmp3 = vceqq_u8(chunk, self.v3);
                let cmp4 = vceqq_u8(chunk, self.v4);
                let cmp = vorrq_u8(vorrq_u8(cmp1, cmp2), vorrq_u8(cmp3, cmp4));

                let mask = neon_movemask(cmp);

                counters.simd_ops += 1;

                if mask != 0 {
                    return Some(i + first_offset(mask));
                }

                i += STEP;
            }

            if i < len {
                return scalar_find(&haystack[i..], self.n1, self.n2, self.n3, self.n4, counters)
                    .map(|offset| i + offset);
            }

            None
        }
    }
}

#[derive(Debug)]
struct ScalarFinder {
    n1: u8,
    n2: u8,
    n3: u8,
    n4: u8,
}

impl ScalarFinder {
    fn new(n1: u8, n2: u8, n3: u8, n4: u8) -> Self {
        Self { n1, n2, n3, n4 }
    }

    #[inline(always)]
    fn find(&self, haystack: &[u8], counters: &mut ScanCounters) -> Option<usize> {
        scalar_find(haystack, self.n1, self.n2, self.n3, self.n4, counters)
    }
}

#[derive(Debug)]
enum Imp {
    #[cfg(target_arch = "x86_64")]
    Avx512(x86_64::avx512::Avx512Finder),

    #[cfg(target_arch = "x86_64")]
    Avx2(x86_64::avx2::Avx2Finder),

    #[cfg(target_arch = "x86_64")]
    Sse2(x86_64::sse2::Sse2Finder),

    #[cfg(target_arch = "aarch64")]
    Neon(aarch64::NeonFinder),

    Scalar(ScalarFinder),
}

/// Bulk scanner for the first occurrence of any byte among
/// {delimiter, quote, CR, LF}.
///
/// The widest implementation available on the running CPU is picked once at
/// construction and never changes afterwards.
#[derive(Debug)]
pub(crate) struct Scanner {
    imp: Imp,
    pub(crate) counters: ScanCounters,
}

impl Scanner {
    pub(crate) fn new(delimiter: u8, quote: u8) -> Self {
        let imp = Self::select(delimiter, quote, simd_features());

        Self {
            imp,
            counters: ScanCounters::default(),
        }
    }

    #[allow(unused_variables)]
    fn select(delimiter: u8, quote: u8, features: u32) -> Imp {
        #[cfg(target_arch = "x86_64")]
        {
            if features & SIMD_AVX512 != 0 {
                return Imp::Avx512(unsafe {
                    x86_64::avx512::Avx512Finder::new(delimiter, quote, b'\r', b'\n')
                });
            }

            if features & SIMD_AVX2 != 0 {
                return Imp::Avx2(unsafe {
                    x86_64::avx2::Avx2Finder::new(delimiter, quote, b'\r', b'\n')
                });
            }

            if features & SIMD_SSE2 != 0 {
                return Imp::Sse2(unsafe {
                    x86_64::sse2::Sse2Finder::new(delimiter, quote, b'\r', b'\n')
                });
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if features & SIMD_NEON != 0 {
                return Imp::Neon(unsafe { aarch64::NeonFinder::new(delimiter, quote, b'\r', b'\n') });
            }
        }

        Imp::Scalar(ScalarFinder::new(delimiter, quote, b'\r', b'\n'))
    }

    /// Offset of the first byte among {delimiter, quote, CR, LF} in
    /// `haystack`, or `None` when absent.
    #[inline(always)]
    pub(crate) fn find(&mut self, haystack: &[u8]) -> Option<usize> {
        let Self { imp, counters } = self;

        match imp {
            #[cfg(target_arch = "x86_64")]
            Imp::Avx512(finder) => unsafe { finder.find(haystack, counters) },

            #[cfg(target_arch = "x86_64")]
            Imp::Avx2(finder) => unsafe { finder.find(haystack, counters) },

            #[cfg(target_arch = "x86_64")]
            Imp::Sse2(finder) => unsafe { finder.find(haystack, counters) },

            #[cfg(target_arch = "aarch64")]
            Imp::Neon(finder) => unsafe { finder.find(haystack, counters) },

            Imp::Scalar(finder) => finder.find(haystack, counters),
        }
    }
}
