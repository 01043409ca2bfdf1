use std::sync::atomic::{AtomicU32, Ordering};

/// No vector extension available, scalar scanning only.
pub const SIMD_NONE: u32 = 0;
/// 128-bit SSE2 lanes (x86_64 baseline).
pub const SIMD_SSE2: u32 = 1 << 0;
/// 256-bit AVX2 lanes.
pub const SIMD_AVX2: u32 = 1 << 1;
/// 512-bit AVX-512BW lanes.
pub const SIMD_AVX512: u32 = 1 << 2;
/// 128-bit NEON lanes (aarch64 baseline).
pub const SIMD_NEON: u32 = 1 << 3;

// Sentinel meaning the snapshot has not been published yet. No feature
// combination can ever equal it since only the 4 low bits are used.
const UNINITIALIZED: u32 = u32::MAX;

static FEATURES: AtomicU32 = AtomicU32::new(UNINITIALIZED);

#[cfg(target_arch = "x86_64")]
fn detect() -> u32 {
    let mut features = SIMD_SSE2;

    if is_x86_feature_detected!("avx2") {
        features |= SIMD_AVX2;
    }

    if is_x86_feature_detected!("avx512bw") {
        features |= SIMD_AVX512;
    }

    features
}

#[cfg(target_arch = "aarch64")]
fn detect() -> u32 {
    // NEON is mandatory on AArch64.
    SIMD_NEON
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> u32 {
    SIMD_NONE
}

/// Returns the process-wide snapshot of available vector extensions, as a
/// bitmask of the `SIMD_*` constants.
///
/// The snapshot is computed once and then cached; concurrent first calls
/// race benignly towards the same value.
pub fn simd_features() -> u32 {
    let features = FEATURES.load(Ordering::Acquire);

    if features != UNINITIALIZED {
        return features;
    }

    let detected = detect();

    match FEATURES.compare_exchange(
        UNINITIALIZED,
        detected,
        Ordering::SeqCst,
        Ordering::Acquire,
    ) {
        Ok(_) => detected,
        Err(published) => published,
    }
}

/// Human-readable names of the extensions set in `features`.
pub fn feature_names(features: u32) -> Vec<&'static str> {
    let mut names = Vec::new();

    if features & SIMD_AVX512 != 0 {
        names.push("avx512bw");
    }
    if features & SIMD_AVX2 != 0 {
        names.push("avx2");
    }
    if features & SIMD_SSE2 != 0 {
        names.push("sse2");
    }
    if features & SIMD_NEON != 0 {
        names.push("neon");
    }

    names
}
