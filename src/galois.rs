//! GF(2^8) arithmetic engine.
//!
//! Owns the precomputed field tables and exposes the scalar and bulk-buffer
//! operations the encoder and decoder are built on. Addition in GF(2^8) is
//! plain XOR; multiplication goes through lookup tables built once at
//! startup from log/exp tables over the selected irreducible polynomial.
//!
//! Bulk multiply kernels use the split-nibble shuffle pattern: for a
//! constant multiplier `y`, a 16-byte table maps each low nibble to its
//! product and a second table maps each high nibble, so one vector shuffle
//! per table plus an XOR multiplies a whole register of bytes. The kernel
//! tier (AVX2, SSSE3, NEON or scalar) is probed once at context build time
//! and dispatched through a small enum; callers never need alignment.

use std::sync::OnceLock;

use crate::Error;

/// Irreducible polynomial low bytes in the high-bit-implicit convention:
/// the full polynomial is `(entry << 1) | 1` with the x^8 term carried in
/// bit 8. Entry 0 yields 0x11D, the wire default. The rest are the other
/// degree-8 irreducibles with 2 as a primitive root, kept for reference.
const GEN_POLY: [u8; 16] = [
    0x8e, 0x95, 0x96, 0xa6, 0xaf, 0xb1, 0xb2, 0xb4, 0xb8, 0xc3, 0xc6, 0xd4, 0xe1, 0xe7, 0xf3,
    0xfa,
];

const DEFAULT_POLYNOMIAL_INDEX: usize = 0;

/// EXP is doubled and extended so products and quotients of log values can
/// be looked up without a modulo, and so the LOG[0] sentinel lands in a
/// zeroed region.
const EXP_TABLE_LEN: usize = 512 * 2 + 1;

/// Sentinel discrete log for zero; points past the cyclic region of EXP so
/// any sum involving it reads a zero byte.
const LOG_ZERO: u16 = 512;

/// Kernel tier selected by the CPU probe at context build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kernel {
    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    Avx2,
    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    Ssse3,
    #[cfg(all(feature = "simd", target_arch = "aarch64"))]
    Neon,
    Scalar,
}

impl Kernel {
    fn detect() -> Self {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            if std::is_x86_feature_detected!("avx2") {
                return Kernel::Avx2;
            }
            if std::is_x86_feature_detected!("ssse3") {
                return Kernel::Ssse3;
            }
        }
        #[cfg(all(feature = "simd", target_arch = "aarch64"))]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return Kernel::Neon;
            }
        }
        Kernel::Scalar
    }
}

/// Process-wide field context: every table the library needs, immutable
/// once built.
pub(crate) struct GfContext {
    /// MUL[y][x] = x * y. Row per multiplier so bulk scalar loops borrow
    /// one row and index it per source byte.
    mul: [[u8; 256]; 256],
    /// DIV[y][x] = x / y. The y = 0 row is all zeros; callers never divide
    /// by zero, but the lookup must not fault.
    div: [[u8; 256]; 256],
    /// INV[x] = 1 / x, with INV[0] = 0 by convention.
    inv: [u8; 256],
    /// SQR[x] = x * x.
    sqr: [u8; 256],
    /// Discrete log; LOG[0] is the out-of-band sentinel.
    log: [u16; 256],
    /// Powers of the generator, doubled and zero-padded.
    exp: [u8; EXP_TABLE_LEN],
    /// Per-multiplier low-nibble product tables for the shuffle kernels.
    table_lo: [[u8; 16]; 256],
    /// Per-multiplier high-nibble product tables.
    table_hi: [[u8; 16]; 256],
    polynomial: u32,
    kernel: Kernel,
}

static CONTEXT: OnceLock<Result<GfContext, Error>> = OnceLock::new();

/// Build the field tables if this is the first caller, then hand out the
/// shared context. The `OnceLock` provides the happens-before edge between
/// initialization and every later use.
pub(crate) fn ctx() -> Result<&'static GfContext, Error> {
    match CONTEXT.get_or_init(GfContext::build) {
        Ok(ctx) => Ok(ctx),
        Err(err) => Err(*err),
    }
}

/// One-shot table initialization. Idempotent and thread-safe.
pub(crate) fn init() -> Result<(), Error> {
    ctx().map(|_| ())
}

impl GfContext {
    fn build() -> Result<GfContext, Error> {
        let kernel = Kernel::detect();
        let entry = GEN_POLY[DEFAULT_POLYNOMIAL_INDEX];
        let mut ctx = GfContext {
            mul: [[0; 256]; 256],
            div: [[0; 256]; 256],
            inv: [0; 256],
            sqr: [0; 256],
            log: [0; 256],
            exp: [0; EXP_TABLE_LEN],
            table_lo: [[0; 16]; 256],
            table_hi: [[0; 16]; 256],
            polynomial: (u32::from(entry) << 1) | 1,
            kernel,
        };
        ctx.explog_init();
        ctx.muldiv_init();
        ctx.inv_init();
        ctx.sqr_init();
        ctx.mul_mem_init();
        if !ctx.self_test() {
            return Err(Error::SelfTestFailed);
        }
        let polynomial = format!("{:#x}", ctx.polynomial);
        tracing::debug!(kernel = ?ctx.kernel, polynomial = %polynomial, "gf256 context initialized");
        Ok(ctx)
    }

    /// Fill EXP/LOG by repeated doubling of the generator 2 modulo the
    /// polynomial. EXP wraps once so `EXP[log_x + log_y]` needs no modulo,
    /// and everything past index 510 stays zero so sums through the LOG[0]
    /// sentinel read zero.
    fn explog_init(&mut self) {
        let poly = self.polynomial;
        self.log[0] = LOG_ZERO;
        self.exp[0] = 1;
        for j in 1..255 {
            let mut next = u32::from(self.exp[j - 1]) << 1;
            if next >= 256 {
                next ^= poly;
            }
            self.exp[j] = next as u8;
            self.log[self.exp[j] as usize] = j as u16;
        }
        self.exp[255] = self.exp[0];
        self.log[self.exp[255] as usize] = 255;
        for j in 256..510 {
            self.exp[j] = self.exp[j % 255];
        }
        self.exp[510] = 1;
    }

    /// MUL and DIV from EXP/LOG. The y = 0 subtables stay all-zero, which
    /// pins `x * 0` to 0 and makes division by zero return 0 without a
    /// special case at lookup time.
    fn muldiv_init(&mut self) {
        for y in 1..256usize {
            let log_y = self.log[y];
            let log_yn = 255 - log_y;
            for x in 1..256usize {
                let log_x = self.log[x];
                self.mul[y][x] = self.exp[(log_x + log_y) as usize];
                self.div[y][x] = self.exp[(log_x + log_yn) as usize];
            }
        }
    }

    fn inv_init(&mut self) {
        for x in 0..256usize {
            self.inv[x] = self.div[x][1];
        }
    }

    fn sqr_init(&mut self) {
        for x in 0..256usize {
            self.sqr[x] = self.mul[x][x];
        }
    }

    /// Split every product row into the two 16-entry nibble tables the
    /// shuffle kernels consume: `x * y == LO[y][x & 0xf] ^ HI[y][x >> 4]`.
    fn mul_mem_init(&mut self) {
        for y in 0..256usize {
            for x in 0..16usize {
                self.table_lo[y][x] = self.mul[y][x];
                self.table_hi[y][x] = self.mul[y][x << 4];
            }
        }
    }

    /// Known-answer and consistency checks, plus one pass through the
    /// selected bulk kernel against the scalar tables. Any mismatch fails
    /// initialization.
    fn self_test(&self) -> bool {
        // Fixed values for the default polynomial 0x11d.
        if self.mul(2, 0x80) != 0x1d || self.inv(2) != 0x8e || self.mul(0x8e, 2) != 1 {
            return false;
        }
        for x in 0..=255u8 {
            if self.mul(x, 1) != x || self.mul(x, 0) != 0 || self.sqr(x) != self.mul(x, x) {
                return false;
            }
            if x != 0 {
                if self.mul(self.inv(x), x) != 1 {
                    return false;
                }
                if self.div(self.mul(x, 0x5a), 0x5a) != x {
                    return false;
                }
            }
        }
        // Exercise the dispatched kernel, odd length so the tail runs too.
        let mut src = [0u8; 79];
        for (i, byte) in src.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        let mut got = [0xa5u8; 79];
        let mut want = got;
        self.muladd_mem(&mut got, &src, 0x8e);
        for (w, &s) in want.iter_mut().zip(&src) {
            *w ^= self.mul(s, 0x8e);
        }
        got == want
    }

    // ------------------------------------------------------------------
    // Scalar operations
    // ------------------------------------------------------------------

    /// x * y.
    #[inline]
    pub(crate) fn mul(&self, x: u8, y: u8) -> u8 {
        self.mul[y as usize][x as usize]
    }

    /// x / y. The result for y = 0 is unspecified (reads the zeroed
    /// subtable) but never faults.
    #[inline]
    pub(crate) fn div(&self, x: u8, y: u8) -> u8 {
        self.div[y as usize][x as usize]
    }

    /// 1 / x, with inv(0) = 0.
    #[inline]
    pub(crate) fn inv(&self, x: u8) -> u8 {
        self.inv[x as usize]
    }

    /// x * x.
    #[inline]
    pub(crate) fn sqr(&self, x: u8) -> u8 {
        self.sqr[x as usize]
    }

    #[inline]
    fn row(&self, y: u8) -> &[u8; 256] {
        &self.mul[y as usize]
    }

    #[cfg(feature = "simd")]
    #[inline]
    #[allow(dead_code)] // only read on SIMD-capable targets
    fn nibbles(&self, y: u8) -> (&[u8; 16], &[u8; 16]) {
        (&self.table_lo[y as usize], &self.table_hi[y as usize])
    }

    // ------------------------------------------------------------------
    // Bulk buffer operations
    // ------------------------------------------------------------------

    /// dst[i] ^= src[i]
    pub(crate) fn add_mem(&self, dst: &mut [u8], src: &[u8]) {
        debug_assert_eq!(dst.len(), src.len());
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe { x86::add_mem_avx2(dst, src) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: SSE2 is baseline on x86_64.
            Kernel::Ssse3 => unsafe { x86::add_mem_sse2(dst, src) },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe { neon::add_mem(dst, src) },
            Kernel::Scalar => scalar::add_mem(dst, src),
        }
    }

    /// dst[i] ^= x[i] ^ y[i]
    pub(crate) fn add2_mem(&self, dst: &mut [u8], x: &[u8], y: &[u8]) {
        debug_assert_eq!(dst.len(), x.len());
        debug_assert_eq!(dst.len(), y.len());
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe { x86::add2_mem_avx2(dst, x, y) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: SSE2 is baseline on x86_64.
            Kernel::Ssse3 => unsafe { x86::add2_mem_sse2(dst, x, y) },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe { neon::add2_mem(dst, x, y) },
            Kernel::Scalar => scalar::add2_mem(dst, x, y),
        }
    }

    /// dst[i] = x[i] ^ y[i]
    pub(crate) fn addset_mem(&self, dst: &mut [u8], x: &[u8], y: &[u8]) {
        debug_assert_eq!(dst.len(), x.len());
        debug_assert_eq!(dst.len(), y.len());
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe { x86::addset_mem_avx2(dst, x, y) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: SSE2 is baseline on x86_64.
            Kernel::Ssse3 => unsafe { x86::addset_mem_sse2(dst, x, y) },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe { neon::addset_mem(dst, x, y) },
            Kernel::Scalar => scalar::addset_mem(dst, x, y),
        }
    }

    /// dst[i] = src[i] * y
    pub(crate) fn mul_mem(&self, dst: &mut [u8], src: &[u8], y: u8) {
        debug_assert_eq!(dst.len(), src.len());
        if y == 0 {
            dst.fill(0);
            return;
        }
        if y == 1 {
            dst.copy_from_slice(src);
            return;
        }
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::mul_mem_avx2(dst, src, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed SSSE3 when this tier was selected.
            Kernel::Ssse3 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::mul_mem_ssse3(dst, src, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe {
                let (lo, hi) = self.nibbles(y);
                neon::mul_mem(dst, src, lo, hi, self.row(y));
            },
            Kernel::Scalar => scalar::mul_mem(dst, src, self.row(y)),
        }
    }

    /// dst[i] ^= src[i] * y
    pub(crate) fn muladd_mem(&self, dst: &mut [u8], src: &[u8], y: u8) {
        debug_assert_eq!(dst.len(), src.len());
        if y == 0 {
            return;
        }
        if y == 1 {
            self.add_mem(dst, src);
            return;
        }
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::muladd_mem_avx2(dst, src, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed SSSE3 when this tier was selected.
            Kernel::Ssse3 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::muladd_mem_ssse3(dst, src, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe {
                let (lo, hi) = self.nibbles(y);
                neon::muladd_mem(dst, src, lo, hi, self.row(y));
            },
            Kernel::Scalar => scalar::muladd_mem(dst, src, self.row(y)),
        }
    }

    /// dst[i] = dst[i] * y
    pub(crate) fn mul_mem_inplace(&self, dst: &mut [u8], y: u8) {
        if y == 0 {
            dst.fill(0);
            return;
        }
        if y == 1 {
            return;
        }
        match self.kernel {
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed AVX2 when this tier was selected.
            Kernel::Avx2 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::mul_mem_inplace_avx2(dst, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            // SAFETY: the probe confirmed SSSE3 when this tier was selected.
            Kernel::Ssse3 => unsafe {
                let (lo, hi) = self.nibbles(y);
                x86::mul_mem_inplace_ssse3(dst, lo, hi, self.row(y));
            },
            #[cfg(all(feature = "simd", target_arch = "aarch64"))]
            // SAFETY: the probe confirmed NEON when this tier was selected.
            Kernel::Neon => unsafe {
                let (lo, hi) = self.nibbles(y);
                neon::mul_mem_inplace(dst, lo, hi, self.row(y));
            },
            Kernel::Scalar => scalar::mul_mem_inplace(dst, self.row(y)),
        }
    }

    /// dst[i] = src[i] / y, as multiplication by the inverse.
    pub(crate) fn div_mem(&self, dst: &mut [u8], src: &[u8], y: u8) {
        let factor = if y == 1 { 1 } else { self.inv[y as usize] };
        self.mul_mem(dst, src, factor);
    }

    /// dst[i] = dst[i] / y, as multiplication by the inverse.
    pub(crate) fn div_mem_inplace(&self, dst: &mut [u8], y: u8) {
        let factor = if y == 1 { 1 } else { self.inv[y as usize] };
        self.mul_mem_inplace(dst, factor);
    }
}

/// Portable fallbacks: row-table lookups for the multiply family and
/// u64-chunked XOR for the add family. Also supplies the reference the
/// kernel self-test compares against.
mod scalar {
    pub(super) fn mul_mem(dst: &mut [u8], src: &[u8], row: &[u8; 256]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = row[s as usize];
        }
    }

    pub(super) fn muladd_mem(dst: &mut [u8], src: &[u8], row: &[u8; 256]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d ^= row[s as usize];
        }
    }

    pub(super) fn mul_mem_inplace(dst: &mut [u8], row: &[u8; 256]) {
        for d in dst.iter_mut() {
            *d = row[*d as usize];
        }
    }

    pub(super) fn add_mem(dst: &mut [u8], src: &[u8]) {
        let mut d = dst.chunks_exact_mut(8);
        let mut s = src.chunks_exact(8);
        for (dw, sw) in d.by_ref().zip(s.by_ref()) {
            let v = u64::from_ne_bytes((&*dw).try_into().unwrap())
                ^ u64::from_ne_bytes(sw.try_into().unwrap());
            dw.copy_from_slice(&v.to_ne_bytes());
        }
        for (db, sb) in d.into_remainder().iter_mut().zip(s.remainder()) {
            *db ^= *sb;
        }
    }

    pub(super) fn add2_mem(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let mut d = dst.chunks_exact_mut(8);
        let mut a = x.chunks_exact(8);
        let mut b = y.chunks_exact(8);
        for ((dw, aw), bw) in d.by_ref().zip(a.by_ref()).zip(b.by_ref()) {
            let v = u64::from_ne_bytes((&*dw).try_into().unwrap())
                ^ u64::from_ne_bytes(aw.try_into().unwrap())
                ^ u64::from_ne_bytes(bw.try_into().unwrap());
            dw.copy_from_slice(&v.to_ne_bytes());
        }
        for ((db, ab), bb) in d
            .into_remainder()
            .iter_mut()
            .zip(a.remainder())
            .zip(b.remainder())
        {
            *db ^= *ab ^ *bb;
        }
    }

    pub(super) fn addset_mem(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let mut d = dst.chunks_exact_mut(8);
        let mut a = x.chunks_exact(8);
        let mut b = y.chunks_exact(8);
        for ((dw, aw), bw) in d.by_ref().zip(a.by_ref()).zip(b.by_ref()) {
            let v = u64::from_ne_bytes(aw.try_into().unwrap())
                ^ u64::from_ne_bytes(bw.try_into().unwrap());
            dw.copy_from_slice(&v.to_ne_bytes());
        }
        for ((db, ab), bb) in d
            .into_remainder()
            .iter_mut()
            .zip(a.remainder())
            .zip(b.remainder())
        {
            *db = *ab ^ *bb;
        }
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod x86 {
    use std::arch::x86_64::*;

    /// 16 products at once: shuffle-lookup both nibbles, XOR the halves.
    #[inline(always)]
    unsafe fn mul128(v: __m128i, lo: __m128i, hi: __m128i, mask: __m128i) -> __m128i {
        let l = _mm_shuffle_epi8(lo, _mm_and_si128(v, mask));
        let h = _mm_shuffle_epi8(hi, _mm_and_si128(_mm_srli_epi64(v, 4), mask));
        _mm_xor_si128(l, h)
    }

    /// 32 products at once with the nibble tables broadcast to both lanes.
    #[inline(always)]
    unsafe fn mul256(v: __m256i, lo: __m256i, hi: __m256i, mask: __m256i) -> __m256i {
        let l = _mm256_shuffle_epi8(lo, _mm256_and_si256(v, mask));
        let h = _mm256_shuffle_epi8(hi, _mm256_and_si256(_mm256_srli_epi64(v, 4), mask));
        _mm256_xor_si256(l, h)
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_mem_avx2(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lo128 = _mm_loadu_si128(lo.as_ptr().cast());
        let hi128 = _mm_loadu_si128(hi.as_ptr().cast());
        let lo256 = _mm256_broadcastsi128_si256(lo128);
        let hi256 = _mm256_broadcastsi128_si256(hi128);
        let mask = _mm256_set1_epi8(0x0f);
        let mut at = 0;
        while at + 64 <= n {
            let p0 = mul256(_mm256_loadu_si256(src.as_ptr().add(at).cast()), lo256, hi256, mask);
            let p1 = mul256(
                _mm256_loadu_si256(src.as_ptr().add(at + 32).cast()),
                lo256,
                hi256,
                mask,
            );
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), p0);
            _mm256_storeu_si256(dst.as_mut_ptr().add(at + 32).cast(), p1);
            at += 64;
        }
        if at + 32 <= n {
            let p = mul256(_mm256_loadu_si256(src.as_ptr().add(at).cast()), lo256, hi256, mask);
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), p);
            at += 32;
        }
        if at + 16 <= n {
            let mask128 = _mm_set1_epi8(0x0f);
            let p = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lo128, hi128, mask128);
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[src[i] as usize];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn muladd_mem_avx2(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lo128 = _mm_loadu_si128(lo.as_ptr().cast());
        let hi128 = _mm_loadu_si128(hi.as_ptr().cast());
        let lo256 = _mm256_broadcastsi128_si256(lo128);
        let hi256 = _mm256_broadcastsi128_si256(hi128);
        let mask = _mm256_set1_epi8(0x0f);
        let mut at = 0;
        while at + 64 <= n {
            let p0 = mul256(_mm256_loadu_si256(src.as_ptr().add(at).cast()), lo256, hi256, mask);
            let p1 = mul256(
                _mm256_loadu_si256(src.as_ptr().add(at + 32).cast()),
                lo256,
                hi256,
                mask,
            );
            let d0 = _mm256_loadu_si256(dst.as_ptr().add(at).cast());
            let d1 = _mm256_loadu_si256(dst.as_ptr().add(at + 32).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), _mm256_xor_si256(d0, p0));
            _mm256_storeu_si256(
                dst.as_mut_ptr().add(at + 32).cast(),
                _mm256_xor_si256(d1, p1),
            );
            at += 64;
        }
        if at + 32 <= n {
            let p = mul256(_mm256_loadu_si256(src.as_ptr().add(at).cast()), lo256, hi256, mask);
            let d = _mm256_loadu_si256(dst.as_ptr().add(at).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), _mm256_xor_si256(d, p));
            at += 32;
        }
        if at + 16 <= n {
            let mask128 = _mm_set1_epi8(0x0f);
            let p = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lo128, hi128, mask128);
            let d = _mm_loadu_si128(dst.as_ptr().add(at).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(d, p));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= row[src[i] as usize];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_mem_inplace_avx2(
        dst: &mut [u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lo128 = _mm_loadu_si128(lo.as_ptr().cast());
        let hi128 = _mm_loadu_si128(hi.as_ptr().cast());
        let lo256 = _mm256_broadcastsi128_si256(lo128);
        let hi256 = _mm256_broadcastsi128_si256(hi128);
        let mask = _mm256_set1_epi8(0x0f);
        let mut at = 0;
        while at + 32 <= n {
            let p = mul256(_mm256_loadu_si256(dst.as_ptr().add(at).cast()), lo256, hi256, mask);
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), p);
            at += 32;
        }
        if at + 16 <= n {
            let mask128 = _mm_set1_epi8(0x0f);
            let p = mul128(_mm_loadu_si128(dst.as_ptr().add(at).cast()), lo128, hi128, mask128);
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[dst[i] as usize];
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn mul_mem_ssse3(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = _mm_loadu_si128(lo.as_ptr().cast());
        let hit = _mm_loadu_si128(hi.as_ptr().cast());
        let mask = _mm_set1_epi8(0x0f);
        let mut at = 0;
        while at + 32 <= n {
            let p0 = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lot, hit, mask);
            let p1 = mul128(_mm_loadu_si128(src.as_ptr().add(at + 16).cast()), lot, hit, mask);
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), p0);
            _mm_storeu_si128(dst.as_mut_ptr().add(at + 16).cast(), p1);
            at += 32;
        }
        if at + 16 <= n {
            let p = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lot, hit, mask);
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[src[i] as usize];
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn muladd_mem_ssse3(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = _mm_loadu_si128(lo.as_ptr().cast());
        let hit = _mm_loadu_si128(hi.as_ptr().cast());
        let mask = _mm_set1_epi8(0x0f);
        let mut at = 0;
        while at + 32 <= n {
            let p0 = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lot, hit, mask);
            let p1 = mul128(_mm_loadu_si128(src.as_ptr().add(at + 16).cast()), lot, hit, mask);
            let d0 = _mm_loadu_si128(dst.as_ptr().add(at).cast());
            let d1 = _mm_loadu_si128(dst.as_ptr().add(at + 16).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(d0, p0));
            _mm_storeu_si128(dst.as_mut_ptr().add(at + 16).cast(), _mm_xor_si128(d1, p1));
            at += 32;
        }
        if at + 16 <= n {
            let p = mul128(_mm_loadu_si128(src.as_ptr().add(at).cast()), lot, hit, mask);
            let d = _mm_loadu_si128(dst.as_ptr().add(at).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(d, p));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= row[src[i] as usize];
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn mul_mem_inplace_ssse3(
        dst: &mut [u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = _mm_loadu_si128(lo.as_ptr().cast());
        let hit = _mm_loadu_si128(hi.as_ptr().cast());
        let mask = _mm_set1_epi8(0x0f);
        let mut at = 0;
        while at + 16 <= n {
            let p = mul128(_mm_loadu_si128(dst.as_ptr().add(at).cast()), lot, hit, mask);
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[dst[i] as usize];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn add_mem_avx2(dst: &mut [u8], src: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 32 <= n {
            let d = _mm256_loadu_si256(dst.as_ptr().add(at).cast());
            let s = _mm256_loadu_si256(src.as_ptr().add(at).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), _mm256_xor_si256(d, s));
            at += 32;
        }
        for i in at..n {
            dst[i] ^= src[i];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn add2_mem_avx2(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 32 <= n {
            let d = _mm256_loadu_si256(dst.as_ptr().add(at).cast());
            let a = _mm256_loadu_si256(x.as_ptr().add(at).cast());
            let b = _mm256_loadu_si256(y.as_ptr().add(at).cast());
            let v = _mm256_xor_si256(d, _mm256_xor_si256(a, b));
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), v);
            at += 32;
        }
        for i in at..n {
            dst[i] ^= x[i] ^ y[i];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn addset_mem_avx2(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 32 <= n {
            let a = _mm256_loadu_si256(x.as_ptr().add(at).cast());
            let b = _mm256_loadu_si256(y.as_ptr().add(at).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(at).cast(), _mm256_xor_si256(a, b));
            at += 32;
        }
        for i in at..n {
            dst[i] = x[i] ^ y[i];
        }
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn add_mem_sse2(dst: &mut [u8], src: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let d = _mm_loadu_si128(dst.as_ptr().add(at).cast());
            let s = _mm_loadu_si128(src.as_ptr().add(at).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(d, s));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= src[i];
        }
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn add2_mem_sse2(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let d = _mm_loadu_si128(dst.as_ptr().add(at).cast());
            let a = _mm_loadu_si128(x.as_ptr().add(at).cast());
            let b = _mm_loadu_si128(y.as_ptr().add(at).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(d, _mm_xor_si128(a, b)));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= x[i] ^ y[i];
        }
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn addset_mem_sse2(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let a = _mm_loadu_si128(x.as_ptr().add(at).cast());
            let b = _mm_loadu_si128(y.as_ptr().add(at).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(at).cast(), _mm_xor_si128(a, b));
            at += 16;
        }
        for i in at..n {
            dst[i] = x[i] ^ y[i];
        }
    }
}

#[cfg(all(feature = "simd", target_arch = "aarch64"))]
mod neon {
    use std::arch::aarch64::*;

    /// 16 products at once via `vqtbl1q_u8` nibble lookups.
    #[inline(always)]
    unsafe fn mul16(v: uint8x16_t, lo: uint8x16_t, hi: uint8x16_t, mask: uint8x16_t) -> uint8x16_t {
        let l = vqtbl1q_u8(lo, vandq_u8(v, mask));
        let h = vqtbl1q_u8(hi, vandq_u8(vshrq_n_u8::<4>(v), mask));
        veorq_u8(l, h)
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn mul_mem(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = vld1q_u8(lo.as_ptr());
        let hit = vld1q_u8(hi.as_ptr());
        let mask = vdupq_n_u8(0x0f);
        let mut at = 0;
        while at + 32 <= n {
            let p0 = mul16(vld1q_u8(src.as_ptr().add(at)), lot, hit, mask);
            let p1 = mul16(vld1q_u8(src.as_ptr().add(at + 16)), lot, hit, mask);
            vst1q_u8(dst.as_mut_ptr().add(at), p0);
            vst1q_u8(dst.as_mut_ptr().add(at + 16), p1);
            at += 32;
        }
        if at + 16 <= n {
            let p = mul16(vld1q_u8(src.as_ptr().add(at)), lot, hit, mask);
            vst1q_u8(dst.as_mut_ptr().add(at), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[src[i] as usize];
        }
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn muladd_mem(
        dst: &mut [u8],
        src: &[u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = vld1q_u8(lo.as_ptr());
        let hit = vld1q_u8(hi.as_ptr());
        let mask = vdupq_n_u8(0x0f);
        let mut at = 0;
        while at + 32 <= n {
            let p0 = mul16(vld1q_u8(src.as_ptr().add(at)), lot, hit, mask);
            let p1 = mul16(vld1q_u8(src.as_ptr().add(at + 16)), lot, hit, mask);
            let d0 = vld1q_u8(dst.as_ptr().add(at));
            let d1 = vld1q_u8(dst.as_ptr().add(at + 16));
            vst1q_u8(dst.as_mut_ptr().add(at), veorq_u8(d0, p0));
            vst1q_u8(dst.as_mut_ptr().add(at + 16), veorq_u8(d1, p1));
            at += 32;
        }
        if at + 16 <= n {
            let p = mul16(vld1q_u8(src.as_ptr().add(at)), lot, hit, mask);
            let d = vld1q_u8(dst.as_ptr().add(at));
            vst1q_u8(dst.as_mut_ptr().add(at), veorq_u8(d, p));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= row[src[i] as usize];
        }
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn mul_mem_inplace(
        dst: &mut [u8],
        lo: &[u8; 16],
        hi: &[u8; 16],
        row: &[u8; 256],
    ) {
        let n = dst.len();
        let lot = vld1q_u8(lo.as_ptr());
        let hit = vld1q_u8(hi.as_ptr());
        let mask = vdupq_n_u8(0x0f);
        let mut at = 0;
        while at + 16 <= n {
            let p = mul16(vld1q_u8(dst.as_ptr().add(at)), lot, hit, mask);
            vst1q_u8(dst.as_mut_ptr().add(at), p);
            at += 16;
        }
        for i in at..n {
            dst[i] = row[dst[i] as usize];
        }
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn add_mem(dst: &mut [u8], src: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let d = vld1q_u8(dst.as_ptr().add(at));
            let s = vld1q_u8(src.as_ptr().add(at));
            vst1q_u8(dst.as_mut_ptr().add(at), veorq_u8(d, s));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= src[i];
        }
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn add2_mem(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let d = vld1q_u8(dst.as_ptr().add(at));
            let a = vld1q_u8(x.as_ptr().add(at));
            let b = vld1q_u8(y.as_ptr().add(at));
            vst1q_u8(dst.as_mut_ptr().add(at), veorq_u8(d, veorq_u8(a, b)));
            at += 16;
        }
        for i in at..n {
            dst[i] ^= x[i] ^ y[i];
        }
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn addset_mem(dst: &mut [u8], x: &[u8], y: &[u8]) {
        let n = dst.len();
        let mut at = 0;
        while at + 16 <= n {
            let a = vld1q_u8(x.as_ptr().add(at));
            let b = vld1q_u8(y.as_ptr().add(at));
            vst1q_u8(dst.as_mut_ptr().add(at), veorq_u8(a, b));
            at += 16;
        }
        for i in at..n {
            dst[i] = x[i] ^ y[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gf256::gf::gf;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    // Reference field over the same polynomial, for cross-checking the
    // table construction against an independent implementation.
    #[gf(polynomial = 0x11d, generator = 0x2)]
    type GfRef;

    #[test]
    fn init_is_idempotent() {
        init().unwrap();
        init().unwrap();
        assert!(ctx().is_ok());
    }

    #[test]
    fn known_answers_for_default_polynomial() {
        let gf = ctx().unwrap();
        assert_eq!(gf.mul(2, 0x80), 0x1d);
        assert_eq!(gf.inv(2), 0x8e);
        assert_eq!(gf.mul(0x8e, 2), 1);
        assert_eq!(gf.inv(0), 0);
        assert_eq!(gf.inv(1), 1);
    }

    #[test]
    fn scalar_invariants_exhaustive() {
        let gf = ctx().unwrap();
        for x in 0..=255u8 {
            assert_eq!(gf.sqr(x), gf.mul(x, x));
            if x != 0 {
                assert_eq!(gf.mul(gf.inv(x), x), 1);
            }
            for y in 0..=255u8 {
                assert_eq!((x ^ y) ^ y, x);
                if y != 0 {
                    assert_eq!(gf.div(gf.mul(x, y), y), x, "div(mul({x},{y})) roundtrip");
                }
            }
        }
    }

    #[test]
    fn matches_reference_field() {
        let gf = ctx().unwrap();
        for x in 0..=255u8 {
            for y in 0..=255u8 {
                assert_eq!(gf.mul(x, y), (GfRef(x) * GfRef(y)).0, "mul({x},{y})");
                if y != 0 {
                    assert_eq!(gf.div(x, y), (GfRef(x) / GfRef(y)).0, "div({x},{y})");
                }
            }
        }
    }

    #[test]
    fn division_by_zero_does_not_fault() {
        let gf = ctx().unwrap();
        for x in 0..=255u8 {
            let _ = gf.div(x, 0);
        }
        let mut buf = [1u8, 2, 3];
        gf.div_mem_inplace(&mut buf, 0);
    }

    #[test]
    fn bulk_ops_match_scalar_reference() {
        let gf = ctx().unwrap();
        let mut rng = StdRng::seed_from_u64(0xC0DE);
        let sizes = [0usize, 1, 15, 16, 17, 31, 32, 33, 63, 64, 65, 100, 1000];
        for &n in &sizes {
            for y in [0u8, 1, 2, 0x53, 0x8e, 0xff] {
                let mut src = vec![0u8; n];
                rng.fill_bytes(&mut src);
                let mut dst = vec![0u8; n];
                rng.fill_bytes(&mut dst);

                let mut got = dst.clone();
                gf.muladd_mem(&mut got, &src, y);
                let want: Vec<u8> = dst
                    .iter()
                    .zip(&src)
                    .map(|(&d, &s)| d ^ gf.mul(s, y))
                    .collect();
                assert_eq!(got, want, "muladd_mem n={n} y={y:#x}");

                let mut got = dst.clone();
                gf.mul_mem(&mut got, &src, y);
                let want: Vec<u8> = src.iter().map(|&s| gf.mul(s, y)).collect();
                assert_eq!(got, want, "mul_mem n={n} y={y:#x}");

                let mut got = src.clone();
                gf.mul_mem_inplace(&mut got, y);
                assert_eq!(got, want, "mul_mem_inplace n={n} y={y:#x}");

                if y != 0 {
                    let mut quotient = vec![0u8; n];
                    gf.div_mem(&mut quotient, &src, y);
                    let mut back = vec![0u8; n];
                    gf.mul_mem(&mut back, &quotient, y);
                    assert_eq!(back, src, "div_mem n={n} y={y:#x}");
                }
            }
        }
    }

    #[test]
    fn xor_ops_match_scalar_reference() {
        let gf = ctx().unwrap();
        let mut rng = StdRng::seed_from_u64(0xBEEF);
        for &n in &[0usize, 1, 7, 8, 9, 16, 31, 32, 33, 64, 65, 1000] {
            let mut a = vec![0u8; n];
            let mut b = vec![0u8; n];
            let mut d = vec![0u8; n];
            rng.fill_bytes(&mut a);
            rng.fill_bytes(&mut b);
            rng.fill_bytes(&mut d);

            let mut got = d.clone();
            gf.add_mem(&mut got, &a);
            let want: Vec<u8> = d.iter().zip(&a).map(|(&x, &y)| x ^ y).collect();
            assert_eq!(got, want, "add_mem n={n}");

            let mut got = d.clone();
            gf.add2_mem(&mut got, &a, &b);
            let want: Vec<u8> = d
                .iter()
                .zip(&a)
                .zip(&b)
                .map(|((&x, &y), &z)| x ^ y ^ z)
                .collect();
            assert_eq!(got, want, "add2_mem n={n}");

            let mut got = d.clone();
            gf.addset_mem(&mut got, &a, &b);
            let want: Vec<u8> = a.iter().zip(&b).map(|(&x, &y)| x ^ y).collect();
            assert_eq!(got, want, "addset_mem n={n}");
        }
    }
}
