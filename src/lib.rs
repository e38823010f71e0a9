//! Cauchy-matrix Reed-Solomon erasure coding over GF(2^8).
//!
//! The library turns `original_count` equal-sized data blocks into
//! `recovery_count` recovery blocks such that any `original_count` blocks
//! out of the combined set reconstruct the full payload. Combination
//! coefficients come from a Cauchy matrix over GF(2^8), which is MDS:
//! every square submatrix is invertible, so any loss pattern of up to
//! `recovery_count` originals is recoverable.
//!
//! Blocks carry a one-byte index. Originals use `[0, original_count)`;
//! recovery blocks continue at `original_count`. The decoder rewrites the
//! recovery blocks it consumes in place with the reconstructed originals
//! and updates their indices accordingly.
//!
//! # Example
//!
//! ```rust
//! use cauchy256::{Params, Block, BlockMut, encode, decode};
//!
//! let params = Params::new(3, 2, 8).unwrap();
//!
//! let originals: Vec<Vec<u8>> = (0..3).map(|i| vec![i as u8 + 1; 8]).collect();
//! let blocks: Vec<Block> = originals
//!     .iter()
//!     .enumerate()
//!     .map(|(i, data)| Block::new(i as u8, data))
//!     .collect();
//!
//! let mut recovery = vec![0u8; 2 * 8];
//! encode(&params, &blocks, &mut recovery).unwrap();
//!
//! // Lose original 1; hand the decoder the survivors plus recovery
//! // block 0 (which carries index 3).
//! let mut b0 = originals[0].clone();
//! let mut r0 = recovery[..8].to_vec();
//! let mut b2 = originals[2].clone();
//! let mut received = vec![
//!     BlockMut::new(0, &mut b0),
//!     BlockMut::new(3, &mut r0),
//!     BlockMut::new(2, &mut b2),
//! ];
//! decode(&params, &mut received).unwrap();
//! assert_eq!(received[1].index, 1);
//! assert_eq!(r0, originals[1]);
//! ```

mod galois;

use galois::GfContext;

/// Error type for encode/decode operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid parameter values (zero counts or block size, counts > 255)
    InvalidParams,
    /// Too many total blocks (original + recovery > 256)
    TooManyBlocks,
    /// Input array or buffer size inconsistent with the parameters
    InvalidInput,
    /// Block index outside the valid range for the parameters
    IndexOutOfRange,
    /// Duplicate block index
    DuplicateIndex,
    /// Wrong number of blocks provided for decoding
    InsufficientBlocks,
    /// Field table self-test failed; the library refuses to operate
    SelfTestFailed,
    /// Zero pivot in the Cauchy decomposition; indicates a library bug
    ZeroPivot,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParams => write!(f, "invalid encoder parameters"),
            Error::TooManyBlocks => write!(f, "original_count + recovery_count > 256"),
            Error::InvalidInput => write!(f, "input sizes inconsistent with parameters"),
            Error::IndexOutOfRange => write!(f, "block index out of range"),
            Error::DuplicateIndex => write!(f, "duplicate block index"),
            Error::InsufficientBlocks => write!(f, "wrong block count for decoding"),
            Error::SelfTestFailed => write!(f, "gf256 table self-test failed"),
            Error::ZeroPivot => write!(f, "zero pivot in cauchy decomposition"),
        }
    }
}

impl std::error::Error for Error {}

/// Build the process-wide GF(2^8) tables. Idempotent and safe to call from
/// any thread; `encode` and `decode` go through the same one-shot guard, so
/// calling this explicitly is optional but keeps the (sub-millisecond)
/// table construction out of the first encode.
pub fn field_init() -> Result<(), Error> {
    galois::init()
}

/// Encoder/decoder parameters, fixed for one stripe.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Number of original data blocks
    original_count: usize,
    /// Number of recovery blocks
    recovery_count: usize,
    /// Size of each block in bytes
    block_bytes: usize,
}

impl Params {
    /// Create new encoder parameters.
    ///
    /// `original_count` must be 1..=255, `block_bytes` non-zero, and
    /// `original_count + recovery_count` at most 256. A `recovery_count`
    /// of zero is accepted as the degenerate no-parity configuration.
    pub fn new(
        original_count: usize,
        recovery_count: usize,
        block_bytes: usize,
    ) -> Result<Self, Error> {
        if original_count == 0 || original_count > 255 || block_bytes == 0 {
            return Err(Error::InvalidParams);
        }
        if original_count + recovery_count > 256 {
            return Err(Error::TooManyBlocks);
        }
        Ok(Self {
            original_count,
            recovery_count,
            block_bytes,
        })
    }

    #[inline]
    pub fn original_count(&self) -> usize {
        self.original_count
    }

    #[inline]
    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Wire index carried by an original block.
    #[inline]
    pub fn original_block_index(&self, original_index: usize) -> u8 {
        debug_assert!(original_index < self.original_count);
        original_index as u8
    }

    /// Wire index carried by a recovery block.
    #[inline]
    pub fn recovery_block_index(&self, recovery_index: usize) -> u8 {
        debug_assert!(recovery_index < self.recovery_count);
        (self.original_count + recovery_index) as u8
    }
}

/// A data block with its index (encode input).
#[derive(Debug, Clone)]
pub struct Block<'a> {
    /// Block data
    pub data: &'a [u8],
    /// Block index (0..original_count for originals, original_count.. for
    /// recovery blocks)
    pub index: u8,
}

impl<'a> Block<'a> {
    #[inline]
    pub fn new(index: u8, data: &'a [u8]) -> Self {
        Self { data, index }
    }

    #[inline]
    pub fn is_original(&self, params: &Params) -> bool {
        (self.index as usize) < params.original_count
    }
}

/// A mutable block for decoding. Recovery blocks are rewritten in place
/// with reconstructed originals and their `index` updated to match.
#[derive(Debug)]
pub struct BlockMut<'a> {
    /// Block data
    pub data: &'a mut [u8],
    /// Block index
    pub index: u8,
}

impl<'a> BlockMut<'a> {
    #[inline]
    pub fn new(index: u8, data: &'a mut [u8]) -> Self {
        Self { data, index }
    }
}

/// Cauchy matrix entry for recovery row `x_i` and original column `y_j`,
/// normalized so the first recovery row is all ones:
///
///   a_ij = (y_j + x_0) / (x_i + y_j)
///
/// with `x_0 = original_count` (the first recovery row index) and
/// `y_j = j`. Sender and receiver must agree on this assignment; it is
/// part of the wire contract together with the field polynomial.
#[inline]
fn matrix_element(gf: &GfContext, x_i: u8, x_0: u8, y_j: u8) -> u8 {
    gf.div(y_j ^ x_0, x_i ^ y_j)
}

// =============================================================================
// Encoding
// =============================================================================

/// Collect the original block payloads in index order, validating indices
/// and lengths along the way.
fn place_by_index<'a>(params: &Params, originals: &[Block<'a>]) -> Result<Vec<&'a [u8]>, Error> {
    let mut ordered: Vec<Option<&[u8]>> = vec![None; params.original_count];
    for block in originals {
        let idx = block.index as usize;
        if idx >= params.original_count {
            return Err(Error::IndexOutOfRange);
        }
        if block.data.len() != params.block_bytes {
            return Err(Error::InvalidInput);
        }
        if ordered[idx].is_some() {
            return Err(Error::DuplicateIndex);
        }
        ordered[idx] = Some(block.data);
    }
    // originals.len() == original_count with no duplicates fills every slot
    Ok(ordered.into_iter().map(|slot| slot.unwrap()).collect())
}

/// Produce one recovery block from index-ordered original payloads.
fn encode_one(
    gf: &GfContext,
    params: &Params,
    originals: &[&[u8]],
    recovery_index: usize,
    out: &mut [u8],
) {
    // Degenerate single-original stripe: every recovery is a plain copy.
    if params.original_count == 1 {
        out.copy_from_slice(originals[0]);
        return;
    }

    // Row 0 of the normalized matrix is all ones, so the first recovery
    // block is plain XOR parity. This is the dominant deployment shape and
    // skips the multiply kernels entirely.
    if recovery_index == 0 {
        gf.addset_mem(out, originals[0], originals[1]);
        for data in &originals[2..] {
            gf.add_mem(out, data);
        }
        return;
    }

    let x_0 = params.original_count as u8;
    let x_i = params.recovery_block_index(recovery_index);
    gf.mul_mem(out, originals[0], matrix_element(gf, x_i, x_0, 0));
    for (j, data) in originals.iter().enumerate().skip(1) {
        gf.muladd_mem(out, data, matrix_element(gf, x_i, x_0, j as u8));
    }
}

/// Encode all recovery blocks.
///
/// `originals` must hold every original block exactly once, in any order;
/// `recovery_out` receives `recovery_count` blocks end-to-end, where the
/// k-th block carries wire index `original_count + k`.
pub fn encode(
    params: &Params,
    originals: &[Block<'_>],
    recovery_out: &mut [u8],
) -> Result<(), Error> {
    let gf = galois::ctx()?;
    if originals.len() != params.original_count {
        return Err(Error::InvalidInput);
    }
    if recovery_out.len() != params.recovery_count * params.block_bytes {
        return Err(Error::InvalidInput);
    }
    let ordered = place_by_index(params, originals)?;
    for (recovery_index, out) in recovery_out.chunks_exact_mut(params.block_bytes).enumerate() {
        encode_one(gf, params, &ordered, recovery_index, out);
    }
    Ok(())
}

/// Encode a single recovery block.
///
/// Useful when recovery blocks are produced incrementally, e.g. one parity
/// block per outgoing packet train.
pub fn encode_block(
    params: &Params,
    originals: &[Block<'_>],
    recovery_index: usize,
    out: &mut [u8],
) -> Result<(), Error> {
    let gf = galois::ctx()?;
    if recovery_index >= params.recovery_count {
        return Err(Error::InvalidParams);
    }
    if originals.len() != params.original_count || out.len() != params.block_bytes {
        return Err(Error::InvalidInput);
    }
    let ordered = place_by_index(params, originals)?;
    encode_one(gf, params, &ordered, recovery_index, out);
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decoder state for one stripe: the partitioned survivors plus the sorted
/// erasure list. Construction validates without mutating any buffer;
/// solving rewrites the recovery buffers in place.
struct Decoder<'d, 'e> {
    gf: &'static GfContext,
    params: Params,
    /// Surviving original payloads, in the order they appeared.
    original: Vec<&'d [u8]>,
    /// Wire indices of the surviving originals.
    original_rows: Vec<u8>,
    /// Recovery payloads, rewritten in place during the solve.
    recovery: Vec<&'d mut [u8]>,
    /// Wire indices of the recovery blocks.
    recovery_rows: Vec<u8>,
    /// Missing original positions, sorted ascending. After the solve,
    /// recovery buffer i holds the original at `erasures[i]`.
    erasures: &'e [u8],
}

impl Decoder<'_, '_> {
    /// m = 1: exactly one original is missing and one recovery row is
    /// available. Single-parity recovery is the dominant deployment, so
    /// this avoids the decomposition machinery entirely.
    fn solve_single(&mut self) {
        let gf = self.gf;
        let x_0 = self.params.original_count as u8;
        let x_r = self.recovery_rows[0];
        let out: &mut [u8] = &mut *self.recovery[0];

        if x_r == x_0 {
            // First recovery row: all coefficients are 1, so the missing
            // original is the XOR of the recovery block with every
            // survivor. Pair the survivors to halve the passes over `out`.
            let mut pending: Option<&[u8]> = None;
            for &data in self.original.iter() {
                match pending.take() {
                    None => pending = Some(data),
                    Some(first) => gf.add2_mem(out, first, data),
                }
            }
            if let Some(last) = pending {
                gf.add_mem(out, last);
            }
            return;
        }

        // General row: cancel each survivor's contribution, then divide by
        // the coefficient of the missing column.
        for (i, &data) in self.original.iter().enumerate() {
            let coeff = matrix_element(gf, x_r, x_0, self.original_rows[i]);
            gf.muladd_mem(out, data, coeff);
        }
        let pivot = matrix_element(gf, x_r, x_0, self.erasures[0]);
        gf.div_mem_inplace(out, pivot);
    }

    /// m > 1: cancel the survivors out of every recovery block, factor the
    /// erasure submatrix as L·D·U in closed form, and solve in place.
    fn solve_ldu(&mut self) -> Result<(), Error> {
        let gf = self.gf;
        let m = self.recovery.len();
        let x_0 = self.params.original_count as u8;

        // Fold the surviving originals into the right-hand side; afterwards
        // recovery[i] holds (A·x)[i] for the unknown originals x.
        for (i, &data) in self.original.iter().enumerate() {
            let y_j = self.original_rows[i];
            for r in 0..m {
                let coeff = matrix_element(gf, self.recovery_rows[r], x_0, y_j);
                gf.muladd_mem(&mut self.recovery[r], data, coeff);
            }
        }

        let (mat_l, diag_d, mat_u) = self.decompose()?;

        // Forward substitution under unit-L, column by column.
        let mut l_idx = 0;
        for k in 0..m - 1 {
            let (solved, rest) = self.recovery.split_at_mut(k + 1);
            let b_k: &[u8] = &*solved[k];
            for b_i in rest.iter_mut() {
                gf.muladd_mem(b_i, b_k, mat_l[l_idx]);
                l_idx += 1;
            }
        }

        // Divide out the diagonal.
        for (i, &d) in diag_d.iter().enumerate() {
            gf.div_mem_inplace(&mut self.recovery[i], d);
        }

        // Back substitution under unit-U, column by column from the last.
        for j in (1..m).rev() {
            let (unsolved, solved) = self.recovery.split_at_mut(j);
            let b_j: &[u8] = &*solved[0];
            let col = &mat_u[j * (j - 1) / 2..][..j];
            for (b_i, &u_ij) in unsolved.iter_mut().zip(col) {
                gf.muladd_mem(b_i, b_j, u_ij);
            }
        }

        Ok(())
    }

    /// Closed-form LDU factorization of the m×m erasure submatrix
    /// `A[i][k] = a(recovery_rows[i], erasures[k])` via the Schur-type
    /// Cauchy algorithm: each elimination step keeps the remaining matrix
    /// Cauchy-like, tracked by row generators g and column generators b
    /// instead of materializing fill-in. O(m^2) table multiplies total.
    ///
    /// L is unit lower-triangular, stored column-major without the
    /// diagonal; U is unit upper-triangular, stored column-major with the
    /// `(x_0 + y_j)` column normalization already folded in; D holds the
    /// pivots.
    fn decompose(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
        let gf = self.gf;
        let m = self.recovery.len();
        let x_0 = self.params.original_count as u8;

        let mut mat_l: Vec<u8> = Vec::with_capacity(m * (m - 1) / 2);
        let mut mat_u: Vec<u8> = vec![0; m * (m - 1) / 2];
        let mut diag_d: Vec<u8> = vec![0; m];

        let mut g: Vec<u8> = vec![1; m];
        let mut b: Vec<u8> = vec![1; m];

        for k in 0..m {
            let x_k = self.recovery_rows[k];
            let y_k = self.erasures[k];
            let span = x_k ^ y_k;

            // Pivot of the normalized matrix: g·b·(x_0 + y_k) / (x_k + y_k).
            let d_k = gf.div(gf.mul(gf.mul(g[k], b[k]), x_0 ^ y_k), span);
            if d_k == 0 {
                // Cannot happen for disjoint index sets; a zero here means
                // the tables or the caller-visible invariants are broken.
                return Err(Error::ZeroPivot);
            }
            diag_d[k] = d_k;

            let l_kk = gf.div(g[k], span);
            let u_kk = gf.mul(gf.div(b[k], span), x_0 ^ y_k);

            for i in (k + 1)..m {
                let x_i = self.recovery_rows[i];
                let y_i = self.erasures[i];

                let l_ik = gf.div(g[i], x_i ^ y_k);
                mat_l.push(gf.div(l_ik, l_kk));

                let u_ki = gf.div(b[i], x_k ^ y_i);
                mat_u[i * (i - 1) / 2 + k] = gf.mul(gf.div(u_ki, u_kk), x_0 ^ y_i);

                // Schur-complement generator updates.
                g[i] = gf.mul(g[i], gf.div(x_i ^ x_k, x_i ^ y_k));
                b[i] = gf.mul(b[i], gf.div(y_i ^ y_k, y_i ^ x_k));
            }
        }

        Ok((mat_l, diag_d, mat_u))
    }
}

/// Recover missing originals in place.
///
/// `blocks` must hold exactly `original_count` entries, each carrying its
/// wire index. Surviving originals are left untouched; each recovery block
/// is rewritten with a reconstructed original and its `index` updated to
/// that original's index. Validation errors are returned before any buffer
/// is modified; after an internal error the recovery buffers are in an
/// unspecified state and must be discarded.
pub fn decode(params: &Params, blocks: &mut [BlockMut<'_>]) -> Result<(), Error> {
    let gf = galois::ctx()?;
    if blocks.len() != params.original_count {
        return Err(Error::InsufficientBlocks);
    }
    let total = params.original_count + params.recovery_count;

    // Single-original stripes: recovery blocks are verbatim copies of the
    // original, so only the index needs rewriting.
    if params.original_count == 1 {
        let block = &mut blocks[0];
        if (block.index as usize) >= total {
            return Err(Error::IndexOutOfRange);
        }
        if block.data.len() != params.block_bytes {
            return Err(Error::InvalidInput);
        }
        block.index = 0;
        return Ok(());
    }

    // Partition into surviving originals and recovery rows. Validation
    // failures return before any buffer is touched.
    let mut seen = [false; 256];
    let mut original: Vec<&[u8]> = Vec::with_capacity(params.original_count);
    let mut original_rows: Vec<u8> = Vec::with_capacity(params.original_count);
    let mut recovery: Vec<&mut [u8]> = Vec::new();
    let mut recovery_rows: Vec<u8> = Vec::new();
    let mut recovery_positions: Vec<usize> = Vec::new();

    for (position, block) in blocks.iter_mut().enumerate() {
        let idx = block.index as usize;
        if idx >= total {
            return Err(Error::IndexOutOfRange);
        }
        if seen[idx] {
            return Err(Error::DuplicateIndex);
        }
        seen[idx] = true;
        if block.data.len() != params.block_bytes {
            return Err(Error::InvalidInput);
        }
        if idx < params.original_count {
            original.push(&*block.data);
            original_rows.push(block.index);
        } else {
            recovery.push(&mut *block.data);
            recovery_rows.push(block.index);
            recovery_positions.push(position);
        }
    }

    // Sorted positions of the missing originals. With exactly
    // original_count distinct indices supplied, the erasure count always
    // equals the recovery count.
    let mut erasures: Vec<u8> = Vec::with_capacity(recovery.len());
    for j in 0..params.original_count {
        if !seen[j] {
            erasures.push(j as u8);
        }
    }
    if erasures.is_empty() {
        return Ok(());
    }
    debug_assert_eq!(erasures.len(), recovery.len());

    {
        let mut decoder = Decoder {
            gf,
            params: *params,
            original,
            original_rows,
            recovery,
            recovery_rows,
            erasures: &erasures,
        };
        if decoder.recovery.len() == 1 {
            decoder.solve_single();
        } else {
            decoder.solve_ldu()?;
        }
    }

    // Recovery buffer i now holds the original at erasures[i].
    for (i, &position) in recovery_positions.iter().enumerate() {
        blocks[position].index = erasures[i];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::index::sample;
    use rand::{RngCore, SeedableRng};

    fn random_originals(rng: &mut StdRng, count: usize, block_bytes: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|_| {
                let mut data = vec![0u8; block_bytes];
                rng.fill_bytes(&mut data);
                data
            })
            .collect()
    }

    /// Encode `originals`, replace the originals listed in `lost` with the
    /// recovery blocks listed in `recovery_used`, decode, and require every
    /// original back byte-for-byte under the right index.
    fn round_trip_with(
        params: &Params,
        originals: &[Vec<u8>],
        lost: &[usize],
        recovery_used: &[usize],
    ) {
        let blocks: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let mut recovery = vec![0u8; params.recovery_count() * params.block_bytes()];
        encode(params, &blocks, &mut recovery).unwrap();

        let mut work: Vec<(u8, Vec<u8>)> = Vec::new();
        for (i, data) in originals.iter().enumerate() {
            if !lost.contains(&i) {
                work.push((i as u8, data.clone()));
            }
        }
        for &ri in recovery_used {
            let start = ri * params.block_bytes();
            work.push((
                params.recovery_block_index(ri),
                recovery[start..start + params.block_bytes()].to_vec(),
            ));
        }
        assert_eq!(work.len(), params.original_count());

        let mut received: Vec<BlockMut> = work
            .iter_mut()
            .map(|(index, data)| BlockMut::new(*index, data))
            .collect();
        decode(params, &mut received).unwrap();

        let mut found = vec![false; params.original_count()];
        for block in &received {
            let idx = block.index as usize;
            assert!(idx < params.original_count(), "index {idx} not an original");
            assert!(!found[idx], "index {idx} recovered twice");
            found[idx] = true;
            assert_eq!(&block.data[..], &originals[idx][..], "block {idx} mismatch");
        }
    }

    fn round_trip(
        original_count: usize,
        recovery_count: usize,
        block_bytes: usize,
        seed: u64,
        lost: &[usize],
        recovery_used: &[usize],
    ) {
        let params = Params::new(original_count, recovery_count, block_bytes).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let originals = random_originals(&mut rng, original_count, block_bytes);
        round_trip_with(&params, &originals, lost, recovery_used);
    }

    #[test]
    fn test_params_invalid() {
        assert_eq!(Params::new(0, 2, 1024).unwrap_err(), Error::InvalidParams);
        assert_eq!(Params::new(3, 2, 0).unwrap_err(), Error::InvalidParams);
        assert_eq!(Params::new(256, 0, 16).unwrap_err(), Error::InvalidParams);
        assert_eq!(Params::new(200, 100, 16).unwrap_err(), Error::TooManyBlocks);
        assert!(Params::new(3, 0, 1024).is_ok());
        assert!(Params::new(255, 1, 16).is_ok());
        assert!(Params::new(1, 255, 16).is_ok());
    }

    #[test]
    fn test_xor_parity_known_answer() {
        // First recovery row is plain parity; the expected bytes are the
        // XOR of the columns.
        let params = Params::new(3, 1, 4).unwrap();
        let originals = vec![
            vec![0x01u8, 0x02, 0x03, 0x04],
            vec![0x10u8, 0x20, 0x30, 0x40],
            vec![0xA0u8, 0xB0, 0xC0, 0xD0],
        ];
        let blocks: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let mut recovery = vec![0u8; 4];
        encode(&params, &blocks, &mut recovery).unwrap();
        assert_eq!(recovery, vec![0xB1, 0x92, 0xF3, 0x94]);

        round_trip_with(&params, &originals, &[1], &[0]);
    }

    #[test]
    fn test_two_losses_two_recoveries() {
        round_trip(2, 2, 8, 1, &[0, 1], &[0, 1]);
    }

    #[test]
    fn test_three_losses_three_recoveries() {
        round_trip(5, 3, 1024, 3, &[0, 2, 4], &[0, 1, 2]);
    }

    #[test]
    fn test_random_losses_seed7() {
        let mut rng = StdRng::seed_from_u64(7);
        let lost: Vec<usize> = sample(&mut rng, 10, 4).into_vec();
        round_trip(10, 4, 100, 7, &lost, &[0, 1, 2, 3]);
    }

    #[test]
    fn test_full_width_parity() {
        round_trip(255, 1, 16, 5, &[17], &[0]);
    }

    #[test]
    fn test_no_erasures_is_identity() {
        let params = Params::new(3, 2, 32).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let originals = random_originals(&mut rng, 3, 32);
        round_trip_with(&params, &originals, &[], &[]);
    }

    #[test]
    fn test_single_original_single_recovery() {
        round_trip(1, 1, 64, 11, &[0], &[0]);
    }

    #[test]
    fn test_single_original_many_recoveries() {
        // Any recovery block is a verbatim copy of the lone original.
        round_trip(1, 255, 16, 13, &[0], &[200]);
    }

    #[test]
    fn test_zero_recovery_count() {
        let params = Params::new(3, 0, 16).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let originals = random_originals(&mut rng, 3, 16);
        let blocks: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let mut recovery: Vec<u8> = Vec::new();
        encode(&params, &blocks, &mut recovery).unwrap();
        round_trip_with(&params, &originals, &[], &[]);
    }

    #[test]
    fn test_single_byte_blocks() {
        round_trip(5, 3, 1, 19, &[1, 2, 4], &[0, 1, 2]);
    }

    #[test]
    fn test_megabyte_blocks() {
        round_trip(4, 2, 1 << 20, 23, &[1, 3], &[0, 1]);
    }

    #[test]
    fn test_single_loss_general_recovery_row() {
        // Lose one original but recover with a non-first recovery block,
        // exercising the coefficient path of the m = 1 solve.
        round_trip(4, 3, 48, 29, &[2], &[2]);
    }

    #[test]
    fn test_multi_loss_without_first_recovery_row() {
        round_trip(5, 3, 96, 31, &[1, 3], &[1, 2]);
    }

    #[test]
    fn test_assorted_geometries() {
        for (k, r, bytes, seed) in [
            (2usize, 1usize, 33usize, 40u64),
            (7, 5, 17, 41),
            (16, 8, 64, 42),
            (32, 2, 129, 43),
            (100, 20, 31, 44),
        ] {
            let mut rng = StdRng::seed_from_u64(seed);
            let lost: Vec<usize> = sample(&mut rng, k, r).into_vec();
            let used: Vec<usize> = (0..r).collect();
            round_trip(k, r, bytes, seed, &lost, &used);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let params = Params::new(6, 3, 50).unwrap();
        let mut rng = StdRng::seed_from_u64(47);
        let originals = random_originals(&mut rng, 6, 50);
        let blocks: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let mut first = vec![0u8; 3 * 50];
        let mut second = vec![0xffu8; 3 * 50];
        encode(&params, &blocks, &mut first).unwrap();
        encode(&params, &blocks, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_accepts_any_input_order() {
        let params = Params::new(4, 2, 24).unwrap();
        let mut rng = StdRng::seed_from_u64(53);
        let originals = random_originals(&mut rng, 4, 24);
        let sorted: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let shuffled: Vec<Block> = [2usize, 0, 3, 1]
            .iter()
            .map(|&i| Block::new(i as u8, &originals[i]))
            .collect();
        let mut from_sorted = vec![0u8; 2 * 24];
        let mut from_shuffled = vec![0u8; 2 * 24];
        encode(&params, &sorted, &mut from_sorted).unwrap();
        encode(&params, &shuffled, &mut from_shuffled).unwrap();
        assert_eq!(from_sorted, from_shuffled);
    }

    #[test]
    fn test_encode_block_matches_encode() {
        let params = Params::new(5, 3, 40).unwrap();
        let mut rng = StdRng::seed_from_u64(59);
        let originals = random_originals(&mut rng, 5, 40);
        let blocks: Vec<Block> = originals
            .iter()
            .enumerate()
            .map(|(i, data)| Block::new(i as u8, data))
            .collect();
        let mut all = vec![0u8; 3 * 40];
        encode(&params, &blocks, &mut all).unwrap();
        for recovery_index in 0..3 {
            let mut single = vec![0u8; 40];
            encode_block(&params, &blocks, recovery_index, &mut single).unwrap();
            assert_eq!(
                &single[..],
                &all[recovery_index * 40..(recovery_index + 1) * 40]
            );
        }
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        let params = Params::new(3, 1, 8).unwrap();
        let data = vec![0u8; 8];
        let short = vec![0u8; 4];
        let mut recovery = vec![0u8; 8];

        let missing = vec![Block::new(0, &data), Block::new(1, &data)];
        assert_eq!(
            encode(&params, &missing, &mut recovery).unwrap_err(),
            Error::InvalidInput
        );

        let duplicate = vec![
            Block::new(0, &data),
            Block::new(0, &data),
            Block::new(2, &data),
        ];
        assert_eq!(
            encode(&params, &duplicate, &mut recovery).unwrap_err(),
            Error::DuplicateIndex
        );

        let out_of_range = vec![
            Block::new(0, &data),
            Block::new(1, &data),
            Block::new(3, &data),
        ];
        assert_eq!(
            encode(&params, &out_of_range, &mut recovery).unwrap_err(),
            Error::IndexOutOfRange
        );

        let wrong_length = vec![
            Block::new(0, &data),
            Block::new(1, &short),
            Block::new(2, &data),
        ];
        assert_eq!(
            encode(&params, &wrong_length, &mut recovery).unwrap_err(),
            Error::InvalidInput
        );

        let good = vec![
            Block::new(0, &data),
            Block::new(1, &data),
            Block::new(2, &data),
        ];
        let mut short_out = vec![0u8; 4];
        assert_eq!(
            encode(&params, &good, &mut short_out).unwrap_err(),
            Error::InvalidInput
        );
        assert_eq!(
            encode_block(&params, &good, 1, &mut recovery).unwrap_err(),
            Error::InvalidParams
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let params = Params::new(3, 2, 8).unwrap();

        let mut a = vec![0u8; 8];
        let mut b = vec![0u8; 8];
        let mut wrong_count = vec![BlockMut::new(0, &mut a), BlockMut::new(1, &mut b)];
        assert_eq!(
            decode(&params, &mut wrong_count).unwrap_err(),
            Error::InsufficientBlocks
        );

        let mut a = vec![0u8; 8];
        let mut b = vec![0u8; 8];
        let mut c = vec![0u8; 8];
        let mut duplicate = vec![
            BlockMut::new(0, &mut a),
            BlockMut::new(0, &mut b),
            BlockMut::new(2, &mut c),
        ];
        assert_eq!(
            decode(&params, &mut duplicate).unwrap_err(),
            Error::DuplicateIndex
        );

        let mut a = vec![0u8; 8];
        let mut b = vec![0u8; 8];
        let mut c = vec![0u8; 8];
        let mut out_of_range = vec![
            BlockMut::new(0, &mut a),
            BlockMut::new(1, &mut b),
            BlockMut::new(5, &mut c),
        ];
        assert_eq!(
            decode(&params, &mut out_of_range).unwrap_err(),
            Error::IndexOutOfRange
        );

        let mut a = vec![0u8; 8];
        let mut b = vec![0u8; 8];
        let mut c = vec![0u8; 4];
        let mut wrong_length = vec![
            BlockMut::new(0, &mut a),
            BlockMut::new(1, &mut b),
            BlockMut::new(2, &mut c),
        ];
        assert_eq!(
            decode(&params, &mut wrong_length).unwrap_err(),
            Error::InvalidInput
        );
    }
}
