//! AVX2 scanning backend

use std::arch::x86_64::{
    __m256i, _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8, _mm256_set1_epi8,
};

use super::single;
use crate::{scan::ScanContext, Address};

const UNIT_SIZE: usize = 32;

/// Find the first match at or after `from`, comparing 32 anchor positions at once
///
/// Only used for unaligned scans with an anchor; anything else goes to the single backend.
///
/// # Safety
///
/// * Currently running CPU supports AVX2
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn find(
    context: &ScanContext<'_>,
    haystack: &[u8],
    base: Address,
    from: usize,
) -> Option<usize> {
    let Some(anchor) = context.anchor else {
        return single::find(context, haystack, base, from);
    };

    let last_start = context.last_start(haystack)?;
    if from > last_start {
        return None;
    }

    // anchor positions to test are from+index ..= last_start+index
    let end = last_start + anchor.index + 1;
    // a pair compare reads one byte further
    let width = UNIT_SIZE + anchor.next.is_some() as usize;

    let ptr = haystack.as_ptr();
    let mut pos = from + anchor.index;

    // SAFETY: this function is only called if the CPU supports AVX2, and every load
    //         reads haystack[pos..pos + width] which the loop condition keeps in bounds
    unsafe {
        let first = _mm256_set1_epi8(anchor.byte as i8);
        let second = _mm256_set1_epi8(anchor.next.unwrap_or_default() as i8);

        while pos < end && pos + width <= haystack.len() {
            let chunk = _mm256_loadu_si256(ptr.add(pos) as *const __m256i);
            let mut mask = _mm256_movemask_epi8(_mm256_cmpeq_epi8(chunk, first)) as u32;

            if anchor.next.is_some() {
                let shifted = _mm256_loadu_si256(ptr.add(pos + 1) as *const __m256i);
                mask &= _mm256_movemask_epi8(_mm256_cmpeq_epi8(shifted, second)) as u32;
            }

            // drop anchor hits past the last possible start
            let remaining = end - pos;
            if remaining < UNIT_SIZE {
                mask &= (1u32 << remaining) - 1;
            }

            while mask != 0 {
                let candidate = pos + mask.trailing_zeros() as usize - anchor.index;

                if context.verify(haystack, candidate) {
                    return Some(candidate);
                }

                // clear lowest set bit
                mask &= mask - 1;
            }

            pos += UNIT_SIZE;
        }
    }

    if pos >= end {
        return None;
    }

    single::find(context, haystack, base, pos - anchor.index)
}
