//! Byte at a time scanning backend

use memchr::memchr;

use crate::{scan::ScanContext, Address};

/// Find the first candidate at or after `from` where the signature matches
pub(crate) fn find(
    context: &ScanContext<'_>,
    haystack: &[u8],
    base: Address,
    from: usize,
) -> Option<usize> {
    let last_start = context.last_start(haystack)?;
    let start = context.first_candidate(base, from);

    if start > last_start {
        return None;
    }

    match context.anchor {
        Some(anchor) if context.alignment.stride() == 1 => {
            let mut start = start;

            while start <= last_start {
                // every start in start..=last_start has its anchor in this window
                let window = &haystack[start + anchor.index..=last_start + anchor.index];
                let candidate = start + memchr(anchor.byte, window)?;

                if context.verify(haystack, candidate) {
                    return Some(candidate);
                }

                start = candidate + 1;
            }

            None
        }

        Some(anchor) => (start..=last_start)
            .step_by(context.alignment.stride())
            .find(|&i| haystack[i + anchor.index] == anchor.byte && context.verify(haystack, i)),

        None => (start..=last_start)
            .step_by(context.alignment.stride())
            .find(|&i| context.verify(haystack, i)),
    }
}
