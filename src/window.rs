//! Cutoff-relative partition of a sorted stream.

use crate::event::{Timestamped, SECONDS_PER_DAY};

/// The two disjoint, contiguous slices of a stream around a cutoff.
///
/// `pre` holds every event at or before the cutoff; `post` holds the events
/// strictly after it and no more than one day later.
#[derive(Debug, PartialEq)]
pub struct Window<'a, T> {
    pub pre: &'a [T],
    pub post: &'a [T],
}

impl<T> Clone for Window<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Window<'_, T> {}

impl<'a, T> Window<'a, T> {
    pub fn empty() -> Self {
        Self { pre: &[], post: &[] }
    }
}

/// Splits `stream` at `cutoff_seconds` with one forward scan.
///
/// The stream must already be sorted ascending; out-of-order input is not
/// detected and yields meaningless slices.
pub fn partition<T: Timestamped>(stream: &[T], cutoff_seconds: f64) -> Window<'_, T> {
    let horizon = cutoff_seconds + SECONDS_PER_DAY;
    let mut split = stream.len();
    let mut end = stream.len();

    for (idx, event) in stream.iter().enumerate() {
        let t = event.seconds();
        if split == stream.len() {
            if t > cutoff_seconds {
                split = idx;
            } else {
                continue;
            }
        }
        if t > horizon {
            end = idx;
            break;
        }
    }

    Window {
        pre: &stream[..split],
        post: &stream[split..end],
    }
}
