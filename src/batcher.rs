//! # Request Batching
//!
//! Plans the minimal set of contiguous requests that cover a set of register
//! spans of one class.
//!
//! ## How It Works
//!
//! Spans are sorted by address and merged while the next span is adjacent to
//! (or overlaps) the current run and the merged run stays within the device
//! cap for the class. A register is never split across runs, so a width-2
//! register always arrives in one response.
//!
//! Gaps between registers are never bridged: reading unmapped addresses can
//! make a device answer with an illegal-address exception.
//!
//! ## Example
//!
//! ```rust
//! use modbus_regmap::{RequestBatcher, DeviceLimits, RegisterSpan};
//!
//! let batcher = RequestBatcher::new(DeviceLimits::new().with_max_read_registers(3));
//! let runs = batcher.plan(
//!     vec![
//!         RegisterSpan::new(10, 2, 0),
//!         RegisterSpan::new(12, 2, 1),
//!         RegisterSpan::new(20, 1, 2),
//!     ],
//!     3,
//! );
//!
//! assert_eq!(runs.len(), 3);
//! assert_eq!((runs[0].start, runs[0].count), (10, 2));
//! ```

use tracing::{debug, warn};

use crate::device_limits::DeviceLimits;
use crate::register_map::{RegisterClass, RegisterDefinition};

/// Address span of one register, tagged with the caller's index for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpan {
    pub address: u16,
    pub width: u16,
    /// Caller-defined index, returned in [`RequestRun::members`].
    pub index: usize,
}

impl RegisterSpan {
    pub fn new(address: u16, width: u16, index: usize) -> Self {
        Self {
            address,
            width,
            index,
        }
    }

    #[inline]
    fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.width)
    }
}

/// One contiguous request covering one or more registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRun {
    pub start: u16,
    pub count: u16,
    /// Indices of the covered spans, in address order.
    pub members: Vec<usize>,
}

impl RequestRun {
    /// One past the last address of the run.
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    /// Word offset of `address` within the run's response.
    #[inline]
    pub fn offset_of(&self, address: u16) -> usize {
        usize::from(address.saturating_sub(self.start))
    }
}

/// Splits register spans into request runs under a device's limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBatcher {
    limits: DeviceLimits,
}

impl RequestBatcher {
    pub fn new(limits: DeviceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Read runs for the given definitions of one class.
    ///
    /// Member indices refer to positions in `definitions`.
    pub fn plan_reads(
        &self,
        class: RegisterClass,
        definitions: &[&RegisterDefinition],
    ) -> Vec<RequestRun> {
        let spans = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| RegisterSpan::new(d.address, u16::from(d.width), i))
            .collect();
        let runs = self.plan(spans, self.limits.max_read_for(class));
        debug!(
            "Planned {} read run(s) for {} {} register(s)",
            runs.len(),
            definitions.len(),
            class
        );
        runs
    }

    /// Write runs for already-encoded spans of one class.
    ///
    /// Overlapping spans never share a run, so a register written twice is
    /// written twice, in address order.
    pub fn plan_writes(&self, class: RegisterClass, spans: Vec<RegisterSpan>) -> Vec<RequestRun> {
        let cap = self.limits.max_write_for(class);
        let mut sorted = spans;
        sorted.sort_by_key(|s| (s.address, s.index));

        let mut runs: Vec<RequestRun> = Vec::new();
        let mut current: Option<RequestRun> = None;

        for span in sorted {
            if let Some(run) = current.as_mut() {
                let adjacent = u32::from(span.address) == run.end();
                let fits = span.end() - u32::from(run.start) <= u32::from(cap);
                if adjacent && fits {
                    run.count += span.width;
                    run.members.push(span.index);
                    continue;
                }
            }
            if let Some(run) = current.take() {
                runs.push(run);
            }
            current = Some(RequestRun {
                start: span.address,
                count: span.width,
                members: vec![span.index],
            });
        }
        runs.extend(current);

        debug!("Planned {} write run(s) for {}", runs.len(), class);
        runs
    }

    /// Merge spans into runs of at most `cap` words (or bits).
    ///
    /// Adjacent and overlapping spans merge. A single span wider than the cap
    /// gets a run of its own.
    pub fn plan(&self, spans: Vec<RegisterSpan>, cap: u16) -> Vec<RequestRun> {
        let cap = u32::from(cap.max(1));
        let mut sorted = spans;
        sorted.sort_by_key(|s| (s.address, s.index));

        let mut runs: Vec<RequestRun> = Vec::new();
        let mut current: Option<RequestRun> = None;

        for span in sorted {
            if u32::from(span.width) > cap {
                warn!(
                    "Register at {} spans {} words, above the request cap of {}",
                    span.address, span.width, cap
                );
            }

            if let Some(run) = current.as_mut() {
                let touches = u32::from(span.address) <= run.end();
                let merged_end = run.end().max(span.end());
                if touches && merged_end - u32::from(run.start) <= cap {
                    run.count = (merged_end - u32::from(run.start)) as u16;
                    run.members.push(span.index);
                    continue;
                }
            }
            if let Some(run) = current.take() {
                runs.push(run);
            }
            current = Some(RequestRun {
                start: span.address,
                count: span.width,
                members: vec![span.index],
            });
        }
        runs.extend(current);
        runs
    }
}

// ============================================================================
// Tests
// ============================================================================
