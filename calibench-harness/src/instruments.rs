//! Built-in instruments.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use calibench_core::{StatisticalHistogram, UsageError};
use tracing::warn;

use crate::instrument::{Capabilities, ClockContext, ClockSample, Instrument};

// ---------------------------------------------------------------------------
// Allocation tracking
// ---------------------------------------------------------------------------

static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static ALLOC_BYTES: Cell<u64> = const { Cell::new(0) };
    static ALLOC_COUNT: Cell<u64> = const { Cell::new(0) };
}

/// Global allocator that counts bytes and allocations per thread.
///
/// Install it in the benchmark binary to enable [`MemoryInstrument`]:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: calibench_harness::TrackingAllocator = calibench_harness::TrackingAllocator;
/// ```
pub struct TrackingAllocator;

impl TrackingAllocator {
    /// Whether this allocator serves the current process.
    pub fn is_installed() -> bool {
        std::hint::black_box(Vec::<u8>::with_capacity(1));
        INSTALLED.load(Ordering::Relaxed)
    }
}

fn track(size: usize) {
    // try_with: TLS may already be torn down on thread exit
    let _ = ALLOC_BYTES.try_with(|b| b.set(b.get().wrapping_add(size as u64)));
    let _ = ALLOC_COUNT.try_with(|c| c.set(c.get().wrapping_add(1)));
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        INSTALLED.store(true, Ordering::Relaxed);
        track(layout.size());
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        INSTALLED.store(true, Ordering::Relaxed);
        track(layout.size());
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        track(new_size.saturating_sub(layout.size()));
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// `(bytes, allocations)` on this thread since the last reset.
pub fn current_allocation() -> (u64, u64) {
    let bytes = ALLOC_BYTES.try_with(Cell::get).unwrap_or(0);
    let count = ALLOC_COUNT.try_with(Cell::get).unwrap_or(0);
    (bytes, count)
}

pub fn reset_allocation_counter() {
    let _ = ALLOC_BYTES.try_with(|b| b.set(0));
    let _ = ALLOC_COUNT.try_with(|c| c.set(0));
}

// ---------------------------------------------------------------------------
// Memory instrument
// ---------------------------------------------------------------------------

const MEMORY_BEFORE_RUN: &str = "memory_before_run";
const MEMORY_AFTER_RUN: &str = "memory_after_run";

static MANAGED_WARNING_REPORTED: AtomicBool = AtomicBool::new(false);

/// Heap bytes allocated per iteration, averaged per round.
#[derive(Debug, Default)]
pub struct MemoryInstrument {
    histogram: StatisticalHistogram,
}

impl MemoryInstrument {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Instrument for MemoryInstrument {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with_clock_hooks()
            .with_on_complete_clock()
            .with_on_complete_benchmark()
            .with_report()
            .with_result()
            .with_reset()
    }

    fn is_supported(&self) -> bool {
        TrackingAllocator::is_installed()
    }

    fn before_clock(&mut self, ctx: &mut ClockContext) {
        if ctx.is_managed() && !MANAGED_WARNING_REPORTED.swap(true, Ordering::Relaxed) {
            warn!(
                "The memory statistics can be inaccurate since they include the setup and teardown of managed benchmarks"
            );
        }
        // Insert both keys first so the snapshots below don't allocate
        ctx.insert(MEMORY_BEFORE_RUN, 0.0);
        ctx.insert(MEMORY_AFTER_RUN, 0.0);
        reset_allocation_counter();
        ctx.insert(MEMORY_BEFORE_RUN, current_allocation().0 as f64);
    }

    fn after_clock(&mut self, ctx: &mut ClockContext) {
        ctx.insert(MEMORY_AFTER_RUN, current_allocation().0 as f64);
    }

    fn on_complete_clock(&mut self, sample: &mut ClockSample) {
        let before = sample.context.get(MEMORY_BEFORE_RUN).unwrap_or(0.0);
        let after = sample.context.get(MEMORY_AFTER_RUN).unwrap_or(0.0);
        // Closed until the next reset
        if self.histogram.is_finished() {
            return;
        }
        let per_iteration = (after - before).max(0.0) / sample.iterations.max(1) as f64;
        let recorded = self.histogram.record(per_iteration);
        debug_assert!(recorded.is_ok(), "memory sample rejected: {:?}", recorded);
    }

    fn on_complete_benchmark(&mut self, _benchmark: &str) {
        self.histogram.finish();
    }

    fn report(&self) -> Option<String> {
        Some(format!(
            "heap usage={} ({} ... {})",
            format_bytes(self.histogram.mean()),
            format_bytes(self.histogram.min()),
            format_bytes(self.histogram.max()),
        ))
    }

    fn result(&self) -> serde_json::Value {
        serde_json::json!({
            "type": Self::NAME,
            "histogram": self.histogram.summary(),
        })
    }

    fn reset(&mut self) {
        self.histogram = StatisticalHistogram::new();
    }
}

/// Human-readable byte count with binary units.
pub fn format_bytes(bytes: f64) -> String {
    if bytes < 1024.0 {
        return format!("{}B", bytes.round());
    }
    let kb = bytes / 1024.0;
    if kb < 1024.0 {
        return format!("{:.2}Kb", kb);
    }
    let mb = kb / 1024.0;
    if mb < 1024.0 {
        return format!("{:.2}MB", mb);
    }
    format!("{:.2}GB", mb / 1024.0)
}

// ---------------------------------------------------------------------------
// Compilation control
// ---------------------------------------------------------------------------

/// A mechanism that steers how the measured code gets compiled or
/// optimized (for example pinning a tier or forcing recompilation).
///
/// The harness ships no concrete control; embedders provide one and wrap
/// it in a [`CompilationControlInstrument`].
pub trait CompilationControl: Send {
    fn name(&self) -> &str;

    /// Whether the mechanism exists in this process.
    fn is_available(&self) -> bool;

    /// Runs before the clock starts.
    fn before_clock(&mut self) {}

    /// Runs after the clock stops.
    fn after_clock(&mut self) {}

    /// Current status for reports.
    fn status(&self) -> Option<String> {
        None
    }
}

/// Adapts a [`CompilationControl`] into the instrument pipeline.
#[derive(Debug)]
pub struct CompilationControlInstrument<C> {
    control: C,
}

impl<C: CompilationControl> CompilationControlInstrument<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }
}

impl<C: CompilationControl> Instrument for CompilationControlInstrument<C> {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.with_clock_hooks().with_report()
    }

    fn is_supported(&self) -> bool {
        self.control.is_available()
    }

    fn before_clock(&mut self, _ctx: &mut ClockContext) {
        self.control.before_clock();
    }

    fn after_clock(&mut self, _ctx: &mut ClockContext) {
        self.control.after_clock();
    }

    fn report(&self) -> Option<String> {
        Some(
            self.control
                .status()
                .unwrap_or_else(|| format!("{}=enabled", self.control.name())),
        )
    }
}

/// Build a built-in instrument from its name.
///
/// Isolated workers rebuild their pipeline this way.
pub fn instrument_by_name(name: &str) -> Result<Box<dyn Instrument>, UsageError> {
    match name {
        MemoryInstrument::NAME => Ok(Box::new(MemoryInstrument::new())),
        other => Err(UsageError::UnknownInstrument(other.to_string())),
    }
}
