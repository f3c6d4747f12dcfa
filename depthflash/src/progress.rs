//! Progress reporting.

/// Optional progress sink for one operation.
///
/// Reported values are clamped to `0.0..=1.0` and never decrease, even when
/// several sub-steps report overlapping ranges.
pub struct Progress<'a> {
    sink: Option<&'a mut dyn FnMut(f32)>,
    last: f32,
}

impl<'a> Progress<'a> {
    /// Wrap a caller-supplied sink.
    pub fn new(sink: Option<&'a mut dyn FnMut(f32)>) -> Self {
        Self { sink, last: 0.0 }
    }

    /// A sink that discards everything.
    pub fn none() -> Self {
        Self::new(None)
    }

    /// Report a fraction of completion.
    pub fn report(&mut self, fraction: f32) {
        let fraction = if fraction.is_nan() {
            self.last
        } else {
            fraction.clamp(0.0, 1.0).max(self.last)
        };
        self.last = fraction;

        if let Some(sink) = self.sink.as_mut() {
            sink(fraction);
        }
    }

    /// Report completion.
    pub fn finish(&mut self) {
        self.report(1.0);
    }

    /// Last value reported.
    pub fn last(&self) -> f32 {
        self.last
    }
}
