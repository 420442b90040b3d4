/// Distance from the bottom, in pixels or rows, still treated as "at bottom".
pub const AT_BOTTOM_EPSILON: f64 = 10.0;

/// Viewport scroll measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_height: f64,
    pub scroll_top: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn is_at_bottom(&self) -> bool {
        self.scroll_height - self.scroll_top - self.client_height < AT_BOTTOM_EPSILON
    }

    /// `scroll_top` that shows the last line of content.
    pub fn bottom_offset(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Decides whether the message view follows new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollTracker {
    at_bottom: bool,
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self { at_bottom: true }
    }
}

impl ScrollTracker {
    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    /// Record a user scroll.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) {
        self.at_bottom = metrics.is_at_bottom();
    }

    /// Message sequence changed; `metrics` are measured after the change.
    ///
    /// Returns the `scroll_top` to jump to when the view was at the bottom
    /// before the change, or `None` to leave the position alone.
    pub fn on_content_changed(&mut self, metrics: ScrollMetrics) -> Option<f64> {
        self.at_bottom.then(|| metrics.bottom_offset())
    }

    /// Back to following the bottom (for example after switching chatrooms).
    pub fn reset(&mut self) {
        self.at_bottom = true;
    }
}
