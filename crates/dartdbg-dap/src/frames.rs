//! Stack frame pagination.
//!
//! Editors page through deep stacks a few frames at a time. Each fetch asks
//! the VM for everything up to the requested window plus [`LOOKAHEAD`]
//! more frames, and the window is cached for the rest of the pause.
//! `totalFrames` is the fetched count until a fetch comes back short, after
//! which it is exact.

/// Extra frames fetched beyond each request.
pub const LOOKAHEAD: usize = 20;

/// Frames of one isolate's current pause. Reset on every resume.
#[derive(Debug)]
pub struct FrameWindow<T> {
    frames: Vec<T>,
    complete: bool,
    reported_total: usize,
}

impl<T> Default for FrameWindow<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            complete: false,
            reported_total: 0,
        }
    }
}

/// What to ask the VM for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// The cache already covers the request.
    Cached,
    /// `getStack` with this `limit`.
    Limit(usize),
    /// `getStack` without a limit.
    All,
}

impl<T> FrameWindow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames converted so far.
    pub fn known_len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Decide whether `[start, start + levels)` needs a fetch. `levels == 0`
    /// means "all remaining frames".
    pub fn plan(&self, start: usize, levels: usize) -> FetchPlan {
        if self.complete {
            return FetchPlan::Cached;
        }
        if levels == 0 {
            return FetchPlan::All;
        }
        let end = start.saturating_add(levels);
        if end <= self.frames.len() {
            FetchPlan::Cached
        } else {
            FetchPlan::Limit(end.saturating_add(LOOKAHEAD))
        }
    }

    /// Add newly converted frames after a fetch. `fetched` is the number of
    /// frames the VM returned in total (fetches always start at the top).
    pub fn extend(&mut self, new_frames: impl IntoIterator<Item = T>, fetched: usize, plan: FetchPlan) {
        self.frames.extend(new_frames);
        self.complete = match plan {
            FetchPlan::All => true,
            FetchPlan::Limit(limit) => fetched < limit,
            FetchPlan::Cached => self.complete,
        };
        self.reported_total = if self.complete {
            self.frames.len()
        } else {
            self.reported_total.max(self.frames.len())
        };
    }

    /// The cached frames in `[start, start + levels)` and the total to
    /// report.
    pub fn slice(&self, start: usize, levels: usize) -> (&[T], usize) {
        let start = start.min(self.frames.len());
        let end = if levels == 0 {
            self.frames.len()
        } else {
            start.saturating_add(levels).min(self.frames.len())
        };
        (&self.frames[start..end], self.reported_total)
    }
}
