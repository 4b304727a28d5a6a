//! Sample storage with read access into retained history
//!
//! A [`LookbackBuffer`] is two segments behind one bounds-checked accessor:
//!
//! ```text
//!   history (fixed length h)       current window (length n)
//! [ -h, -h+1, ..., -2, -1 ] [ 0, 1, 2, ..., n-1 ]
//! ```
//!
//! Any index outside both segments reads as `0.0`, which models silence
//! before the first sample and past the end of the window. The recurrences in
//! the analyzer rely on that to start from a clean state without special
//! cases at the stream edges.

/// Fixed-history sample buffer addressed with signed indices
///
/// `W` is the current window, `H` the history snapshot. The analyzer keeps
/// owned buffers for filter state and binds borrowed slices for caller input,
/// so both are generic over anything that derefs to `[f64]`.
#[derive(Debug, Clone)]
pub struct LookbackBuffer<W = Vec<f64>, H = Box<[f64]>> {
    window: W,
    history: H,
}

impl LookbackBuffer {
    /// Owned buffer with a zeroed window of `window_len` samples and
    /// `history_len` samples of zeroed history
    pub fn with_capacity(window_len: usize, history_len: usize) -> Self {
        Self {
            window: vec![0.0; window_len],
            history: vec![0.0; history_len].into_boxed_slice(),
        }
    }
}

impl<W, H> LookbackBuffer<W, H> {
    /// Build a buffer from an existing window and history snapshot
    pub fn new(window: W, history: H) -> Self {
        Self { window, history }
    }

    /// Rebind the current window. History is left untouched.
    pub fn set_window(&mut self, window: W) {
        self.window = window;
    }
}

impl<W, H> LookbackBuffer<W, H>
where
    W: AsRef<[f64]>,
    H: AsRef<[f64]>,
{
    /// Number of samples in the current window
    pub fn len(&self) -> usize {
        self.window.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of history samples reachable through negative indices
    pub fn history_len(&self) -> usize {
        self.history.as_ref().len()
    }

    /// Current window contents
    pub fn window(&self) -> &[f64] {
        self.window.as_ref()
    }

    /// History snapshot, oldest sample first
    pub fn history(&self) -> &[f64] {
        self.history.as_ref()
    }

    /// Read a sample
    ///
    /// `0..len` addresses the window, `-history_len..0` the history.
    /// Everything else is `0.0`.
    #[inline]
    pub fn read(&self, index: isize) -> f64 {
        let window = self.window.as_ref();
        let history = self.history.as_ref();

        if index >= 0 {
            window.get(index as usize).copied().unwrap_or(0.0)
        } else {
            let back = index.unsigned_abs();
            if back <= history.len() {
                history[history.len() - back]
            } else {
                0.0
            }
        }
    }
}

impl<W, H> LookbackBuffer<W, H>
where
    W: AsRef<[f64]> + AsMut<[f64]>,
    H: AsRef<[f64]>,
{
    /// Write a sample into the current window
    ///
    /// History is read-only through this accessor; indices outside the
    /// window are ignored.
    #[inline]
    pub fn write(&mut self, index: isize, value: f64) {
        if index < 0 {
            return;
        }
        if let Some(slot) = self.window.as_mut().get_mut(index as usize) {
            *slot = value;
        }
    }
}

impl<W, H> LookbackBuffer<W, H>
where
    W: AsRef<[f64]>,
    H: AsRef<[f64]> + AsMut<[f64]>,
{
    /// Mutable access to the history snapshot
    pub fn history_mut(&mut self) -> &mut [f64] {
        self.history.as_mut()
    }

    /// Replace the history with the `history_len` logical samples starting
    /// at `start`
    ///
    /// `start` may be negative: the part of the span that lies before the
    /// window is taken from the current history, so consecutive captures over
    /// short windows chain correctly. Every sample goes through [`read`],
    /// which also zero-fills anything beyond both segments.
    ///
    /// [`read`]: LookbackBuffer::read
    pub fn capture_history(&mut self, start: isize) {
        let len = self.history_len();
        if len == 0 {
            return;
        }

        // History slot `i` receives logical index `start + i`, which lives in
        // history slot `len + start + i`. When that slot is at or after `i`
        // a forward pass reads each source before it is overwritten;
        // otherwise the source trails the destination and we go backwards.
        let forward = start + len as isize >= 0;
        if forward {
            for i in 0..len {
                let value = self.read(start + i as isize);
                self.history.as_mut()[i] = value;
            }
        } else {
            for i in (0..len).rev() {
                let value = self.read(start + i as isize);
                self.history.as_mut()[i] = value;
            }
        }
    }
}
