use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use std::borrow::Cow;
use std::time::{Duration, Instant};

/// How often should progress bars be redrawn?
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

lazy_static! {
    // NOTE: indicatif's ETA and rate estimates jump around a lot for bursty chunked work,
    //       so neither is shown.
    static ref DEFINITE_COUNT_STYLE: ProgressStyle =
        ProgressStyle::with_template("{msg}  {bar} {percent:>3}%  {human_pos}/{human_len}  [{elapsed_precise}]")
            .expect("progress bar style template should compile");
}

/// Wraps an `indicatif::ProgressBar` with a local buffer to reduce update contention overhead.
/// Updates are batched and the progress bar is updated only every `PROGRESS_UPDATE_INTERVAL`.
///
/// Each matching worker holds its own clone; the local counts of the clones are flushed when
/// they are dropped.
pub struct Progress {
    inc_since_sync: u64,
    last_sync: Instant,
    inner: ProgressBar,
}

impl Progress {
    /// A bar counting towards a known total, such as probands being matched.
    pub fn new_bar<T: Into<Cow<'static, str>>>(total: u64, message: T, enabled: bool) -> Self {
        let inner = if enabled {
            let inner = ProgressBar::new(total)
                .with_style(DEFINITE_COUNT_STYLE.clone())
                .with_message(message);

            inner.enable_steady_tick(PROGRESS_UPDATE_INTERVAL);

            inner
        } else {
            ProgressBar::hidden()
        };

        Progress {
            inc_since_sync: 0,
            last_sync: Instant::now(),
            inner,
        }
    }

    #[inline]
    pub fn inc(&mut self, count: u64) {
        self.inc_since_sync += count;
        if self.last_sync.elapsed() >= PROGRESS_UPDATE_INTERVAL {
            self.sync();
        }
    }

    pub fn finish(&mut self) {
        self.sync();
        self.inner.finish();
    }

    /// The count shown so far, including updates not yet synced from this handle.
    pub fn position(&self) -> u64 {
        self.inner.position() + self.inc_since_sync
    }

    fn sync(&mut self) {
        self.inner.inc(self.inc_since_sync);
        self.inc_since_sync = 0;
        self.last_sync = Instant::now();
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.sync();
    }
}

impl Clone for Progress {
    fn clone(&self) -> Self {
        Progress {
            inc_since_sync: 0,
            last_sync: Instant::now(),
            inner: self.inner.clone(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hidden_bar_counts_across_clones() {
        let mut progress = Progress::new_bar(10, "Matching", false);
        {
            let mut a = progress.clone();
            let mut b = progress.clone();
            a.inc(3);
            b.inc(4);
        }
        progress.inc(1);
        assert_eq!(progress.position(), 8);
        progress.finish();
    }
}
