use indicatif::{ProgressBar, ProgressStyle};
use reprise_core::Progress;

/// Renders core progress hooks as a single terminal bar that is reset at the
/// start of each phase.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    fn phase(&self, message: &'static str, total: usize) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_message(message);
    }

    fn step(&self, count: usize) {
        self.bar.set_position(count as u64);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Progress for BarProgress {
    fn index_before_walk(&self, data_path: &str) {
        self.phase("Scanning", 0);
        self.bar.set_message(format!("Scanning {}", data_path));
    }

    fn index_walk(&self, _path: &str) {
        self.bar.inc_length(1);
        self.bar.inc(1);
    }

    fn index_before_get_latest_files(&self, total: usize) {
        self.phase("Loading latest snapshot", total);
    }

    fn index_get_latest_file(&self, count: usize, _total: usize) {
        self.step(count);
    }

    fn index_upsert_files(&self, total: usize) {
        self.phase("Storing changed files", total);
    }

    fn index_upsert_file(&self, count: usize, _total: usize) {
        self.step(count);
    }

    fn checkout_before_walk(&self, data_path: &str) {
        self.phase("Scanning", 0);
        self.bar.set_message(format!("Scanning {}", data_path));
    }

    fn checkout_walk(&self, _path: &str) {
        self.bar.inc_length(1);
        self.bar.inc(1);
    }

    fn checkout_upsert_files(&self, total: usize) {
        self.phase("Restoring files", total);
    }

    fn checkout_upsert_file(&self, count: usize, _total: usize) {
        self.step(count);
    }

    fn checkout_remove_files(&self, total: usize) {
        self.phase("Removing extra files", total);
    }

    fn checkout_remove_file(&self, count: usize, _total: usize) {
        self.step(count);
    }

    fn purge_delete_objects(&self, total: usize) {
        self.phase("Deleting objects", total);
    }

    fn purge_delete_object(&self, count: usize, _total: usize) {
        self.step(count);
    }
}
