use indicatif::{ProgressBar, ProgressStyle};

/// Returns a bar advanced once per finished stage.
pub fn stage_bar(prefix: String, stages: u64) -> ProgressBar {
    let pb = ProgressBar::new(stages);
    pb.set_prefix(prefix);
    pb.set_style(
        ProgressStyle::with_template("{prefix} [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .expect("incorrect progress bar format string")
            .progress_chars("#>-"),
    );
    pb
}
