use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over `len` items, or a hidden one when `quiet`
pub fn bar(len: u64, unit: &str, quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
                unit
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_bar_is_hidden() {
        let pb = bar(10, "records", true).unwrap();
        assert!(pb.is_hidden());
    }

    #[test]
    fn test_bar_tracks_length() {
        let pb = bar(42, "prefixes", false).unwrap();
        pb.inc(2);
        assert_eq!(pb.length(), Some(42));
        assert_eq!(pb.position(), 2);
    }
}
