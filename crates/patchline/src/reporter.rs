//! Progress and diagnostics sink threaded through catalog and assembly calls.

/// Receives human-oriented progress messages.
///
/// The CLI prints them to stderr as `[info]`, `[warn]` and `[error]` lines;
/// tests collect them.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Keeps every message in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingReporter {
    pub infos: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_reporter_keeps_levels_apart() {
        let mut reporter = CollectingReporter::default();
        reporter.info("start");
        reporter.warn("missing file");
        reporter.error("boom");
        assert_eq!(reporter.infos, vec!["start".to_string()]);
        assert_eq!(reporter.warns, vec!["missing file".to_string()]);
        assert_eq!(reporter.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn null_reporter_accepts_everything() {
        let mut reporter = NullReporter;
        reporter.info("a");
        reporter.warn("b");
        reporter.error("c");
    }
}
