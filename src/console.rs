//! Live test progress on the console

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use lane_live::LiveResultParser;

use crate::logs::{CallbackLog, SharedLog};

/// A log that renders each per-test result line to `out` as it streams in.
pub fn live_results_log<W>(out: W) -> SharedLog
where
    W: Write + Send + 'static,
{
    let parser = Mutex::new(LiveResultParser::new(out));
    Arc::new(CallbackLog::new("Live results", move |text| {
        if let Ok(mut parser) = parser.lock() {
            parser.feed(text);
        }
    }))
}

/// [`live_results_log`] on stdout.
pub fn stdout_live_results() -> SharedLog {
    live_results_log(io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Log;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_split_fragment_renders_once() {
        let out = Shared::default();
        let log = live_results_log(out.clone());
        log.write("<test name=\"A\" result=\"Pass\"");
        log.write("/>\n");
        log.write("noise\n");

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("[ OK ] A").count(), 1);
    }
}
