//! Live Test Results
//!
//! Turns the raw fragment stream a device-side test runner writes to the
//! result listener into per-test pass/fail lines. Chunks may split lines
//! anywhere; the parser buffers partial lines and only acts on complete ones.
//!
//! Parsing is best effort: anything that is not a single per-test element is
//! dropped without surfacing an error to the caller.

pub mod line;
pub mod parser;
pub mod tally;

pub use line::{parse_result_line, ParseError, ResultState, TestLine, TEST_MARKER};
pub use parser::LiveResultParser;
pub use tally::{ResultTally, TestCounts};
