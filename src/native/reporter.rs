use crate::core::{
    domain::Report,
    traits::reporter::{Reporter, SymbolizeError},
};

const OOPS_MARKERS: [&str; 8] = [
    "BUG:",
    "KASAN:",
    "KMSAN:",
    "UBSAN:",
    "WARNING:",
    "general protection fault",
    "Kernel panic",
    "panic:",
];

/// Recognizes kernel oops lines in raw console output. Has no symbol
/// information, so symbolization leaves reports as they are.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        ConsoleReporter
    }
}

impl Reporter for ConsoleReporter {
    fn parse(&self, output: &[u8]) -> Option<Report> {
        let text = String::from_utf8_lossy(output);
        let mut line_start = 0;
        for line in text.split_inclusive('\n') {
            let found = OOPS_MARKERS
                .iter()
                .filter_map(|marker| line.find(marker))
                .min();
            if let Some(pos) = found {
                let title = line[pos..].trim();
                return Some(Report::new(
                    title,
                    text[line_start..].as_bytes(),
                    output,
                ));
            }
            line_start += line.len();
        }
        None
    }

    fn symbolize(&self, _report: &mut Report) -> Result<(), SymbolizeError> {
        Ok(())
    }
}
