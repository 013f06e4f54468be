use crate::core::domain::Report;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("symbolization failed: {msg}")]
pub struct SymbolizeError {
    pub msg: String,
}

/// Extracts fault reports from raw console output.
#[mockall::automock]
pub trait Reporter: std::fmt::Debug + Send + Sync {
    fn parse(&self, output: &[u8]) -> Option<Report>;

    /// Resolves raw addresses in `report` to source locations.
    fn symbolize(&self, report: &mut Report) -> Result<(), SymbolizeError>;
}
