//! Operating-mode selection: each node runs against either the live
//! exchange+database or the test exchange+database, never a mix of the two.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Live,
    Test,
}

impl OperationMode {
    /// The topic exchange name for this mode.
    pub fn exchange_name(self) -> &'static str {
        match self {
            OperationMode::Live => "mrcs.live",
            OperationMode::Test => "mrcs.test",
        }
    }
}
